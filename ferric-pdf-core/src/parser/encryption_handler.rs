//! PDF encryption detection and password handling
//!
//! Authenticates against the `/Encrypt` dictionary once and then decrypts
//! strings and stream payloads as objects are loaded (ISO 32000-1 Section
//! 7.6).

use crate::encryption::{CryptMethod, EncryptionKey, StandardSecurityHandler};
use crate::error::Result;
use crate::objects::{Dictionary, Object, ObjectId};
use tracing::debug;

/// An unlocked security handler
#[derive(Debug, Clone)]
pub struct EncryptionHandler {
    handler: StandardSecurityHandler,
    key: EncryptionKey,
    /// The object holding the `/Encrypt` dictionary; never decrypted
    encrypt_id: Option<ObjectId>,
}

impl EncryptionHandler {
    /// Parse `encrypt_dict` and authenticate `password` (empty for none).
    pub fn new(
        encrypt_dict: &Dictionary,
        encrypt_id: Option<ObjectId>,
        file_id: &[u8],
        password: &[u8],
    ) -> Result<Self> {
        let handler = StandardSecurityHandler::from_dict(encrypt_dict)?;
        let key = handler.authenticate(password, file_id)?;
        debug!(
            "Unlocked revision {:?} security handler, {}-bit key",
            handler.revision(),
            key.len() * 8
        );
        Ok(Self {
            handler,
            key,
            encrypt_id,
        })
    }

    /// Check if PDF is encrypted by looking for Encrypt entry in trailer
    pub fn detect_encryption(trailer: &Dictionary) -> bool {
        trailer.contains_key("Encrypt")
    }

    pub fn security_handler(&self) -> &StandardSecurityHandler {
        &self.handler
    }

    /// Decrypt every string inside an object loaded as `id`.
    pub fn decrypt_object(&self, id: ObjectId, object: &mut Object) -> Result<()> {
        if Some(id) == self.encrypt_id {
            return Ok(());
        }
        self.decrypt_strings(id, object)
    }

    fn decrypt_strings(&self, id: ObjectId, object: &mut Object) -> Result<()> {
        match object {
            Object::String(s) => {
                let plain = self.handler.decrypt(
                    &self.key,
                    id,
                    s.as_bytes(),
                    self.handler.string_method(),
                )?;
                *s.as_bytes_mut() = plain;
            }
            Object::Array(items) => {
                for item in items {
                    self.decrypt_strings(id, item)?;
                }
            }
            Object::Dictionary(dict) => self.decrypt_dict(id, dict)?,
            Object::Stream(stream) => self.decrypt_dict(id, stream.dict_mut())?,
            _ => {}
        }
        Ok(())
    }

    fn decrypt_dict(&self, id: ObjectId, dict: &mut Dictionary) -> Result<()> {
        for (_, value) in dict.iter_mut() {
            self.decrypt_strings(id, value)?;
        }
        Ok(())
    }

    /// Decrypt the raw payload of stream `id` with dictionary `dict`.
    ///
    /// Xref streams, the encryption dictionary itself and (with
    /// `/EncryptMetadata false`) metadata streams are stored in the clear, as
    /// are streams whose own `/Crypt` filter selects `/Identity`.
    pub fn decrypt_stream(&self, id: ObjectId, dict: &Dictionary, data: &[u8]) -> Result<Vec<u8>> {
        if Some(id) == self.encrypt_id || !self.stream_is_encrypted(dict) {
            return Ok(data.to_vec());
        }
        self.handler
            .decrypt(&self.key, id, data, self.handler.stream_method())
    }

    fn stream_is_encrypted(&self, dict: &Dictionary) -> bool {
        if dict.is_type("XRef") {
            return false;
        }
        if dict.is_type("Metadata") && !self.handler.encrypt_metadata() {
            return false;
        }
        if self.handler.stream_method() == CryptMethod::Identity {
            return false;
        }
        !has_identity_crypt_filter(dict)
    }
}

/// A leading `/Crypt` filter whose `/Name` is absent or `/Identity`.
fn has_identity_crypt_filter(dict: &Dictionary) -> bool {
    let first_filter = match dict.get("Filter") {
        Some(Object::Name(name)) => Some(name.as_str()),
        Some(Object::Array(items)) => items.first().and_then(Object::as_name),
        _ => None,
    };
    if first_filter != Some("Crypt") {
        return false;
    }
    let params = match dict.get("DecodeParms") {
        Some(Object::Dictionary(params)) => Some(params),
        Some(Object::Array(items)) => items.first().and_then(Object::as_dict),
        _ => None,
    };
    params
        .and_then(|p| p.get_name("Name"))
        .map_or(true, |name| name == "Identity")
}
