//! Standard Security Handler implementation according to ISO 32000-1 Section 7.6.3
//! and ISO 32000-2 Section 7.6.4 (revisions 5 and 6)

use super::aes::{aes_cbc_decrypt, aes_cbc_encrypt, decrypt_payload};
use super::rc4::rc4_crypt;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Padding used in password processing
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Passwords longer than this are truncated for revisions 5 and 6.
const MAX_UTF8_PASSWORD: usize = 127;

/// File encryption key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey({} bytes)", self.0.len())
    }
}

/// Security handler revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityHandlerRevision {
    /// RC4 40-bit
    R2 = 2,
    /// RC4 up to 128-bit
    R3 = 3,
    /// Crypt filters (RC4 or AESV2)
    R4 = 4,
    /// AES-256, deprecated SHA-256 password check
    R5 = 5,
    /// AES-256 with the iterated hash of ISO 32000-2
    R6 = 6,
}

impl SecurityHandlerRevision {
    fn from_integer(r: i64) -> Option<Self> {
        Some(match r {
            2 => Self::R2,
            3 => Self::R3,
            4 => Self::R4,
            5 => Self::R5,
            6 => Self::R6,
            _ => return None,
        })
    }

    fn is_aes256(self) -> bool {
        self >= Self::R5
    }
}

/// How a class of data (strings or streams) is encrypted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    Identity,
    Rc4,
    AesV2,
    AesV3,
}

/// Standard Security Handler state parsed from an `/Encrypt` dictionary
#[derive(Debug, Clone)]
pub struct StandardSecurityHandler {
    revision: SecurityHandlerRevision,
    /// Key length in bytes
    key_length: usize,
    o: Vec<u8>,
    u: Vec<u8>,
    oe: Vec<u8>,
    ue: Vec<u8>,
    p: i32,
    encrypt_metadata: bool,
    string_method: CryptMethod,
    stream_method: CryptMethod,
}

fn invalid(message: impl Into<String>) -> PdfError {
    PdfError::InvalidEncryptionDict(message.into())
}

fn string_entry(dict: &Dictionary, key: &str) -> Result<Vec<u8>> {
    match dict.get(key) {
        Some(Object::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(other) => Err(invalid(format!("/{key} is a {}", other.type_name()))),
        None => Err(invalid(format!("missing /{key}"))),
    }
}

/// Pad or truncate password to 32 bytes
fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

/// The 20 RC4 passes with `key XOR i` used by revisions 3 and 4.
fn rc4_rounds(key: &[u8], data: &[u8], rounds: impl Iterator<Item = u8>) -> Vec<u8> {
    let mut result = data.to_vec();
    for i in rounds {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        result = rc4_crypt(&round_key, &result);
    }
    result
}

impl StandardSecurityHandler {
    /// Parse and validate an `/Encrypt` dictionary.
    pub fn from_dict(dict: &Dictionary) -> Result<Self> {
        match dict.get_name("Filter") {
            Some("Standard") => {}
            Some(other) => return Err(invalid(format!("unsupported security handler /{other}"))),
            None => return Err(invalid("missing /Filter")),
        }
        let v = dict.get_integer("V").unwrap_or(0);
        let r = dict
            .get_integer("R")
            .ok_or_else(|| invalid("missing /R"))?;
        let revision = SecurityHandlerRevision::from_integer(r)
            .ok_or_else(|| invalid(format!("unsupported revision {r}")))?;
        let p = dict
            .get_integer("P")
            .ok_or_else(|| invalid("missing /P"))?;
        // /P is a 32-bit two's complement value; some writers store it unsigned
        let p = p as i32;
        let o = string_entry(dict, "O")?;
        let u = string_entry(dict, "U")?;

        let hash_len = if revision.is_aes256() { 48 } else { 32 };
        if o.len() < hash_len || u.len() < hash_len {
            return Err(invalid(format!(
                "/O and /U must be at least {hash_len} bytes for revision {r}"
            )));
        }

        let (oe, ue) = if revision.is_aes256() {
            let oe = string_entry(dict, "OE")?;
            let ue = string_entry(dict, "UE")?;
            if oe.len() < 32 || ue.len() < 32 {
                return Err(invalid("/OE and /UE must be 32 bytes"));
            }
            (oe[..32].to_vec(), ue[..32].to_vec())
        } else {
            (Vec::new(), Vec::new())
        };

        let encrypt_metadata = dict.get_bool("EncryptMetadata").unwrap_or(true);

        let (key_length, string_method, stream_method) = match v {
            0 | 1 => (5, CryptMethod::Rc4, CryptMethod::Rc4),
            2 | 3 => (
                Self::key_length_bits(dict, 40)? / 8,
                CryptMethod::Rc4,
                CryptMethod::Rc4,
            ),
            4 => (
                Self::key_length_bits(dict, 128)? / 8,
                Self::crypt_filter(dict, "StrF")?,
                Self::crypt_filter(dict, "StmF")?,
            ),
            5 => (
                32,
                Self::crypt_filter(dict, "StrF")?,
                Self::crypt_filter(dict, "StmF")?,
            ),
            other => return Err(invalid(format!("unsupported /V {other}"))),
        };
        let key_length = if revision.is_aes256() { 32 } else { key_length };
        if revision == SecurityHandlerRevision::R2 && key_length != 5 {
            return Err(invalid("revision 2 requires a 40-bit key"));
        }

        Ok(Self {
            revision,
            key_length,
            o,
            u,
            oe,
            ue,
            p,
            encrypt_metadata,
            string_method,
            stream_method,
        })
    }

    fn key_length_bits(dict: &Dictionary, default: i64) -> Result<usize> {
        let bits = dict.get_integer("Length").unwrap_or(default);
        // A few writers give /Length in bytes
        let bits = if (5..=16).contains(&bits) { bits * 8 } else { bits };
        if !(40..=128).contains(&bits) || bits % 8 != 0 {
            return Err(invalid(format!("unsupported key length {bits}")));
        }
        Ok(bits as usize)
    }

    fn crypt_filter(dict: &Dictionary, key: &str) -> Result<CryptMethod> {
        let name = dict.get_name(key).unwrap_or("Identity");
        if name == "Identity" {
            return Ok(CryptMethod::Identity);
        }
        let filter = dict
            .get_dict("CF")
            .and_then(|cf| cf.get_dict(name))
            .ok_or_else(|| invalid(format!("/{key} names unknown crypt filter /{name}")))?;
        match filter.get_name("CFM").unwrap_or("None") {
            "None" => Ok(CryptMethod::Identity),
            "V2" => Ok(CryptMethod::Rc4),
            "AESV2" => Ok(CryptMethod::AesV2),
            "AESV3" => Ok(CryptMethod::AesV3),
            other => Err(invalid(format!("unsupported crypt filter method /{other}"))),
        }
    }

    pub fn revision(&self) -> SecurityHandlerRevision {
        self.revision
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub fn permissions(&self) -> i32 {
        self.p
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    pub fn string_method(&self) -> CryptMethod {
        self.string_method
    }

    pub fn stream_method(&self) -> CryptMethod {
        self.stream_method
    }

    /// Authenticate `password` as user password, then as owner password.
    pub fn authenticate(&self, password: &[u8], file_id: &[u8]) -> Result<EncryptionKey> {
        let key = if self.revision.is_aes256() {
            self.authenticate_aes256(password)?
        } else {
            self.authenticate_user(password, file_id)
                .or_else(|| self.authenticate_owner(password, file_id))
        };
        key.map(EncryptionKey::new)
            .ok_or(PdfError::InvalidPassword)
    }

    /// Algorithm 2: file key from a (padded) user password.
    fn compute_key(&self, padded: &[u8; 32], file_id: &[u8]) -> Vec<u8> {
        let mut context = md5::Context::new();
        context.consume(padded);
        context.consume(&self.o[..32]);
        context.consume(self.p.to_le_bytes());
        context.consume(file_id);
        if self.revision >= SecurityHandlerRevision::R4 && !self.encrypt_metadata {
            context.consume([0xFF; 4]);
        }
        let mut hash = context.finalize().0.to_vec();
        if self.revision >= SecurityHandlerRevision::R3 {
            for _ in 0..50 {
                hash = md5::compute(&hash[..self.key_length]).0.to_vec();
            }
        }
        hash.truncate(self.key_length);
        hash
    }

    /// Algorithms 4 and 5: the /U value for a file key.
    fn compute_u(&self, key: &[u8], file_id: &[u8]) -> Vec<u8> {
        if self.revision == SecurityHandlerRevision::R2 {
            return rc4_crypt(key, &PADDING);
        }
        let mut context = md5::Context::new();
        context.consume(PADDING);
        context.consume(file_id);
        let hash = context.finalize().0;
        rc4_rounds(key, &hash, 0..=19)
    }

    fn authenticate_user(&self, password: &[u8], file_id: &[u8]) -> Option<Vec<u8>> {
        let key = self.compute_key(&pad_password(password), file_id);
        let computed = self.compute_u(&key, file_id);
        // Revision 3+ only defines the first 16 bytes
        let compared = if self.revision == SecurityHandlerRevision::R2 { 32 } else { 16 };
        (computed[..compared] == self.u[..compared]).then_some(key)
    }

    /// RC4 key derived from the owner password (Algorithm 3, steps a to d).
    fn owner_key(&self, owner_password: &[u8]) -> Vec<u8> {
        let mut hash = md5::compute(pad_password(owner_password)).0.to_vec();
        if self.revision >= SecurityHandlerRevision::R3 {
            for _ in 0..50 {
                hash = md5::compute(&hash).0.to_vec();
            }
        }
        hash.truncate(self.key_length);
        hash
    }

    /// Algorithm 7: recover the user password from /O and try it.
    fn authenticate_owner(&self, password: &[u8], file_id: &[u8]) -> Option<Vec<u8>> {
        let key = self.owner_key(password);
        let user_password = if self.revision == SecurityHandlerRevision::R2 {
            rc4_crypt(&key, &self.o[..32])
        } else {
            rc4_rounds(&key, &self.o[..32], (0..=19).rev())
        };
        self.authenticate_user(&user_password, file_id)
    }

    /// Algorithm 3: the /O value for a pair of passwords.
    pub fn compute_owner_hash(&self, owner_password: &[u8], user_password: &[u8]) -> Vec<u8> {
        let owner = if owner_password.is_empty() {
            user_password
        } else {
            owner_password
        };
        let key = self.owner_key(owner);
        let padded = pad_password(user_password);
        if self.revision == SecurityHandlerRevision::R2 {
            rc4_crypt(&key, &padded)
        } else {
            rc4_rounds(&key, &padded, 0..=19)
        }
    }

    /// Algorithms 4 and 5 for a user password; pads the 16 byte result for
    /// revision 3 and later.
    pub fn compute_user_hash(&self, user_password: &[u8], file_id: &[u8]) -> Vec<u8> {
        let key = self.compute_key(&pad_password(user_password), file_id);
        let mut u = self.compute_u(&key, file_id);
        u.resize(32, 0);
        u
    }

    /// Replace /O and /U, e.g. when building a handler for fixtures.
    pub fn set_hashes(&mut self, o: Vec<u8>, u: Vec<u8>) {
        self.o = o;
        self.u = u;
    }

    fn authenticate_aes256(&self, password: &[u8]) -> Result<Option<Vec<u8>>> {
        let password = &password[..password.len().min(MAX_UTF8_PASSWORD)];
        let u = &self.u[..48];
        let o = &self.o[..48];

        if self.password_hash(password, &u[32..40], None) == u[..32] {
            let intermediate = self.password_hash(password, &u[40..48], None);
            return aes_cbc_decrypt(&intermediate, &[0; 16], &self.ue).map(Some);
        }
        if self.password_hash(password, &o[32..40], Some(u)) == o[..32] {
            let intermediate = self.password_hash(password, &o[40..48], Some(u));
            return aes_cbc_decrypt(&intermediate, &[0; 16], &self.oe).map(Some);
        }
        Ok(None)
    }

    /// Revision 5 uses plain SHA-256, revision 6 the iterated hash (Algorithm 2.B).
    fn password_hash(&self, password: &[u8], salt: &[u8], vector: Option<&[u8]>) -> Vec<u8> {
        let vector = vector.unwrap_or(&[]);
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        hasher.update(vector);
        let mut k = hasher.finalize().to_vec();
        if self.revision == SecurityHandlerRevision::R5 {
            return k;
        }

        let mut round = 0u32;
        loop {
            let block: Vec<u8> = password
                .iter()
                .chain(&k)
                .chain(vector)
                .copied()
                .collect();
            let k1 = block.repeat(64);
            // k1 is 64 copies, so its length is always a multiple of 16
            let Ok(e) = aes_cbc_encrypt(&k[..16], &k[16..32], &k1) else {
                break;
            };
            let selector = e[..16].iter().map(|&b| u32::from(b) % 3).sum::<u32>() % 3;
            k = match selector {
                0 => Sha256::digest(&e).to_vec(),
                1 => Sha384::digest(&e).to_vec(),
                _ => Sha512::digest(&e).to_vec(),
            };
            round += 1;
            let last = u32::from(e[e.len() - 1]);
            if round >= 64 && last <= round - 32 {
                break;
            }
        }
        k.truncate(32);
        k
    }

    /// Algorithm 1: per-object key. Revisions 5 and 6 use the file key directly.
    pub fn object_key(&self, key: &EncryptionKey, id: ObjectId, method: CryptMethod) -> Vec<u8> {
        if method == CryptMethod::AesV3 || self.revision.is_aes256() {
            return key.as_bytes().to_vec();
        }
        let mut context = md5::Context::new();
        context.consume(key.as_bytes());
        context.consume(&id.number().to_le_bytes()[..3]);
        context.consume(id.generation().to_le_bytes());
        if method == CryptMethod::AesV2 {
            context.consume(b"sAlT");
        }
        let hash = context.finalize().0;
        hash[..(key.len() + 5).min(16)].to_vec()
    }

    /// Decrypt a string or stream payload belonging to object `id`.
    pub fn decrypt(
        &self,
        key: &EncryptionKey,
        id: ObjectId,
        data: &[u8],
        method: CryptMethod,
    ) -> Result<Vec<u8>> {
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(rc4_crypt(&self.object_key(key, id, method), data)),
            CryptMethod::AesV2 | CryptMethod::AesV3 => {
                decrypt_payload(&self.object_key(key, id, method), data)
            }
        }
    }
}
