//! AES-CBC helpers for the AESV2 and AESV3 crypt filters

use crate::error::{PdfError, Result};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};

type Aes128CbcDec = Decryptor<aes::Aes128>;
type Aes256CbcDec = Decryptor<aes::Aes256>;
type Aes128CbcEnc = Encryptor<aes::Aes128>;
type Aes256CbcEnc = Encryptor<aes::Aes256>;

const NAME: &str = "AES";
pub const BLOCK: usize = 16;

fn check_block_input(iv: &[u8], data: &[u8]) -> Result<()> {
    if iv.len() != BLOCK {
        return Err(PdfError::decode(NAME, format!("IV must be 16 bytes, got {}", iv.len())));
    }
    if data.len() % BLOCK != 0 {
        return Err(PdfError::decode(
            NAME,
            format!("{} bytes is not a whole number of blocks", data.len()),
        ));
    }
    Ok(())
}

/// Decrypt whole blocks with AES-128 or AES-256 in CBC mode, no padding removed.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_block_input(iv, data)?;
    let mut buf = data.to_vec();
    let result = match key.len() {
        16 => Aes128CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map(|_| ()),
        32 => Aes256CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map(|_| ()),
        n => {
            return Err(PdfError::InvalidEncryptionDict(format!(
                "AES key must be 16 or 32 bytes, got {n}"
            )))
        }
    };
    result.map_err(|_| PdfError::decode(NAME, "block decryption failed"))?;
    Ok(buf)
}

/// Encrypt whole blocks with AES-128 or AES-256 in CBC mode, no padding added.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_block_input(iv, data)?;
    let mut buf = data.to_vec();
    let len = data.len();
    let result = match key.len() {
        16 => Aes128CbcEnc::new(key.into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map(|_| ()),
        32 => Aes256CbcEnc::new(key.into(), iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map(|_| ()),
        n => {
            return Err(PdfError::InvalidEncryptionDict(format!(
                "AES key must be 16 or 32 bytes, got {n}"
            )))
        }
    };
    result.map_err(|_| PdfError::decode(NAME, "block encryption failed"))?;
    Ok(buf)
}

/// Strip PKCS#7 padding; data with invalid padding is returned unchanged.
pub fn unpad(data: &[u8]) -> &[u8] {
    let Some(&last) = data.last() else {
        return data;
    };
    let pad = usize::from(last);
    if pad == 0 || pad > BLOCK || pad > data.len() {
        return data;
    }
    let start = data.len() - pad;
    if data[start..].iter().all(|&b| b == last) {
        &data[..start]
    } else {
        data
    }
}

/// Append PKCS#7 padding.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK - data.len() % BLOCK;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Decrypt a string or stream payload: a 16 byte IV followed by padded
/// ciphertext.
pub fn decrypt_payload(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < BLOCK {
        return Err(PdfError::decode(NAME, "encrypted data shorter than the IV"));
    }
    let (iv, ciphertext) = data.split_at(BLOCK);
    let plain = aes_cbc_decrypt(key, iv, ciphertext)?;
    Ok(unpad(&plain).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_nist_cbc_aes128() {
        // SP 800-38A F.2.1, first block
        let key = hex("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex("000102030405060708090a0b0c0d0e0f");
        let plain = hex("6bc1bee22e409f96e93d7e117393172a");
        let cipher = hex("7649abac8119b246cee98e9b12e9197d");

        assert_eq!(aes_cbc_encrypt(&key, &iv, &plain).unwrap(), cipher);
        assert_eq!(aes_cbc_decrypt(&key, &iv, &cipher).unwrap(), plain);
    }

    #[test]
    fn test_aes256_roundtrip() {
        let key = [7u8; 32];
        let iv = [1u8; 16];
        let data = pad(b"thirty-two byte key protects this");
        let encrypted = aes_cbc_encrypt(&key, &iv, &data).unwrap();
        assert_ne!(encrypted, data);
        let decrypted = aes_cbc_decrypt(&key, &iv, &encrypted).unwrap();
        assert_eq!(unpad(&decrypted), b"thirty-two byte key protects this");
    }

    #[test]
    fn test_decrypt_payload() {
        let key = [3u8; 16];
        let iv = [9u8; 16];
        let mut payload = iv.to_vec();
        payload.extend(aes_cbc_encrypt(&key, &iv, &pad(b"hello")).unwrap());
        assert_eq!(decrypt_payload(&key, &payload).unwrap(), b"hello");
        assert!(decrypt_payload(&key, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_bad_input() {
        let err = aes_cbc_decrypt(&[0; 16], &[0; 16], &[0; 15]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
        let err = aes_cbc_decrypt(&[0; 10], &[0; 16], &[0; 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncryptionDict);
        let err = decrypt_payload(&[0; 16], &[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamDecode);
    }

    #[test]
    fn test_unpad_invalid_kept() {
        assert_eq!(unpad(&[1, 2, 3, 0]), &[1, 2, 3, 0]);
        assert_eq!(unpad(&[1, 2, 2, 3]), &[1, 2, 2, 3]);
        assert_eq!(unpad(&[5, 2, 2]), &[5]);
        assert_eq!(pad(&[]).len(), 16);
    }
}
