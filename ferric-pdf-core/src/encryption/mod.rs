//! PDF encryption support according to ISO 32000-1 Chapter 7.6
//!
//! Read side of the Standard security handler: RC4 and AES-128 (revisions
//! 2 to 4) and AES-256 (revisions 5 and 6).

mod aes;
mod rc4;
mod standard_security;

pub use aes::{aes_cbc_decrypt, aes_cbc_encrypt, decrypt_payload, pad, unpad};
pub use rc4::{rc4_crypt, Rc4, Rc4Key};
pub use standard_security::{
    CryptMethod, EncryptionKey, SecurityHandlerRevision, StandardSecurityHandler,
};
