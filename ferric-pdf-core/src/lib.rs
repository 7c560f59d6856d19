//! # ferric-pdf
//!
//! The structural layer of PDF files, in pure Rust: cross-reference tables and
//! streams, the indirect object graph, stream filters and incremental updates.
//!
//! ## Features
//!
//! - **Lazy loading**: objects are parsed from the source only when accessed
//! - **Cross-references**: classic tables, xref streams, hybrid files and
//!   `/Prev` update chains
//! - **Object streams**: compressed objects are read transparently
//! - **Filters**: Flate (with PNG/TIFF predictors), LZW, RunLength, ASCII85,
//!   ASCIIHex; decode and encode
//! - **Encryption**: standard security handler, RC4 and AES (read side)
//! - **Writing**: full saves and incremental updates that never touch
//!   existing bytes
//! - **Hardened**: object counts, nesting depth and decoded sizes are bounded
//!   by [`ParseOptions`]
//!
//! ## Quick Start
//!
//! ```rust
//! use ferric_pdf::{Document, Object, Result, SaveOptions};
//!
//! # fn main() -> Result<()> {
//! let mut doc = Document::new();
//! let info = doc.create_object(Object::Dictionary({
//!     let mut dict = ferric_pdf::Dictionary::new();
//!     dict.set("Title", Object::string(b"Hello".to_vec()));
//!     dict
//! }));
//!
//! let mut bytes = Vec::new();
//! doc.save_to(&mut bytes, &SaveOptions::default())?;
//!
//! let mut reopened = Document::from_bytes(bytes)?;
//! assert!(reopened.catalog()?.is_type("Catalog"));
//! assert!(reopened.get_object(info)?.as_dict().is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ### Decoding streams
//!
//! ```rust
//! use ferric_pdf::filters::{decode, encode, FilterType};
//!
//! # fn main() -> ferric_pdf::Result<()> {
//! let encoded = encode(FilterType::AsciiHex, None, b"PDF")?;
//! assert_eq!(decode(FilterType::AsciiHex, None, &encoded)?, b"PDF");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod document;
pub mod encryption;
pub mod error;
pub mod objects;
pub mod parser;
pub mod writer;

pub use parser::filters;

pub use config::ParseOptions;
pub use document::Document;
pub use error::{ErrorKind, PdfError, Result};
pub use objects::{Dictionary, Object, ObjectId, PdfString, Stream};
pub use parser::{PdfReader, PdfVersion, XRefEntry, XRefIndex};
pub use writer::SaveOptions;

/// Current version of ferric-pdf
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supported PDF versions
pub mod pdf_version {
    /// Header versions accepted by the parser
    pub const SUPPORTED_VERSIONS: &[&str] =
        &["1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "1.7", "2.0"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_empty_document() {
        let doc = Document::new();
        assert_eq!(doc.version(), PdfVersion::V1_7);
        assert!(doc.object_ids().len() == 2);
    }

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert!(pdf_version::SUPPORTED_VERSIONS.contains(&"1.7"));
        assert!(pdf_version::SUPPORTED_VERSIONS.contains(&"2.0"));
    }
}
