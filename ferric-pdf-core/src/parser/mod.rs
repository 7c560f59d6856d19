//! PDF Parser Module
//!
//! This module reads the structural layer of PDF files according to
//! ISO 32000-1 (PDF 1.7) and ISO 32000-2 (PDF 2.0): tokens, objects,
//! cross-reference tables and streams, object streams and stream filters.

pub mod encryption_handler;
pub mod filter_impls;
pub mod filters;
pub mod header;
pub mod lexer;
pub mod object_stream;
pub mod objects;
pub mod reader;
mod recovery;
pub mod stack_safe;
pub mod trailer;
pub mod xref;
pub mod xref_stream;
pub mod xref_types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use self::encryption_handler::EncryptionHandler;
pub use self::filters::{FilterCapabilities, FilterType, PdfFilter};
pub use self::header::{PdfHeader, PdfVersion};
pub use self::lexer::{Lexer, Token};
pub use self::object_stream::ObjectStream;
pub use self::reader::PdfReader;
pub use self::trailer::PdfTrailer;
pub use self::xref_types::{SectionKind, XRefEntry, XRefIndex, XRefSection};
