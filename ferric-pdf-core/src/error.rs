use crate::objects::ObjectId;
use thiserror::Error;

/// Coarse classification of a [`PdfError`].
///
/// Callers that only need to branch on the failure class (retry with a
/// password, fall back to recovery, report a broken file) match on this
/// instead of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoXRef,
    InvalidXRef,
    InvalidXRefStream,
    InvalidXRefType,
    ValueOutOfRange,
    OutOfMemory,
    NoObject,
    InvalidDataType,
    UnsupportedFilter,
    InvalidEncryptionDict,
    BrokenFile,
    UnexpectedEOF,
    Io,
    Syntax,
    StreamDecode,
    InvalidPassword,
    Unsupported,
}

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No cross-reference section found: {message}")]
    NoXRef { offset: Option<u64>, message: String },

    #[error("Invalid xref section at offset {offset}: {message}")]
    InvalidXRef { offset: u64, message: String },

    #[error("Invalid xref stream at offset {offset}: {message}")]
    InvalidXRefStream { offset: u64, message: String },

    #[error("Invalid xref entry type {entry_type} for object {object}")]
    InvalidXRefType { object: u32, entry_type: u64 },

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("Refusing to allocate {requested} bytes (limit {limit})")]
    OutOfMemory { requested: usize, limit: usize },

    #[error("Object {0} not found")]
    NoObject(ObjectId),

    #[error("Invalid data type: expected {expected}, found {found}")]
    InvalidDataType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Invalid encryption dictionary: {0}")]
    InvalidEncryptionDict(String),

    #[error("Broken file at offset {offset}: {message}")]
    BrokenFile { offset: u64, message: String },

    #[error("Unexpected end of file at offset {0}")]
    UnexpectedEof(u64),

    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: u64, message: String },

    #[error("{filter} error: {message}")]
    StreamDecode {
        filter: &'static str,
        message: String,
    },

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, PdfError>;

impl PdfError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PdfError::Io(_) => ErrorKind::Io,
            PdfError::NoXRef { .. } => ErrorKind::NoXRef,
            PdfError::InvalidXRef { .. } => ErrorKind::InvalidXRef,
            PdfError::InvalidXRefStream { .. } => ErrorKind::InvalidXRefStream,
            PdfError::InvalidXRefType { .. } => ErrorKind::InvalidXRefType,
            PdfError::ValueOutOfRange(_) => ErrorKind::ValueOutOfRange,
            PdfError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            PdfError::NoObject(_) => ErrorKind::NoObject,
            PdfError::InvalidDataType { .. } => ErrorKind::InvalidDataType,
            PdfError::UnsupportedFilter(_) => ErrorKind::UnsupportedFilter,
            PdfError::InvalidEncryptionDict(_) => ErrorKind::InvalidEncryptionDict,
            PdfError::BrokenFile { .. } => ErrorKind::BrokenFile,
            PdfError::UnexpectedEof(_) => ErrorKind::UnexpectedEOF,
            PdfError::Syntax { .. } => ErrorKind::Syntax,
            PdfError::StreamDecode { .. } => ErrorKind::StreamDecode,
            PdfError::InvalidPassword => ErrorKind::InvalidPassword,
            PdfError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Byte offset in the source file the error refers to, when known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            PdfError::NoXRef { offset, .. } => *offset,
            PdfError::InvalidXRef { offset, .. }
            | PdfError::InvalidXRefStream { offset, .. }
            | PdfError::BrokenFile { offset, .. }
            | PdfError::Syntax { offset, .. }
            | PdfError::UnexpectedEof(offset) => Some(*offset),
            _ => None,
        }
    }

    pub(crate) fn syntax(offset: u64, message: impl Into<String>) -> Self {
        PdfError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn broken(offset: u64, message: impl Into<String>) -> Self {
        PdfError::BrokenFile {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_xref(offset: u64, message: impl Into<String>) -> Self {
        PdfError::InvalidXRef {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_xref_stream(offset: u64, message: impl Into<String>) -> Self {
        PdfError::InvalidXRefStream {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn decode(filter: &'static str, message: impl Into<String>) -> Self {
        PdfError::StreamDecode {
            filter,
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(expected: &'static str, found: &crate::objects::Object) -> Self {
        PdfError::InvalidDataType {
            expected,
            found: found.type_name(),
        }
    }
}
