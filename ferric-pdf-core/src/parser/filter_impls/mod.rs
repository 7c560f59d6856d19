//! PDF stream filter implementations
//!
//! Codecs behind [`crate::parser::filters::PdfFilter`], according to
//! ISO 32000-1:2008 Section 7.4.

pub mod ascii85;
pub mod ascii_hex;
pub mod ccitt;
pub mod dct;
#[cfg(feature = "compression")]
pub mod flate;
pub mod lzw;
pub mod predictor;
pub mod run_length;

pub use ccitt::CcittParams;
pub use dct::{parse_jpeg_info, JpegColorSpace, JpegInfo};
pub use predictor::PredictorParams;
