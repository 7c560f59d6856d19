//! ASCIIHexDecode filter (ISO 32000-1:2008 Section 7.4.2)

use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::{FilterSession, FilterType, OutputLimit, PdfFilter};
use crate::parser::lexer::{hex_value, is_whitespace};

const NAME: &str = "ASCIIHexDecode";
const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";
/// Encoder output is broken into lines of this many characters.
const LINE_WIDTH: usize = 64;

pub struct AsciiHexFilter;

impl PdfFilter for AsciiHexFilter {
    fn filter_type(&self) -> FilterType {
        FilterType::AsciiHex
    }

    fn begin_decode(
        &self,
        _params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        Ok(Box::new(HexDecoder {
            pending: None,
            finished: false,
            strict: options.strict,
            limit: OutputLimit::new(options.max_decoded_stream_size),
        }))
    }

    fn begin_encode(&self, _params: Option<&Dictionary>) -> Result<Box<dyn FilterSession>> {
        Ok(Box::new(HexEncoder { column: 0 }))
    }
}

struct HexDecoder {
    pending: Option<u8>,
    finished: bool,
    strict: bool,
    limit: OutputLimit,
}

impl FilterSession for HexDecoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        for &ch in block {
            if ch == b'>' {
                self.finished = true;
                break;
            }
            if is_whitespace(ch) {
                continue;
            }
            let Some(nibble) = hex_value(ch) else {
                if self.strict {
                    return Err(PdfError::decode(
                        NAME,
                        format!("invalid character 0x{ch:02x}"),
                    ));
                }
                tracing::warn!("ASCIIHexDecode: skipping invalid character 0x{ch:02x}");
                continue;
            };
            match self.pending.take() {
                Some(high) => {
                    self.limit.claim(1)?;
                    out.push((high << 4) | nibble);
                }
                None => self.pending = Some(nibble),
            }
        }
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if !self.finished && self.strict {
            return Err(PdfError::decode(NAME, "missing end-of-data marker '>'"));
        }
        // An odd digit count behaves as if a trailing 0 followed
        if let Some(high) = self.pending.take() {
            self.limit.claim(1)?;
            out.push(high << 4);
        }
        Ok(())
    }
}

struct HexEncoder {
    column: usize,
}

impl FilterSession for HexEncoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.reserve(block.len() * 2 + block.len() / LINE_WIDTH + 1);
        for &byte in block {
            if self.column >= LINE_WIDTH {
                out.push(b'\n');
                self.column = 0;
            }
            out.push(HEX_DIGITS[usize::from(byte >> 4)]);
            out.push(HEX_DIGITS[usize::from(byte & 0x0f)]);
            self.column += 2;
        }
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        out.push(b'>');
        Ok(())
    }
}
