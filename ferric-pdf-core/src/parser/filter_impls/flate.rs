//! FlateDecode filter (ISO 32000-1:2008 Section 7.4.4)
//!
//! zlib streams are decoded incrementally with `flate2`. Data without a zlib
//! header is decoded as raw deflate, which some producers emit.

use super::predictor;
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::{FilterSession, FilterType, OutputLimit, PdfFilter};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Write;

const NAME: &str = "FlateDecode";
const CHUNK: usize = 32 * 1024;

pub struct FlateFilter;

impl PdfFilter for FlateFilter {
    fn filter_type(&self) -> FilterType {
        FilterType::Flate
    }

    fn begin_decode(
        &self,
        params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        let decoder = FlateDecoder {
            header: Vec::with_capacity(2),
            inflater: None,
            done: false,
            strict: options.strict,
            limit: OutputLimit::new(options.max_decoded_stream_size),
        };
        predictor::wrap_decoder(Box::new(decoder), params, options)
    }

    fn begin_encode(&self, params: Option<&Dictionary>) -> Result<Box<dyn FilterSession>> {
        let encoder = FlateEncoder {
            encoder: Some(ZlibEncoder::new(Vec::new(), Compression::default())),
        };
        predictor::wrap_encoder(Box::new(encoder), params)
    }
}

/// CMF/FLG check from RFC 1950.
fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0f == 8 && cmf >> 4 <= 7 && ((u16::from(cmf) << 8) | u16::from(flg)) % 31 == 0
}

struct FlateDecoder {
    /// First bytes, held until the stream flavour is known.
    header: Vec<u8>,
    inflater: Option<Decompress>,
    done: bool,
    strict: bool,
    limit: OutputLimit,
}

impl FlateDecoder {
    fn inflate(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let Some(inflater) = self.inflater.as_mut() else {
            return Ok(());
        };
        let mut buf = vec![0u8; CHUNK];
        while !self.done {
            let in_before = inflater.total_in();
            let out_before = inflater.total_out();
            let status = inflater.decompress(input, &mut buf, FlushDecompress::None);
            let consumed = (inflater.total_in() - in_before) as usize;
            let produced = (inflater.total_out() - out_before) as usize;

            self.limit.claim(produced)?;
            out.extend_from_slice(&buf[..produced]);
            input = &input[consumed..];

            match status {
                Ok(Status::StreamEnd) => self.done = true,
                Ok(_) => {
                    if consumed == 0 && produced == 0 {
                        break;
                    }
                    if input.is_empty() && produced < buf.len() {
                        break;
                    }
                }
                Err(e) if self.strict => {
                    return Err(PdfError::decode(NAME, e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(
                        "FlateDecode: corrupt data after {} bytes, keeping partial output: {e}",
                        inflater.total_out()
                    );
                    self.done = true;
                }
            }
        }
        Ok(())
    }
}

impl FilterSession for FlateDecoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if self.inflater.is_some() {
            return self.inflate(block, out);
        }

        let needed = 2 - self.header.len();
        let take = needed.min(block.len());
        self.header.extend_from_slice(&block[..take]);
        if self.header.len() < 2 {
            return Ok(());
        }
        let zlib = is_zlib_header(self.header[0], self.header[1]);
        if !zlib {
            tracing::debug!("FlateDecode: no zlib header, decoding raw deflate");
        }
        self.inflater = Some(Decompress::new(zlib));
        let header = std::mem::take(&mut self.header);
        self.inflate(&header, out)?;
        self.inflate(&block[take..], out)
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.inflater.is_none() && !self.header.is_empty() {
            // A single byte cannot carry a deflate stream
            self.inflater = Some(Decompress::new(false));
            let header = std::mem::take(&mut self.header);
            self.inflate(&header, out)?;
        }
        if self.done || self.inflater.is_none() {
            return Ok(());
        }
        if self.strict {
            return Err(PdfError::decode(NAME, "unexpected end of compressed data"));
        }
        tracing::warn!("FlateDecode: compressed data is truncated, keeping partial output");
        Ok(())
    }
}

struct FlateEncoder {
    encoder: Option<ZlibEncoder<Vec<u8>>>,
}

impl FilterSession for FlateEncoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.write_all(block)?;
            out.append(encoder.get_mut());
        }
        Ok(())
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let mut rest = encoder.finish()?;
            out.append(&mut rest);
        }
        Ok(())
    }
}
