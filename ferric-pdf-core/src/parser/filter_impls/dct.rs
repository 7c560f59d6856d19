//! DCTDecode (JPEG) bridge
//!
//! JPEG payloads are handed on still encoded; image collaborators do the
//! actual decoding. The session only checks the SOI marker, and
//! [`parse_jpeg_info`] reads frame metadata for callers that need it.

use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::{FilterSession, FilterType, OutputLimit, PdfFilter};

const NAME: &str = "DCTDecode";
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP14: u8 = 0xEE;

/// Frame information read from a JPEG header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegInfo {
    pub width: u16,
    pub height: u16,
    pub components: u8,
    pub bits_per_component: u8,
    pub color_space: JpegColorSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegColorSpace {
    Gray,
    RGB,
    YCbCr,
    CMYK,
}

pub struct DctFilter;

impl PdfFilter for DctFilter {
    fn filter_type(&self) -> FilterType {
        FilterType::Dct
    }

    fn begin_decode(
        &self,
        _params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        Ok(Box::new(JpegPassthrough {
            seen: 0,
            limit: OutputLimit::new(options.max_decoded_stream_size),
        }))
    }
}

struct JpegPassthrough {
    /// How many SOI bytes were checked so far.
    seen: usize,
    limit: OutputLimit,
}

impl FilterSession for JpegPassthrough {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        for (&expected, &actual) in SOI.iter().skip(self.seen).zip(block) {
            if expected != actual {
                return Err(PdfError::decode(NAME, "missing JPEG SOI marker"));
            }
            self.seen += 1;
        }
        self.limit.claim(block.len())?;
        out.extend_from_slice(block);
        Ok(())
    }

    fn end(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        if self.seen < SOI.len() {
            return Err(PdfError::decode(NAME, "JPEG data too short"));
        }
        Ok(())
    }
}

fn is_sof(marker: u8) -> bool {
    // SOF0..SOF15 except DHT (C4), JPG (C8) and DAC (CC)
    (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// Read the frame header of a JPEG stream.
pub fn parse_jpeg_info(data: &[u8]) -> Result<JpegInfo> {
    if !data.starts_with(&SOI) {
        return Err(PdfError::decode(NAME, "missing JPEG SOI marker"));
    }

    let mut pos = 2;
    let mut adobe_transform = None;
    loop {
        // Markers may be preceded by any number of fill bytes
        while data.get(pos) == Some(&0xFF) && data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let (Some(&0xFF), Some(&marker)) = (data.get(pos), data.get(pos + 1)) else {
            return Err(PdfError::decode(NAME, "no frame header found"));
        };
        pos += 2;

        if marker == EOI || marker == SOS {
            return Err(PdfError::decode(NAME, "no frame header before scan data"));
        }
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            continue;
        }

        let length = match data.get(pos..pos + 2) {
            Some(bytes) => usize::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            None => return Err(PdfError::decode(NAME, "segment length missing")),
        };
        let segment = length
            .checked_sub(2)
            .and_then(|body| data.get(pos + 2..pos + 2 + body))
            .ok_or_else(|| PdfError::decode(NAME, "segment extends beyond data"))?;

        if marker == APP14 && segment.starts_with(b"Adobe") && segment.len() >= 12 {
            adobe_transform = Some(segment[11]);
        } else if is_sof(marker) {
            if segment.len() < 6 {
                return Err(PdfError::decode(NAME, "frame header too short"));
            }
            let components = segment[5];
            let color_space = match components {
                1 => JpegColorSpace::Gray,
                3 if adobe_transform == Some(0) => JpegColorSpace::RGB,
                3 => JpegColorSpace::YCbCr,
                4 => JpegColorSpace::CMYK,
                n => {
                    return Err(PdfError::decode(
                        NAME,
                        format!("unsupported component count {n}"),
                    ))
                }
            };
            return Ok(JpegInfo {
                bits_per_component: segment[0],
                height: u16::from_be_bytes([segment[1], segment[2]]),
                width: u16::from_be_bytes([segment[3], segment[4]]),
                components,
                color_space,
            });
        }
        pos += length;
    }
}
