//! Predictor functions for FlateDecode and LZWDecode
//!
//! ISO 32000-1:2008 Section 7.4.4.4. TIFF predictor 2 stores each sample as
//! the difference to the same component of the pixel on its left. PNG
//! predictors (10-15) prefix each row with a tag selecting one of the five
//! PNG row filters.
//!
//! The decoder keeps two row buffers: the row being reconstructed and the
//! previous reconstructed row. Paeth needs the byte above and the byte above
//! and to the left, and both still come from the previous row while the
//! current one is rewritten in place.

use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::FilterSession;

const NAME: &str = "Predictor";
const MAX_COLORS: i64 = 32;

/// Parsed `/DecodeParms` predictor entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: u8,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

fn param(dict: &Dictionary, key: &str, default: i64) -> Result<i64> {
    match dict.get(key) {
        None => Ok(default),
        Some(obj) => obj
            .as_integer()
            .ok_or_else(|| PdfError::type_mismatch("integer", obj)),
    }
}

impl PredictorParams {
    /// Read predictor parameters. Returns `None` when no predictor applies.
    pub fn from_dict(params: Option<&Dictionary>, options: &ParseOptions) -> Result<Option<Self>> {
        let Some(dict) = params else {
            return Ok(None);
        };

        let predictor = param(dict, "Predictor", 1)?;
        match predictor {
            1 => return Ok(None),
            2 | 10..=15 => {}
            other if options.strict => {
                return Err(PdfError::ValueOutOfRange(format!("/Predictor {other}")));
            }
            other => {
                tracing::warn!("Ignoring unknown /Predictor {other}");
                return Ok(None);
            }
        }

        let colors = param(dict, "Colors", 1)?;
        if !(1..=MAX_COLORS).contains(&colors) {
            return Err(PdfError::ValueOutOfRange(format!("/Colors {colors}")));
        }
        let bits_per_component = param(dict, "BitsPerComponent", 8)?;
        if ![1, 2, 4, 8, 16].contains(&bits_per_component) {
            return Err(PdfError::ValueOutOfRange(format!(
                "/BitsPerComponent {bits_per_component}"
            )));
        }
        let columns = param(dict, "Columns", 1)?;
        if columns < 1 {
            return Err(PdfError::ValueOutOfRange(format!("/Columns {columns}")));
        }

        let params = Self {
            predictor: predictor as u8,
            colors: colors as usize,
            bits_per_component: bits_per_component as usize,
            columns: usize::try_from(columns)
                .map_err(|_| PdfError::ValueOutOfRange(format!("/Columns {columns}")))?,
        };
        let row = params.row_bytes()?;
        if row > options.max_decoded_stream_size {
            return Err(PdfError::ValueOutOfRange(format!(
                "predictor row of {row} bytes exceeds the decode limit"
            )));
        }
        Ok(Some(params))
    }

    pub fn is_png(&self) -> bool {
        self.predictor >= 10
    }

    /// Bytes per row, excluding the PNG tag byte.
    pub fn row_bytes(&self) -> Result<usize> {
        self.colors
            .checked_mul(self.bits_per_component)
            .and_then(|bits| bits.checked_mul(self.columns))
            .and_then(|bits| bits.checked_add(7))
            .map(|bits| bits / 8)
            .ok_or_else(|| PdfError::ValueOutOfRange("predictor row size overflows".to_string()))
    }

    /// Bytes per pixel as used by the PNG filters (at least one).
    pub fn pixel_bytes(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

fn paeth(left: u8, up: u8, up_left: u8) -> u8 {
    let p = i16::from(left) + i16::from(up) - i16::from(up_left);
    let pa = (p - i16::from(left)).abs();
    let pb = (p - i16::from(up)).abs();
    let pc = (p - i16::from(up_left)).abs();
    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        up
    } else {
        up_left
    }
}

/// The PNG prediction for byte `i` given the raw row being produced and the
/// previous raw row.
fn png_prediction(tag: u8, row: &[u8], prev: &[u8], i: usize, bpp: usize) -> u8 {
    let left = if i >= bpp { row[i - bpp] } else { 0 };
    let up = prev[i];
    let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
    match tag {
        1 => left,
        2 => up,
        3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
        4 => paeth(left, up, up_left),
        _ => 0,
    }
}

fn unfilter_png(tag: u8, row: &mut [u8], prev: &[u8], bpp: usize) {
    if tag == 0 {
        return;
    }
    for i in 0..row.len() {
        let predicted = png_prediction(tag, row, prev, i, bpp);
        row[i] = row[i].wrapping_add(predicted);
    }
}

fn filter_png(tag: u8, row: &[u8], prev: &[u8], bpp: usize, out: &mut Vec<u8>) {
    out.push(tag);
    for i in 0..row.len() {
        out.push(row[i].wrapping_sub(png_prediction(tag, row, prev, i, bpp)));
    }
}

fn sample(row: &[u8], index: usize, bpc: usize) -> u16 {
    match bpc {
        8 => u16::from(row[index]),
        16 => u16::from_be_bytes([row[2 * index], row[2 * index + 1]]),
        _ => {
            let bit = index * bpc;
            let shift = 8 - bpc - bit % 8;
            u16::from((row[bit / 8] >> shift) & ((1u8 << bpc) - 1))
        }
    }
}

fn set_sample(row: &mut [u8], index: usize, bpc: usize, value: u16) {
    match bpc {
        8 => row[index] = value as u8,
        16 => row[2 * index..2 * index + 2].copy_from_slice(&value.to_be_bytes()),
        _ => {
            let bit = index * bpc;
            let shift = 8 - bpc - bit % 8;
            let mask = ((1u8 << bpc) - 1) << shift;
            row[bit / 8] = (row[bit / 8] & !mask) | (((value as u8) << shift) & mask);
        }
    }
}

/// Number of whole samples available in a row of `len` bytes.
fn samples_in(params: &PredictorParams, len: usize) -> usize {
    let full = params.colors * params.columns;
    full.min(len * 8 / params.bits_per_component)
}

fn tiff_mask(bpc: usize) -> u32 {
    (1u32 << bpc) - 1
}

fn tiff_decode_row(params: &PredictorParams, row: &mut [u8]) {
    let bpc = params.bits_per_component;
    let mask = tiff_mask(bpc);
    for i in params.colors..samples_in(params, row.len()) {
        let value = (u32::from(sample(row, i, bpc)) + u32::from(sample(row, i - params.colors, bpc)))
            & mask;
        set_sample(row, i, bpc, value as u16);
    }
}

fn tiff_encode_row(params: &PredictorParams, row: &mut [u8]) {
    let bpc = params.bits_per_component;
    let mask = tiff_mask(bpc);
    // Right to left, so the left neighbour still holds its original value
    for i in (params.colors..samples_in(params, row.len())).rev() {
        let value = u32::from(sample(row, i, bpc))
            .wrapping_sub(u32::from(sample(row, i - params.colors, bpc)))
            & mask;
        set_sample(row, i, bpc, value as u16);
    }
}

/// Row-oriented predictor reconstruction over a byte stream.
struct RowDecoder {
    params: PredictorParams,
    stride: usize,
    bpp: usize,
    cur: Vec<u8>,
    prev: Vec<u8>,
    strict: bool,
}

impl RowDecoder {
    fn new(params: PredictorParams, strict: bool) -> Result<Self> {
        let row = params.row_bytes()?;
        let stride = if params.is_png() { row + 1 } else { row };
        Ok(Self {
            params,
            stride,
            bpp: params.pixel_bytes(),
            cur: Vec::with_capacity(stride),
            prev: vec![0; row],
            strict,
        })
    }

    fn push(&mut self, mut data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        while !data.is_empty() {
            let take = (self.stride - self.cur.len()).min(data.len());
            self.cur.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.cur.len() == self.stride {
                self.flush_row(out)?;
            }
        }
        Ok(())
    }

    fn flush_row(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.params.is_png() {
            let tag = self.cur[0];
            let tag = if tag > 4 {
                if self.strict {
                    return Err(PdfError::decode(NAME, format!("invalid PNG row tag {tag}")));
                }
                tracing::warn!("Invalid PNG predictor row tag {tag}, treating row as unfiltered");
                0
            } else {
                tag
            };
            let row = &mut self.cur[1..];
            unfilter_png(tag, row, &self.prev, self.bpp);
            out.extend_from_slice(row);
            self.prev[..row.len()].copy_from_slice(row);
        } else {
            tiff_decode_row(&self.params, &mut self.cur);
            out.extend_from_slice(&self.cur);
        }
        self.cur.clear();
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.cur.is_empty() {
            return Ok(());
        }
        if self.strict {
            return Err(PdfError::decode(
                NAME,
                format!(
                    "incomplete final row ({} of {} bytes)",
                    self.cur.len(),
                    self.stride
                ),
            ));
        }
        tracing::warn!(
            "Predictor: incomplete final row ({} of {} bytes)",
            self.cur.len(),
            self.stride
        );
        if self.params.is_png() && self.cur.len() == 1 {
            self.cur.clear();
            return Ok(());
        }
        self.flush_row(out)
    }
}

struct PredictorDecoder {
    inner: Box<dyn FilterSession>,
    rows: RowDecoder,
    scratch: Vec<u8>,
}

impl FilterSession for PredictorDecoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.scratch.clear();
        self.inner.feed(block, &mut self.scratch)?;
        self.rows.push(&self.scratch, out)
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.scratch.clear();
        self.inner.end(&mut self.scratch)?;
        self.rows.push(&self.scratch, out)?;
        self.rows.finish(out)
    }
}

struct PredictorEncoder {
    inner: Box<dyn FilterSession>,
    params: PredictorParams,
    row_len: usize,
    pending: Vec<u8>,
    prev: Vec<u8>,
    scratch: Vec<u8>,
}

impl PredictorEncoder {
    fn encode_row(&mut self, row: &[u8]) {
        if self.params.is_png() {
            let bpp = self.params.pixel_bytes();
            let tag = if self.params.predictor == 15 {
                best_png_tag(row, &self.prev, bpp)
            } else {
                self.params.predictor - 10
            };
            filter_png(tag, row, &self.prev, bpp, &mut self.scratch);
            self.prev.copy_from_slice(row);
        } else {
            let start = self.scratch.len();
            self.scratch.extend_from_slice(row);
            tiff_encode_row(&self.params, &mut self.scratch[start..]);
        }
    }
}

/// Row filter with the smallest sum of absolute residuals.
fn best_png_tag(row: &[u8], prev: &[u8], bpp: usize) -> u8 {
    (0..=4u8)
        .min_by_key(|&tag| {
            (0..row.len())
                .map(|i| {
                    let residual = row[i].wrapping_sub(png_prediction(tag, row, prev, i, bpp));
                    u64::from((residual as i8).unsigned_abs())
                })
                .sum::<u64>()
        })
        .unwrap_or(0)
}

impl FilterSession for PredictorEncoder {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.pending.extend_from_slice(block);
        self.scratch.clear();
        let whole = self.pending.len() / self.row_len * self.row_len;
        let rows: Vec<u8> = self.pending.drain(..whole).collect();
        for row in rows.chunks(self.row_len) {
            self.encode_row(row);
        }
        self.inner.feed(&self.scratch, out)
    }

    fn end(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if !self.pending.is_empty() {
            return Err(PdfError::ValueOutOfRange(format!(
                "{} trailing bytes do not fill a predictor row of {} bytes",
                self.pending.len(),
                self.row_len
            )));
        }
        self.inner.end(out)
    }
}

/// Wrap a decoding session so its output is run through the predictor.
pub(crate) fn wrap_decoder(
    inner: Box<dyn FilterSession>,
    params: Option<&Dictionary>,
    options: &ParseOptions,
) -> Result<Box<dyn FilterSession>> {
    match PredictorParams::from_dict(params, options)? {
        None => Ok(inner),
        Some(params) => Ok(Box::new(PredictorDecoder {
            inner,
            rows: RowDecoder::new(params, options.strict)?,
            scratch: Vec::new(),
        })),
    }
}

/// Wrap an encoding session so its input is run through the predictor first.
pub(crate) fn wrap_encoder(
    inner: Box<dyn FilterSession>,
    params: Option<&Dictionary>,
) -> Result<Box<dyn FilterSession>> {
    let options = ParseOptions::strict();
    match PredictorParams::from_dict(params, &options)? {
        None => Ok(inner),
        Some(params) => {
            let row_len = params.row_bytes()?;
            Ok(Box::new(PredictorEncoder {
                inner,
                params,
                row_len,
                pending: Vec::new(),
                prev: vec![0; row_len],
                scratch: Vec::new(),
            }))
        }
    }
}

/// Undo a predictor on already decompressed data.
pub fn decode_predicted(
    params: &PredictorParams,
    data: &[u8],
    options: &ParseOptions,
) -> Result<Vec<u8>> {
    let mut rows = RowDecoder::new(*params, options.strict)?;
    let mut out = Vec::with_capacity(data.len());
    rows.push(data, &mut out)?;
    rows.finish(&mut out)?;
    Ok(out)
}
