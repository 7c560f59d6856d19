//! PDF Stream Filters
//!
//! Decoding and encoding of stream payloads according to ISO 32000-1
//! Section 7.4. Every codec implements [`PdfFilter`] and hands out a
//! [`FilterSession`] that consumes input block by block, so a payload does not
//! have to be materialized before output starts. The one-shot helpers
//! ([`decode`], [`encode`], [`decode_stream`]) run a whole session and only
//! return output when it succeeded.

use super::filter_impls::{ascii85, ascii_hex, ccitt, dct, lzw, run_length};
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object};
use bitflags::bitflags;

/// Input is fed to sessions in blocks of this size by the one-shot helpers.
const BLOCK_SIZE: usize = 64 * 1024;

/// Standard PDF filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    AsciiHex,
    Ascii85,
    Lzw,
    Flate,
    RunLength,
    CcittFax,
    Dct,
    Jbig2,
    Jpx,
    Crypt,
}

bitflags! {
    /// What a filter implementation can do with a payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilterCapabilities: u8 {
        const DECODE = 1;
        const ENCODE = 1 << 1;
        /// The payload is handed on still encoded, for an image codec to decode.
        const PASSTHROUGH = 1 << 2;
    }
}

impl FilterType {
    /// Parse a filter name, including the inline-image abbreviations.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ASCIIHexDecode" | "AHx" => Some(FilterType::AsciiHex),
            "ASCII85Decode" | "A85" => Some(FilterType::Ascii85),
            "LZWDecode" | "LZW" => Some(FilterType::Lzw),
            "FlateDecode" | "Fl" => Some(FilterType::Flate),
            "RunLengthDecode" | "RL" => Some(FilterType::RunLength),
            "CCITTFaxDecode" | "CCF" => Some(FilterType::CcittFax),
            "DCTDecode" | "DCT" => Some(FilterType::Dct),
            "JBIG2Decode" => Some(FilterType::Jbig2),
            "JPXDecode" => Some(FilterType::Jpx),
            "Crypt" => Some(FilterType::Crypt),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterType::AsciiHex => "ASCIIHexDecode",
            FilterType::Ascii85 => "ASCII85Decode",
            FilterType::Lzw => "LZWDecode",
            FilterType::Flate => "FlateDecode",
            FilterType::RunLength => "RunLengthDecode",
            FilterType::CcittFax => "CCITTFaxDecode",
            FilterType::Dct => "DCTDecode",
            FilterType::Jbig2 => "JBIG2Decode",
            FilterType::Jpx => "JPXDecode",
            FilterType::Crypt => "Crypt",
        }
    }

    pub fn capabilities(&self) -> FilterCapabilities {
        match self {
            FilterType::AsciiHex
            | FilterType::Ascii85
            | FilterType::Lzw
            | FilterType::RunLength => FilterCapabilities::DECODE | FilterCapabilities::ENCODE,
            FilterType::Flate if cfg!(feature = "compression") => {
                FilterCapabilities::DECODE | FilterCapabilities::ENCODE
            }
            FilterType::Flate => FilterCapabilities::empty(),
            FilterType::CcittFax | FilterType::Dct => FilterCapabilities::PASSTHROUGH,
            FilterType::Crypt => FilterCapabilities::DECODE,
            FilterType::Jbig2 | FilterType::Jpx => FilterCapabilities::empty(),
        }
    }
}

/// A running encode or decode over one payload.
pub trait FilterSession {
    /// Process the next input block, appending output to `out`.
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Flush buffered state once all input was fed.
    fn end(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// A stream codec.
pub trait PdfFilter: Sync {
    fn filter_type(&self) -> FilterType;

    fn capabilities(&self) -> FilterCapabilities {
        self.filter_type().capabilities()
    }

    fn begin_decode(
        &self,
        params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>>;

    fn begin_encode(&self, _params: Option<&Dictionary>) -> Result<Box<dyn FilterSession>> {
        Err(PdfError::UnsupportedFilter(format!(
            "{} cannot encode",
            self.filter_type().name()
        )))
    }
}

/// Bounds the total output of one session, checked before buffers grow.
#[derive(Debug, Clone)]
pub(crate) struct OutputLimit {
    limit: usize,
    produced: usize,
}

impl OutputLimit {
    pub(crate) fn new(limit: usize) -> Self {
        Self { limit, produced: 0 }
    }

    #[cfg(test)]
    pub(crate) fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Account for `n` more output bytes.
    pub(crate) fn claim(&mut self, n: usize) -> Result<()> {
        let total = self.produced.checked_add(n).unwrap_or(usize::MAX);
        if total > self.limit {
            return Err(PdfError::OutOfMemory {
                requested: total,
                limit: self.limit,
            });
        }
        self.produced = total;
        Ok(())
    }
}

/// Session that copies its input, used by passthrough and identity filters.
pub(crate) struct CopySession {
    limit: OutputLimit,
}

impl CopySession {
    pub(crate) fn new(limit: OutputLimit) -> Self {
        Self { limit }
    }
}

impl FilterSession for CopySession {
    fn feed(&mut self, block: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.limit.claim(block.len())?;
        out.extend_from_slice(block);
        Ok(())
    }

    fn end(&mut self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// The Crypt filter; only the Identity crypt filter is applied here, document
/// level decryption happens when objects are loaded.
struct CryptFilter;

impl PdfFilter for CryptFilter {
    fn filter_type(&self) -> FilterType {
        FilterType::Crypt
    }

    fn begin_decode(
        &self,
        params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        match params.and_then(|p| p.get_name("Name")) {
            None | Some("Identity") => Ok(Box::new(CopySession::new(OutputLimit::new(
                options.max_decoded_stream_size,
            )))),
            Some(other) => Err(PdfError::UnsupportedFilter(format!(
                "Crypt filter /{other}"
            ))),
        }
    }
}

static ASCII_HEX: ascii_hex::AsciiHexFilter = ascii_hex::AsciiHexFilter;
static ASCII_85: ascii85::Ascii85Filter = ascii85::Ascii85Filter;
static LZW: lzw::LzwFilter = lzw::LzwFilter;
static RUN_LENGTH: run_length::RunLengthFilter = run_length::RunLengthFilter;
static DCT: dct::DctFilter = dct::DctFilter;
static CCITT: ccitt::CcittFilter = ccitt::CcittFilter;
static CRYPT: CryptFilter = CryptFilter;
#[cfg(feature = "compression")]
static FLATE: super::filter_impls::flate::FlateFilter = super::filter_impls::flate::FlateFilter;

/// Look up the implementation of a filter.
pub fn filter_for(filter: FilterType) -> Result<&'static dyn PdfFilter> {
    match filter {
        FilterType::AsciiHex => Ok(&ASCII_HEX),
        FilterType::Ascii85 => Ok(&ASCII_85),
        FilterType::Lzw => Ok(&LZW),
        FilterType::RunLength => Ok(&RUN_LENGTH),
        FilterType::Dct => Ok(&DCT),
        FilterType::CcittFax => Ok(&CCITT),
        FilterType::Crypt => Ok(&CRYPT),
        #[cfg(feature = "compression")]
        FilterType::Flate => Ok(&FLATE),
        #[cfg(not(feature = "compression"))]
        FilterType::Flate => Err(PdfError::UnsupportedFilter(
            "FlateDecode requires the 'compression' feature".to_string(),
        )),
        FilterType::Jbig2 | FilterType::Jpx => {
            Err(PdfError::UnsupportedFilter(filter.name().to_string()))
        }
    }
}

fn run_session(mut session: Box<dyn FilterSession>, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for block in data.chunks(BLOCK_SIZE) {
        session.feed(block, &mut out)?;
    }
    session.end(&mut out)?;
    Ok(out)
}

/// Decode `data` with one filter using default limits.
pub fn decode(filter: FilterType, params: Option<&Dictionary>, data: &[u8]) -> Result<Vec<u8>> {
    decode_with_options(filter, params, data, &ParseOptions::default())
}

/// Decode `data` with one filter.
pub fn decode_with_options(
    filter: FilterType,
    params: Option<&Dictionary>,
    data: &[u8],
    options: &ParseOptions,
) -> Result<Vec<u8>> {
    let session = filter_for(filter)?.begin_decode(params, options)?;
    run_session(session, data)
}

/// Encode `data` with one filter.
pub fn encode(filter: FilterType, params: Option<&Dictionary>, data: &[u8]) -> Result<Vec<u8>> {
    let session = filter_for(filter)?.begin_encode(params)?;
    run_session(session, data)
}

/// The `/Filter` chain of a stream dictionary with matching `/DecodeParms`.
pub fn stream_filters(dict: &Dictionary) -> Result<Vec<(FilterType, Option<&Dictionary>)>> {
    let names: Vec<&Object> = match dict.get("Filter") {
        None | Some(Object::Null) => return Ok(Vec::new()),
        Some(Object::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    };

    let params: Vec<Option<&Dictionary>> = match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => vec![Some(d)],
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| match item {
                Object::Dictionary(d) => Some(d),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    names
        .into_iter()
        .enumerate()
        .map(|(i, obj)| {
            let name = obj
                .as_name()
                .ok_or_else(|| PdfError::type_mismatch("filter name", obj))?;
            let filter = FilterType::from_name(name)
                .ok_or_else(|| PdfError::UnsupportedFilter(name.to_string()))?;
            Ok((filter, params.get(i).copied().flatten()))
        })
        .collect()
}

/// Decode a stream payload through its whole `/Filter` chain.
///
/// A passthrough filter (DCT, CCITT) must be last; its output is still encoded.
pub fn decode_stream(dict: &Dictionary, data: &[u8], options: &ParseOptions) -> Result<Vec<u8>> {
    let chain = stream_filters(dict)?;
    if chain.is_empty() {
        return Ok(data.to_vec());
    }

    if let Some((filter, _)) = chain[..chain.len() - 1]
        .iter()
        .find(|(f, _)| f.capabilities().contains(FilterCapabilities::PASSTHROUGH))
    {
        return Err(PdfError::UnsupportedFilter(format!(
            "{} must be the last filter in a chain",
            filter.name()
        )));
    }

    let mut current: Option<Vec<u8>> = None;
    for (filter, params) in chain {
        let input = current.as_deref().unwrap_or(data);
        current = Some(decode_with_options(filter, params, input, options)?);
    }
    Ok(current.unwrap_or_default())
}

/// Encode raw bytes so that `decode_stream(dict, ..)` yields them back.
pub fn encode_stream(dict: &Dictionary, data: &[u8]) -> Result<Vec<u8>> {
    let chain = stream_filters(dict)?;
    let mut current = data.to_vec();
    for (filter, params) in chain.into_iter().rev() {
        current = encode(filter, params, &current)?;
    }
    Ok(current)
}
