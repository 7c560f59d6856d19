//! CCITTFaxDecode bridge
//!
//! Fax data is handed on still encoded. Its `/DecodeParms` are parsed into
//! [`CcittParams`] so image collaborators get typed, validated parameters.

use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::Dictionary;
use crate::parser::filters::{CopySession, FilterSession, FilterType, OutputLimit, PdfFilter};

/// Standard fax width in pixels.
const DEFAULT_COLUMNS: u32 = 1728;

/// Coding scheme selected by `/K`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcittEncoding {
    /// K < 0: pure two-dimensional (Group 4)
    Group4,
    /// K = 0: one-dimensional (Group 3)
    Group3OneDimensional,
    /// K > 0: mixed, at most K - 1 two-dimensional lines after each 1-D line
    Group3Mixed(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcittParams {
    pub encoding: CcittEncoding,
    pub columns: u32,
    /// 0 when the height is not known in advance
    pub rows: u32,
    pub end_of_line: bool,
    pub encoded_byte_align: bool,
    pub end_of_block: bool,
    pub black_is_1: bool,
    pub damaged_rows_before_error: u32,
}

impl Default for CcittParams {
    fn default() -> Self {
        Self {
            encoding: CcittEncoding::Group3OneDimensional,
            columns: DEFAULT_COLUMNS,
            rows: 0,
            end_of_line: false,
            encoded_byte_align: false,
            end_of_block: true,
            black_is_1: false,
            damaged_rows_before_error: 0,
        }
    }
}

fn non_negative(dict: &Dictionary, key: &str) -> Result<Option<u32>> {
    match dict.get(key) {
        None => Ok(None),
        Some(obj) => {
            let value = obj
                .as_integer()
                .ok_or_else(|| PdfError::type_mismatch("integer", obj))?;
            u32::try_from(value)
                .map(Some)
                .map_err(|_| PdfError::ValueOutOfRange(format!("/{key} {value}")))
        }
    }
}

fn flag(dict: &Dictionary, key: &str, default: bool) -> Result<bool> {
    match dict.get(key) {
        None => Ok(default),
        Some(obj) => obj
            .as_bool()
            .ok_or_else(|| PdfError::type_mismatch("boolean", obj)),
    }
}

impl CcittParams {
    pub fn from_dict(params: Option<&Dictionary>) -> Result<Self> {
        let mut parsed = Self::default();
        let Some(dict) = params else {
            return Ok(parsed);
        };

        if let Some(k) = dict.get_integer("K") {
            parsed.encoding = match k {
                k if k < 0 => CcittEncoding::Group4,
                0 => CcittEncoding::Group3OneDimensional,
                k => CcittEncoding::Group3Mixed(u32::try_from(k).unwrap_or(u32::MAX)),
            };
        }
        if let Some(columns) = non_negative(dict, "Columns")? {
            if columns == 0 {
                return Err(PdfError::ValueOutOfRange("/Columns 0".to_string()));
            }
            parsed.columns = columns;
        }
        if let Some(rows) = non_negative(dict, "Rows")? {
            parsed.rows = rows;
        }
        if let Some(damaged) = non_negative(dict, "DamagedRowsBeforeError")? {
            parsed.damaged_rows_before_error = damaged;
        }
        parsed.end_of_line = flag(dict, "EndOfLine", parsed.end_of_line)?;
        parsed.encoded_byte_align = flag(dict, "EncodedByteAlign", parsed.encoded_byte_align)?;
        parsed.end_of_block = flag(dict, "EndOfBlock", parsed.end_of_block)?;
        parsed.black_is_1 = flag(dict, "BlackIs1", parsed.black_is_1)?;
        Ok(parsed)
    }

    /// Bytes per decoded row at one bit per pixel.
    pub fn row_bytes(&self) -> usize {
        (self.columns as usize).div_ceil(8)
    }
}

pub struct CcittFilter;

impl PdfFilter for CcittFilter {
    fn filter_type(&self) -> FilterType {
        FilterType::CcittFax
    }

    fn begin_decode(
        &self,
        params: Option<&Dictionary>,
        options: &ParseOptions,
    ) -> Result<Box<dyn FilterSession>> {
        let parsed = CcittParams::from_dict(params)?;
        tracing::trace!("CCITTFaxDecode passthrough: {parsed:?}");
        Ok(Box::new(CopySession::new(OutputLimit::new(
            options.max_decoded_stream_size,
        ))))
    }
}
