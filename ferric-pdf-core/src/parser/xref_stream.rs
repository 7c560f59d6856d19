//! XRef Stream Parser
//!
//! Cross-reference streams (ISO 32000-1 Section 7.5.8) store entries as
//! fixed-width binary records described by `/W`, for the object ranges
//! listed in `/Index`.

use super::filters::decode_stream;
use super::lexer::Lexer;
use super::objects::{parse_indirect_header, read_stream_payload, IndirectBody};
use super::xref::check_subsection;
use super::xref_types::XRefEntry;
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object};
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use tracing::warn;

/// Largest accepted width of a single field, in bytes.
const MAX_FIELD_WIDTH: i64 = 8;
/// Largest accepted record size, in bytes.
const MAX_RECORD_WIDTH: usize = 32;

/// Stream dictionary keys that are not part of the trailer.
const STREAM_KEYS: &[&str] = &[
    "Type",
    "Length",
    "Filter",
    "DecodeParms",
    "W",
    "Index",
    "DL",
];

/// Field widths from `/W`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWidths([usize; 3]);

impl FieldWidths {
    pub fn from_dict(dict: &Dictionary, offset: u64) -> Result<Self> {
        let w = dict
            .get_array("W")
            .ok_or_else(|| PdfError::invalid_xref_stream(offset, "missing /W array"))?;
        if w.len() != 3 {
            return Err(PdfError::invalid_xref_stream(
                offset,
                format!("/W has {} elements, expected 3", w.len()),
            ));
        }
        let mut widths = [0usize; 3];
        for (slot, value) in widths.iter_mut().zip(w) {
            let width = value
                .as_integer()
                .filter(|n| (0..=MAX_FIELD_WIDTH).contains(n))
                .ok_or_else(|| {
                    PdfError::invalid_xref_stream(offset, format!("invalid /W element {value:?}"))
                })?;
            *slot = width as usize;
        }
        let total: usize = widths.iter().sum();
        if total == 0 || total > MAX_RECORD_WIDTH {
            return Err(PdfError::invalid_xref_stream(
                offset,
                format!("/W record width {total} out of range"),
            ));
        }
        Ok(Self(widths))
    }

    pub fn record_len(&self) -> usize {
        self.0.iter().sum()
    }
}

fn read_field(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// The `(first, count)` pairs from `/Index`, defaulting to `[0 Size]`.
fn index_ranges(dict: &Dictionary, offset: u64, options: &ParseOptions) -> Result<Vec<(u32, u32)>> {
    let size = dict
        .get_integer("Size")
        .ok_or_else(|| PdfError::invalid_xref_stream(offset, "missing /Size"))?;

    let Some(index) = dict.get_array("Index") else {
        return Ok(vec![check_subsection(0, size, offset, options)?]);
    };

    let mut numbers = Vec::with_capacity(index.len());
    for value in index {
        numbers.push(value.as_integer().ok_or_else(|| {
            PdfError::invalid_xref_stream(offset, format!("non-integer /Index element {value:?}"))
        })?);
    }
    if numbers.len() % 2 != 0 {
        if options.strict {
            return Err(PdfError::invalid_xref_stream(
                offset,
                format!("/Index has odd length {}", numbers.len()),
            ));
        }
        warn!(
            "Xref stream at {offset}: /Index has odd length {}, ignoring its last element",
            numbers.len()
        );
        numbers.pop();
    }

    numbers
        .chunks_exact(2)
        .map(|pair| check_subsection(pair[0], pair[1], offset, options))
        .collect()
}

/// Decode the entries of an xref stream from its dictionary and decoded data.
pub fn parse_entries(
    dict: &Dictionary,
    data: &[u8],
    offset: u64,
    options: &ParseOptions,
) -> Result<BTreeMap<u32, XRefEntry>> {
    let widths = FieldWidths::from_dict(dict, offset)?;
    let ranges = index_ranges(dict, offset, options)?;
    let record_len = widths.record_len();

    if data.len() % record_len != 0 {
        return Err(PdfError::invalid_xref_stream(
            offset,
            format!(
                "{} bytes of entry data is not a multiple of the record size {record_len}",
                data.len()
            ),
        ));
    }

    let mut records = data.chunks_exact(record_len);
    let mut entries = BTreeMap::new();
    for (first, count) in ranges {
        for number in first..first + count {
            let Some(record) = records.next() else {
                if options.strict {
                    return Err(PdfError::invalid_xref_stream(
                        offset,
                        format!("entry data ends before object {number}"),
                    ));
                }
                warn!("Xref stream at {offset}: entry data ends before object {number}");
                return Ok(entries);
            };
            let entry = decode_record(record, &widths, number, options)?;
            entries.entry(number).or_insert(entry);
        }
    }
    Ok(entries)
}

fn decode_record(
    record: &[u8],
    widths: &FieldWidths,
    number: u32,
    options: &ParseOptions,
) -> Result<XRefEntry> {
    let [w0, w1, _] = widths.0;
    // A missing type field means type 1
    let entry_type = if w0 == 0 { 1 } else { read_field(&record[..w0]) };
    let field2 = read_field(&record[w0..w0 + w1]);
    let field3 = read_field(&record[w0 + w1..]);

    let narrow = |value: u64, what: &str| {
        u32::try_from(value).map_err(|_| {
            PdfError::invalid_xref_stream(0, format!("{what} {value} of object {number} too large"))
        })
    };
    let generation = u16::try_from(field3).unwrap_or(u16::MAX);

    match entry_type {
        0 => Ok(XRefEntry::Free {
            next_free: field2,
            generation,
        }),
        1 => Ok(XRefEntry::InUse {
            offset: field2,
            generation,
        }),
        2 => Ok(XRefEntry::Compressed {
            stream_number: narrow(field2, "object stream number")?,
            index: narrow(field3, "object stream index")?,
        }),
        other if options.strict => Err(PdfError::InvalidXRefType {
            object: number,
            entry_type: other,
        }),
        other => {
            warn!("Unknown xref stream entry type {other} for object {number}, treating as free");
            Ok(XRefEntry::Free {
                next_free: 0,
                generation: 0,
            })
        }
    }
}

/// Trailer dictionary carried by an xref stream.
pub fn trailer_from_stream_dict(dict: &Dictionary) -> Dictionary {
    dict.iter()
        .filter(|(key, _)| !STREAM_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Read the xref stream object at `offset`.
pub(crate) fn read_xref_stream<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    offset: u64,
    file_len: u64,
    options: &ParseOptions,
) -> Result<(BTreeMap<u32, XRefEntry>, Dictionary)> {
    lexer.seek(offset)?;
    let (id, body) = parse_indirect_header(lexer, options).map_err(|e| {
        PdfError::invalid_xref_stream(offset, format!("no xref stream object: {e}"))
    })?;
    let IndirectBody::Stream { dict, data_offset } = body else {
        return Err(PdfError::invalid_xref_stream(
            offset,
            format!("object {id} is not a stream"),
        ));
    };

    if !dict.is_type("XRef") {
        if options.strict {
            return Err(PdfError::invalid_xref_stream(
                offset,
                format!("object {id} is not /Type /XRef"),
            ));
        }
        warn!("Xref stream {id} at {offset} lacks /Type /XRef");
    }

    // Entries of the xref stream dictionary are always direct
    let length = match dict.get("Length") {
        Some(Object::Integer(n)) => u64::try_from(*n).ok(),
        _ => None,
    };
    let raw = read_stream_payload(lexer, data_offset, length, file_len, options)?;
    let data = decode_stream(&dict, &raw, options)?;
    let entries = parse_entries(&dict, &data, offset, options)?;
    Ok((entries, trailer_from_stream_dict(&dict)))
}
