//! Cross-reference reconstruction
//!
//! Used only when [`ParseOptions::recover_xref`] is set and the regular xref
//! data cannot be read. The whole file is scanned for `N G obj` headers; a
//! later definition of an object number replaces an earlier one, mirroring
//! how incremental updates append new versions.

use super::lexer::{is_delimiter, is_whitespace, Lexer};
use super::object_stream::ObjectStream;
use super::objects::{parse_indirect_header, parse_object, read_stream_payload, IndirectBody};
use super::xref_stream::trailer_from_stream_dict;
use super::xref_types::{XRefEntry, XRefIndex};
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId};
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use tracing::{debug, warn};

const CHUNK: usize = 64 * 1024;
/// Room before a chunk for the `N G ` preceding an `obj` keyword.
const LOOKBEHIND: usize = 32;

/// Positions of interest found by scanning the raw bytes.
#[derive(Debug, Default)]
struct ScanResult {
    /// Object number to (offset, generation); last occurrence wins
    objects: BTreeMap<u32, (u64, u16)>,
    /// Offset just past the last `trailer` keyword
    last_trailer: Option<u64>,
}

/// Rebuild the xref index and a trailer from the object headers in the file.
pub(crate) fn rebuild_xref<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    file_len: u64,
    options: &ParseOptions,
) -> Result<(XRefIndex, Dictionary)> {
    let scan = scan_file(lexer, file_len, options)?;
    if scan.objects.is_empty() {
        return Err(PdfError::broken(0, "no objects found while rebuilding xref"));
    }
    debug!("Recovery found {} object headers", scan.objects.len());

    let mut index = XRefIndex::new(0);
    index.mark_recovered();
    for (&number, &(offset, generation)) in &scan.objects {
        index.insert(number, XRefEntry::InUse { offset, generation });
    }

    let mut xref_stream_dict: Option<Dictionary> = None;
    let mut catalog: Option<ObjectId> = None;
    let mut object_streams = Vec::new();

    for (&number, &(offset, generation)) in &scan.objects {
        lexer.seek(offset)?;
        let (id, body) = match parse_indirect_header(lexer, options) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Dropping unreadable object {number} at offset {offset}: {err}");
                index.remove(number);
                continue;
            }
        };
        match body {
            IndirectBody::Stream { dict, data_offset } => {
                if dict.is_type("XRef") {
                    xref_stream_dict = Some(dict);
                } else if dict.is_type("ObjStm") {
                    object_streams.push((id, dict, data_offset));
                }
            }
            IndirectBody::Object(Object::Dictionary(dict)) => {
                if catalog.is_none() && dict.is_type("Catalog") {
                    catalog = Some(ObjectId::new(number, generation));
                }
            }
            IndirectBody::Object(_) => {}
        }
    }

    for (id, dict, data_offset) in object_streams {
        register_object_stream(lexer, &mut index, id, &dict, data_offset, file_len, options);
    }

    let mut trailer = rebuild_trailer(lexer, &scan, xref_stream_dict, catalog, options)?;
    trailer.remove("Prev");
    trailer.remove("XRefStm");
    let size = index.max_object_number().map_or(1, |max| max.saturating_add(1));
    trailer.set("Size", i64::from(size));
    index.insert(
        0,
        XRefEntry::Free {
            next_free: 0,
            generation: u16::MAX,
        },
    );
    Ok((index, trailer))
}

fn scan_file<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    file_len: u64,
    options: &ParseOptions,
) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut chunk_start = 0u64;

    while chunk_start < file_len {
        let read_from = chunk_start.saturating_sub(LOOKBEHIND as u64);
        let lead = (chunk_start - read_from) as usize;
        let data = lexer.read_at(read_from, lead + CHUNK + 8)?;

        for at in lead..data.len().min(lead + CHUNK) {
            if data[at..].starts_with(b"obj") && keyword_ends(&data, at + 3) {
                if let Some((start, number, generation)) = object_header_before(&data, at) {
                    if number > options.max_object_count {
                        warn!("Ignoring object {number} above the object limit");
                        continue;
                    }
                    let offset = read_from + start as u64;
                    result.objects.insert(number, (offset, generation));
                }
            } else if data[at..].starts_with(b"trailer")
                && keyword_ends(&data, at + 7)
                && (at == 0 || !is_regular(data[at - 1]))
            {
                result.last_trailer = Some(read_from + at as u64 + 7);
            }
        }
        chunk_start += CHUNK as u64;
    }
    Ok(result)
}

fn is_regular(ch: u8) -> bool {
    !is_whitespace(ch) && !is_delimiter(ch)
}

fn keyword_ends(data: &[u8], at: usize) -> bool {
    data.get(at).map_or(true, |&ch| !is_regular(ch))
}

/// Parse `N G ` backwards from the `obj` keyword at `at`.
fn object_header_before(data: &[u8], at: usize) -> Option<(usize, u32, u16)> {
    let mut pos = at;
    let skip_space = |pos: &mut usize| {
        let end = *pos;
        while *pos > 0 && is_whitespace(data[*pos - 1]) {
            *pos -= 1;
        }
        *pos < end
    };
    let digits = |pos: &mut usize| -> Option<u64> {
        let end = *pos;
        while *pos > 0 && data[*pos - 1].is_ascii_digit() && end - *pos < 10 {
            *pos -= 1;
        }
        if *pos == end {
            return None;
        }
        std::str::from_utf8(&data[*pos..end]).ok()?.parse().ok()
    };

    if !skip_space(&mut pos) {
        return None;
    }
    let generation = u16::try_from(digits(&mut pos)?).ok()?;
    if !skip_space(&mut pos) {
        return None;
    }
    let number = u32::try_from(digits(&mut pos)?).ok()?;
    if pos > 0 && is_regular(data[pos - 1]) {
        return None;
    }
    Some((pos, number, generation))
}

/// Add the contents of an object stream, without replacing direct objects.
fn register_object_stream<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    index: &mut XRefIndex,
    id: ObjectId,
    dict: &Dictionary,
    data_offset: u64,
    file_len: u64,
    options: &ParseOptions,
) {
    let length = dict
        .get_integer("Length")
        .and_then(|len| u64::try_from(len).ok());
    let parsed = read_stream_payload(lexer, data_offset, length, file_len, options)
        .and_then(|raw| crate::parser::filters::decode_stream(dict, &raw, options))
        .and_then(|data| ObjectStream::parse(id, dict, data, options));
    match parsed {
        Ok(stream) => {
            for (position, number) in stream.object_numbers().enumerate() {
                index.insert_if_absent(
                    number,
                    XRefEntry::Compressed {
                        stream_number: id.number(),
                        index: position as u32,
                    },
                );
            }
        }
        Err(err) => warn!("Skipping object stream {id} during recovery: {err}"),
    }
}

fn rebuild_trailer<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    scan: &ScanResult,
    xref_stream_dict: Option<Dictionary>,
    catalog: Option<ObjectId>,
    options: &ParseOptions,
) -> Result<Dictionary> {
    if let Some(offset) = scan.last_trailer {
        lexer.seek(offset)?;
        match parse_object(lexer, options) {
            Ok(Object::Dictionary(dict)) if dict.contains_key("Root") => {
                debug!("Recovered trailer from 'trailer' keyword at {offset}");
                return Ok(dict);
            }
            Ok(_) => warn!("Trailer at offset {offset} has no /Root"),
            Err(err) => warn!("Unreadable trailer at offset {offset}: {err}"),
        }
    }
    if let Some(dict) = xref_stream_dict.filter(|d| d.contains_key("Root")) {
        debug!("Recovered trailer from an xref stream dictionary");
        return Ok(trailer_from_stream_dict(&dict));
    }
    if let Some(root) = catalog {
        debug!("Synthesized trailer for catalog {root}");
        let mut dict = Dictionary::new();
        dict.set("Root", root);
        return Ok(dict);
    }
    Err(PdfError::broken(0, "no trailer or catalog found while rebuilding xref"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::TestPdf;
    use std::io::Cursor;

    fn rebuild(data: Vec<u8>) -> Result<(XRefIndex, Dictionary)> {
        let len = data.len() as u64;
        let mut lexer = Lexer::new(Cursor::new(data));
        rebuild_xref(&mut lexer, len, &ParseOptions::lenient())
    }

    #[test]
    fn test_header_before_keyword() {
        let data = b"junk\n12 3 obj";
        assert_eq!(object_header_before(data, 10), Some((5, 12, 3)));
        assert_eq!(object_header_before(b"x12 0 obj", 6), None);
        assert_eq!(object_header_before(b"12 0obj", 4), None);
    }

    #[test]
    fn test_last_definition_wins() {
        let mut pdf = TestPdf::new("1.4");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.object(2, "(old)");
        pdf.object(2, "(new)");
        let second = pdf.offset_of(2).unwrap() as u64;
        pdf.raw(b"trailer\n<< /Root 1 0 R /Size 9 /Prev 4 >>\n%%EOF\n");

        let (index, trailer) = rebuild(pdf.into_bytes()).unwrap();
        assert!(index.is_recovered());
        assert_eq!(
            index.get(2),
            Some(&XRefEntry::InUse {
                offset: second,
                generation: 0
            })
        );
        assert!(index.get(0).unwrap().is_free());
        assert_eq!(trailer.get_integer("Size"), Some(3));
        assert!(!trailer.contains_key("Prev"));
    }

    #[test]
    fn test_catalog_fallback() {
        let mut data = Vec::new();
        data.extend_from_slice(b"%PDF-1.4\n");
        data.extend_from_slice(b"4 0 obj\n<< /Type /Pages >>\nendobj\n");
        data.extend_from_slice(b"7 0 obj\n<< /Type /Catalog /Pages 4 0 R >>\nendobj\n");
        let (index, trailer) = rebuild(data).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(trailer.get_reference("Root"), Some(ObjectId::new(7, 0)));
        assert_eq!(trailer.get_integer("Size"), Some(8));
    }

    #[test]
    fn test_object_stream_contents_registered() {
        let mut pdf = TestPdf::new("1.5");
        pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        pdf.object_stream(5, &[(2, "<< /Type /Pages >>"), (3, "42")]);
        let mut data = pdf.finish_with_stream(6, "");
        // Break the startxref offset
        let at = data.windows(9).rposition(|w| w == b"startxref").unwrap();
        data.truncate(at);

        let (index, trailer) = rebuild(data).unwrap();
        assert_eq!(
            index.get(3),
            Some(&XRefEntry::Compressed {
                stream_number: 5,
                index: 1
            })
        );
        assert_eq!(trailer.get_reference("Root"), Some(ObjectId::new(1, 0)));
        assert!(!trailer.contains_key("W"));
    }

    #[test]
    fn test_nothing_found() {
        let err = rebuild(b"%PDF-1.4\nnothing here\n".to_vec()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BrokenFile);
    }
}
