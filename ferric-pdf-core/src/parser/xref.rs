//! PDF Cross-Reference Table Parser
//!
//! Parses xref tables according to ISO 32000-1 Section 7.5.4 and walks the
//! `/Prev` chain of incremental updates. The chain is followed iteratively
//! with a set of visited offsets, so a trailer pointing back into the chain is
//! reported instead of looping. Classic sections and xref streams may point to
//! each other.

use super::lexer::{Lexer, Token};
use super::objects::parse_object;
use super::xref_stream;
use super::xref_types::{SectionKind, XRefEntry, XRefIndex, XRefSection};
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek};
use tracing::{debug, warn};

/// Bytes searched for `startxref` at the end of the file, first pass.
const STARTXREF_SEARCH: usize = 1024;
/// Second, wider pass for files with trailing garbage.
const STARTXREF_SEARCH_WIDE: usize = 4096;

/// Trailer keys that only describe one section and are not carried over.
const SECTION_KEYS: &[&str] = &["Prev", "XRefStm"];

/// Entries of one cross-reference section together with its trailer.
#[derive(Debug)]
pub(crate) struct Section {
    pub kind: SectionKind,
    pub entries: BTreeMap<u32, XRefEntry>,
    pub trailer: Dictionary,
}

/// Locate the offset given after the last `startxref` keyword.
pub fn find_startxref<R: Read + Seek>(lexer: &mut Lexer<R>, file_len: u64) -> Result<u64> {
    for window in [STARTXREF_SEARCH, STARTXREF_SEARCH_WIDE] {
        let start = file_len.saturating_sub(window as u64);
        let tail = lexer.read_at(start, window)?;
        let Some(pos) = rfind(&tail, b"startxref") else {
            if start == 0 {
                break;
            }
            continue;
        };

        let digits: Vec<u8> = tail[pos + b"startxref".len()..]
            .iter()
            .copied()
            .skip_while(|b| b.is_ascii_whitespace())
            .take_while(u8::is_ascii_digit)
            .collect();
        let offset = std::str::from_utf8(&digits)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| PdfError::NoXRef {
                offset: Some(start + pos as u64),
                message: "'startxref' is not followed by an offset".to_string(),
            })?;
        if offset >= file_len {
            return Err(PdfError::NoXRef {
                offset: Some(offset),
                message: format!("startxref offset beyond end of file ({file_len} bytes)"),
            });
        }
        return Ok(offset);
    }

    Err(PdfError::NoXRef {
        offset: None,
        message: "'startxref' keyword not found".to_string(),
    })
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Validate a subsection header or `/Index` pair.
pub(crate) fn check_subsection(
    first: i64,
    count: i64,
    offset: u64,
    options: &ParseOptions,
) -> Result<(u32, u32)> {
    if first < 0 || count < 0 {
        return Err(PdfError::invalid_xref(
            offset,
            format!("negative subsection bounds {first} {count}"),
        ));
    }
    let end = first.checked_add(count).ok_or_else(|| {
        PdfError::invalid_xref(offset, format!("subsection {first} {count} overflows"))
    })?;
    if end > i64::from(options.max_object_count) {
        return Err(PdfError::invalid_xref(
            offset,
            format!(
                "subsection {first} {count} exceeds the maximum of {} objects",
                options.max_object_count
            ),
        ));
    }
    Ok((first as u32, count as u32))
}

/// Load and merge every section reachable from `startxref`.
///
/// Returns the merged index and the trailer of the newest section; keys a
/// newer trailer omits are filled in from older ones.
pub fn load_xref<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    file_len: u64,
    options: &ParseOptions,
) -> Result<(XRefIndex, Dictionary)> {
    let startxref = find_startxref(lexer, file_len)?;
    let mut index = XRefIndex::new(startxref);
    let mut trailer: Option<Dictionary> = None;
    let mut visited = HashSet::new();
    let mut next = Some(startxref);

    while let Some(offset) = next {
        if !visited.insert(offset) {
            return Err(PdfError::invalid_xref(
                offset,
                "cross-reference chain loops back to an already visited section",
            ));
        }
        if offset >= file_len {
            return Err(PdfError::invalid_xref(offset, "/Prev points beyond end of file"));
        }

        let section = read_section(lexer, offset, file_len, options, &mut visited)?;
        debug!(
            "Read {:?} xref section at offset {offset} with {} entries",
            section.kind,
            section.entries.len()
        );
        index.push_section(XRefSection {
            offset,
            kind: section.kind,
        });
        for (number, entry) in section.entries {
            index.insert_if_absent(number, entry);
        }

        next = prev_offset(&section.trailer, offset)?;
        match trailer.as_mut() {
            None => trailer = Some(section.trailer),
            Some(newest) => {
                for (key, value) in section.trailer.iter() {
                    if !newest.contains_key(key) && !SECTION_KEYS.contains(&key.as_str()) {
                        newest.set(key.clone(), value.clone());
                    }
                }
            }
        }
    }

    let trailer = trailer.unwrap_or_default();
    check_size(&trailer, &index, options)?;
    Ok((index, trailer))
}

fn prev_offset(trailer: &Dictionary, offset: u64) -> Result<Option<u64>> {
    match trailer.get("Prev") {
        None => Ok(None),
        Some(Object::Integer(prev)) => u64::try_from(*prev)
            .map(Some)
            .map_err(|_| PdfError::invalid_xref(offset, format!("negative /Prev {prev}"))),
        Some(other) => Err(PdfError::invalid_xref(
            offset,
            format!("/Prev must be an integer, found {}", other.type_name()),
        )),
    }
}

fn check_size(trailer: &Dictionary, index: &XRefIndex, options: &ParseOptions) -> Result<()> {
    let Some(size) = trailer.get_integer("Size") else {
        if options.strict {
            return Err(PdfError::invalid_xref(index.startxref(), "trailer has no /Size"));
        }
        warn!("Trailer has no /Size");
        return Ok(());
    };
    if size < 0 || size > i64::from(options.max_object_count) {
        return Err(PdfError::invalid_xref(
            index.startxref(),
            format!("/Size {size} out of range"),
        ));
    }
    if let Some(max) = index.max_object_number() {
        if i64::from(max) >= size {
            warn!("Xref has object {max} but /Size is {size}");
        }
    }
    Ok(())
}

/// Read the section at `offset`, either a classic table or an xref stream.
pub(crate) fn read_section<R: Read + Seek>(
    lexer: &mut Lexer<R>,
    offset: u64,
    file_len: u64,
    options: &ParseOptions,
    visited: &mut HashSet<u64>,
) -> Result<Section> {
    lexer.seek(offset)?;
    let token = lexer.next_token()?;
    if token.is_keyword(b"xref") {
        let mut section = read_table(lexer, options)?;
        if let Some(stm) = section.trailer.get_integer("XRefStm") {
            merge_hybrid_stream(&mut section, stm, file_len, options, lexer, visited)?;
        }
        return Ok(section);
    }
    if let Token::Integer(_) = token {
        let (entries, trailer) = xref_stream::read_xref_stream(lexer, offset, file_len, options)?;
        return Ok(Section {
            kind: SectionKind::Stream,
            entries,
            trailer,
        });
    }
    Err(PdfError::invalid_xref(
        offset,
        format!(
            "expected 'xref' or an xref stream, found {}",
            token.describe()
        ),
    ))
}

/// A hybrid file's `/XRefStm` may supply entries the table omits or frees.
fn merge_hybrid_stream<R: Read + Seek>(
    section: &mut Section,
    stm: i64,
    file_len: u64,
    options: &ParseOptions,
    lexer: &mut Lexer<R>,
    visited: &mut HashSet<u64>,
) -> Result<()> {
    let stm = u64::try_from(stm)
        .ok()
        .filter(|o| *o < file_len)
        .ok_or_else(|| PdfError::invalid_xref(0, format!("/XRefStm {stm} out of range")))?;
    if !visited.insert(stm) {
        return Err(PdfError::invalid_xref(
            stm,
            "/XRefStm points at an already visited section",
        ));
    }
    let (entries, _) = xref_stream::read_xref_stream(lexer, stm, file_len, options)?;
    debug!("Merging {} entries from /XRefStm at {stm}", entries.len());
    for (number, entry) in entries {
        match section.entries.get(&number) {
            None | Some(XRefEntry::Free { .. }) => {
                section.entries.insert(number, entry);
            }
            Some(_) => {}
        }
    }
    Ok(())
}

enum EntryToken {
    Entry(i64, i64, Vec<u8>),
    Trailer,
}

fn read_entry_tokens<R: Read>(lexer: &mut Lexer<R>) -> Result<EntryToken> {
    let first = lexer.next_token()?;
    if first.is_keyword(b"trailer") {
        return Ok(EntryToken::Trailer);
    }
    let second = lexer.next_token()?;
    let third = lexer.next_token()?;
    match (first, second, third) {
        (Token::Integer(offset), Token::Integer(generation), Token::Keyword(kind)) => {
            Ok(EntryToken::Entry(offset, generation, kind))
        }
        (first, _, _) => Err(PdfError::invalid_xref(
            lexer.token_start(),
            format!("malformed xref entry starting with {}", first.describe()),
        )),
    }
}

/// Parse a classic table; the `xref` keyword was already consumed.
fn read_table<R: Read>(lexer: &mut Lexer<R>, options: &ParseOptions) -> Result<Section> {
    let mut entries = BTreeMap::new();
    let mut first_subsection = true;

    'subsections: loop {
        let header_offset = lexer.position();
        let (first, count) = match lexer.next_token()? {
            token if token.is_keyword(b"trailer") => break,
            Token::Integer(first) => match lexer.next_token()? {
                Token::Integer(count) => (first, count),
                other => {
                    return Err(PdfError::invalid_xref(
                        lexer.token_start(),
                        format!("expected subsection count, found {}", other.describe()),
                    ))
                }
            },
            other => {
                return Err(PdfError::invalid_xref(
                    lexer.token_start(),
                    format!("expected subsection header, found {}", other.describe()),
                ))
            }
        };
        let (mut first, count) = check_subsection(first, count, header_offset, options)?;

        for i in 0..count {
            let entry_offset = lexer.position();
            let (offset, generation, kind) = match read_entry_tokens(lexer)? {
                EntryToken::Entry(offset, generation, kind) => (offset, generation, kind),
                EntryToken::Trailer => {
                    if options.strict {
                        return Err(PdfError::invalid_xref(
                            entry_offset,
                            format!("subsection ends after {i} of {count} entries"),
                        ));
                    }
                    warn!("Xref subsection at {header_offset} ends after {i} of {count} entries");
                    break 'subsections;
                }
            };

            // Producers that number the first subsection from 1 but still
            // write the object 0 entry first
            if first_subsection
                && i == 0
                && first == 1
                && offset == 0
                && generation == 65535
                && kind == b"f"
            {
                warn!("Xref subsection at {header_offset} starts at 1 but holds object 0, renumbering");
                first = 0;
            }

            let number = first + i;
            let entry = make_entry(number, offset, generation, &kind, entry_offset, options)?;
            entries.entry(number).or_insert(entry);
        }
        first_subsection = false;
    }

    let trailer = match parse_object(lexer, options)? {
        Object::Dictionary(dict) => dict,
        other => {
            return Err(PdfError::invalid_xref(
                lexer.token_start(),
                format!("trailer is a {}, not a dictionary", other.type_name()),
            ))
        }
    };

    Ok(Section {
        kind: SectionKind::Table,
        entries,
        trailer,
    })
}

fn make_entry(
    number: u32,
    offset: i64,
    generation: i64,
    kind: &[u8],
    entry_offset: u64,
    options: &ParseOptions,
) -> Result<XRefEntry> {
    let offset = u64::try_from(offset).map_err(|_| {
        PdfError::invalid_xref(entry_offset, format!("negative offset for object {number}"))
    })?;
    let generation = match u16::try_from(generation) {
        Ok(g) => g,
        Err(_) if options.strict => {
            return Err(PdfError::invalid_xref(
                entry_offset,
                format!("generation {generation} out of range for object {number}"),
            ));
        }
        Err(_) => {
            warn!("Generation {generation} of object {number} clamped to 65535");
            u16::MAX
        }
    };
    match kind {
        b"n" => Ok(XRefEntry::InUse { offset, generation }),
        b"f" => Ok(XRefEntry::Free {
            next_free: offset,
            generation,
        }),
        other if options.strict => Err(PdfError::invalid_xref(
            entry_offset,
            format!(
                "unknown entry type '{}' for object {number}",
                String::from_utf8_lossy(other)
            ),
        )),
        other => {
            warn!(
                "Unknown xref entry type '{}' for object {number}, treating as free",
                String::from_utf8_lossy(other)
            );
            Ok(XRefEntry::Free {
                next_free: 0,
                generation,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn load(data: &[u8], options: &ParseOptions) -> Result<(XRefIndex, Dictionary)> {
        let mut lexer = Lexer::new(Cursor::new(data.to_vec()));
        load_xref(&mut lexer, data.len() as u64, options)
    }

    /// Wrap an xref section so that `startxref` points at it.
    fn with_startxref(body: &str) -> Vec<u8> {
        let prefix = "%PDF-1.4\n";
        format!("{prefix}{body}startxref\n{}\n%%EOF\n", prefix.len()).into_bytes()
    }

    #[test]
    fn test_classic_table_scenario() {
        let data = with_startxref(
            "xref\r\n0 3\r\n0000000000 65535 f\r\n0000000018 00000 n\r\n0000000077 00000 n\r\ntrailer\n<< /Root 1 0 R /Size 3 >>\n",
        );
        let (index, trailer) = load(&data, &ParseOptions::default()).unwrap();
        assert_eq!(index.len(), 3);
        assert!(index.get(0).unwrap().is_free());
        assert_eq!(
            index.get(1),
            Some(&XRefEntry::InUse {
                offset: 18,
                generation: 0
            })
        );
        assert_eq!(
            index.get(2),
            Some(&XRefEntry::InUse {
                offset: 77,
                generation: 0
            })
        );
        assert_eq!(trailer.get_integer("Size"), Some(3));
        assert_eq!(index.sections().len(), 1);
        assert_eq!(index.sections()[0].kind, SectionKind::Table);
    }

    #[test]
    fn test_find_startxref_missing() {
        let data = b"%PDF-1.4\nnothing here\n%%EOF";
        let mut lexer = Lexer::new(Cursor::new(data.to_vec()));
        let err = find_startxref(&mut lexer, data.len() as u64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoXRef);
    }

    #[test]
    fn test_startxref_beyond_eof() {
        let data = b"%PDF-1.4\nstartxref\n99999\n%%EOF";
        let err = load(data, &ParseOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoXRef);
    }

    #[test]
    fn test_startxref_with_trailing_garbage() {
        let mut data = with_startxref("xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 >>\n");
        data.extend(std::iter::repeat(b' ').take(2000));
        let (index, _) = load(&data, &ParseOptions::default()).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_multiple_subsections() {
        let data = with_startxref(
            "xref\n0 1\n0000000000 65535 f \n5 2\n0000000100 00000 n \n0000000200 00001 n \ntrailer\n<< /Size 7 >>\n",
        );
        let (index, _) = load(&data, &ParseOptions::default()).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(6).map(|e| e.generation()), Some(1));
        assert!(index.get(3).is_none());
    }

    #[test]
    fn test_subsection_off_by_one_quirk() {
        let data = with_startxref(
            "xref\n1 2\n0000000000 65535 f \n0000000050 00000 n \ntrailer\n<< /Size 2 >>\n",
        );
        let (index, _) = load(&data, &ParseOptions::default()).unwrap();
        assert!(index.get(0).unwrap().is_free());
        assert_eq!(index.get(1).map(|e| e.fields().1), Some(50));
        assert!(index.get(2).is_none());
    }

    #[test]
    fn test_short_subsection() {
        let data = with_startxref(
            "xref\n0 3\n0000000000 65535 f \n0000000050 00000 n \ntrailer\n<< /Size 3 >>\n",
        );
        let (index, _) = load(&data, &ParseOptions::lenient()).unwrap();
        assert_eq!(index.len(), 2);

        let err = load(&data, &ParseOptions::strict()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidXRef);
    }

    #[test]
    fn test_unknown_entry_type() {
        let data = with_startxref(
            "xref\n0 2\n0000000000 65535 f \n0000000050 00000 x \ntrailer\n<< /Size 2 >>\n",
        );
        let (index, _) = load(&data, &ParseOptions::default()).unwrap();
        assert!(index.get(1).unwrap().is_free());
        let err = load(&data, &ParseOptions::strict()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidXRef);
    }

    #[test]
    fn test_prev_chain_first_writer_wins() {
        let header = "%PDF-1.4\n";
        let old = "xref\n0 2\n0000000000 65535 f \n0000000010 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R /Info 9 0 R >>\n";
        let old_offset = header.len();
        let new_offset = old_offset + old.len();
        let new = format!(
            "xref\n1 2\n0000000500 00000 n \n0000000600 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R /Prev {old_offset} >>\n"
        );
        let data = format!("{header}{old}{new}startxref\n{new_offset}\n%%EOF\n").into_bytes();

        let (index, trailer) = load(&data, &ParseOptions::default()).unwrap();
        assert_eq!(index.sections().len(), 2);
        assert_eq!(index.sections()[0].offset, new_offset as u64);
        assert_eq!(index.get(1).map(|e| e.fields().1), Some(500));
        assert_eq!(index.get(2).map(|e| e.fields().1), Some(600));
        assert!(index.get(0).unwrap().is_free());
        assert_eq!(trailer.get_integer("Size"), Some(3));
        // Filled from the older trailer
        assert!(trailer.contains_key("Info"));
    }

    #[test]
    fn test_prev_self_cycle() {
        let header = "%PDF-1.4\n";
        let offset = header.len();
        let data = format!(
            "{header}xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev {offset} >>\nstartxref\n{offset}\n%%EOF\n"
        );
        let err = load(data.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidXRef);
    }

    #[test]
    fn test_prev_two_section_cycle() {
        let header = "%PDF-1.4\n";
        let a_offset = header.len();
        // Both sections have the same length, so offsets can be computed up front
        let a_len = "xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev 0000 >>\n".len();
        let b_offset = a_offset + a_len;
        let a = format!("xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev {b_offset:04} >>\n");
        let b = format!("xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 /Prev {a_offset:04} >>\n");
        let data = format!("{header}{a}{b}startxref\n{b_offset}\n%%EOF\n");
        let err = load(data.as_bytes(), &ParseOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidXRef);
    }

    #[test]
    fn test_subsection_bounds() {
        let options = ParseOptions::default().with_max_object_count(1000);
        assert_eq!(check_subsection(10, 990, 0, &options).unwrap(), (10, 990));
        for (first, count) in [(-1, 5), (5, -1), (999, 2), (i64::MAX, 1)] {
            let err = check_subsection(first, count, 0, &options).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidXRef, "{first} {count}");
        }
    }

    #[test]
    fn test_subsection_beyond_ceiling_in_file() {
        let data = with_startxref("xref\n8388607 2\n0000000000 65535 f \n0000000000 65535 f \ntrailer\n<< /Size 1 >>\n");
        let err = load(&data, &ParseOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidXRef);
    }

    #[test]
    fn test_trailer_not_dictionary() {
        let data = with_startxref("xref\n0 1\n0000000000 65535 f \ntrailer\n[1 2]\n");
        let err = load(&data, &ParseOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidXRef);
    }

    fn table_with(first: u32, count: u32) -> Vec<u8> {
        let mut body = format!("xref\n{first} {count}\n");
        for i in 0..count {
            body.push_str(&format!("{:010} 00000 n \n", 100 + i));
        }
        body.push_str(&format!("trailer\n<< /Size {} >>\n", first + count));
        with_startxref(&body)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_valid_subsection_yields_count_entries(first in 0u32..1_000_000, count in 0u32..40) {
            let data = table_with(first, count);
            let (index, _) = load(&data, &ParseOptions::default()).unwrap();
            prop_assert_eq!(index.len(), count as usize);
            for i in 0..count {
                prop_assert_eq!(index.get(first + i).map(|e| e.fields().1), Some(u64::from(100 + i)));
            }
        }

        #[test]
        fn prop_out_of_bounds_subsection_rejected(first in any::<i64>(), count in any::<i64>()) {
            let options = ParseOptions::default();
            let valid = first >= 0
                && count >= 0
                && first.checked_add(count).is_some_and(|end| end <= i64::from(options.max_object_count));
            let result = check_subsection(first, count, 0, &options);
            prop_assert_eq!(result.is_ok(), valid);
            if let Err(err) = result {
                prop_assert_eq!(err.kind(), ErrorKind::InvalidXRef);
            }
        }
    }
}
