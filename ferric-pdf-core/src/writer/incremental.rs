//! Incremental updates
//!
//! Appends changed objects, a new cross-reference section and a trailer
//! after the existing bytes of a file (ISO 32000-1 Section 7.5.6). Nothing
//! before the append point is touched.

use super::pdf_writer::{generate_file_id, PdfWriter};
use crate::error::Result;
use crate::objects::{Dictionary, Object, ObjectId, PdfString};
use crate::parser::{SectionKind, XRefEntry};
use std::io::Write;
use tracing::debug;

/// Trailer keys that belong to a single section and are never carried over.
const DROPPED_KEYS: &[&str] = &[
    "Prev", "XRefStm", "Type", "Length", "Filter", "DecodeParms", "DL", "W", "Index",
];

/// Content of one update section
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    /// New and modified objects, in the order they are written
    pub objects: Vec<(ObjectId, &'a Object)>,
    /// Objects deleted since the last save
    pub removed: Vec<ObjectId>,
    /// Format of the new cross-reference section
    pub kind: SectionKind,
}

/// Result of a written update
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSummary {
    /// Offset of the new xref section
    pub startxref: u64,
    /// Entries of the new section
    pub entries: Vec<(u32, XRefEntry)>,
    /// The trailer that was written
    pub trailer: Dictionary,
    /// Total length after the update
    pub end: u64,
}

pub struct IncrementalWriter<W: Write> {
    writer: PdfWriter<W>,
    previous_trailer: Dictionary,
    previous_startxref: u64,
}

impl<W: Write> IncrementalWriter<W> {
    /// `append_at` is the length of the existing file, i.e. the absolute
    /// offset of the first byte written through `out`.
    pub fn new(out: W, append_at: u64, previous_trailer: &Dictionary, previous_startxref: u64) -> Self {
        Self {
            writer: PdfWriter::with_position(out, append_at),
            previous_trailer: previous_trailer.clone(),
            previous_startxref,
        }
    }

    /// Write the update. `needs_eol` adds a line break first, for files that
    /// do not end with one.
    pub fn write(mut self, update: IncrementalUpdate<'_>, needs_eol: bool) -> Result<UpdateSummary> {
        if needs_eol {
            self.writer.write_bytes(b"\n")?;
        }
        for (id, object) in &update.objects {
            self.writer.write_object(*id, object)?;
        }
        for id in &update.removed {
            self.writer
                .record_free(id.number(), 0, id.generation().saturating_add(1));
        }

        let xref_stream_id = match update.kind {
            SectionKind::Stream => Some(ObjectId::new(self.next_free_number(), 0)),
            SectionKind::Table => None,
        };
        let trailer = self.build_trailer(xref_stream_id);

        let startxref = match xref_stream_id {
            Some(id) => self.writer.write_xref_stream(id, &trailer, true)?,
            None => {
                let offset = self.writer.write_xref_table()?;
                self.writer.write_trailer(&trailer, offset)?;
                offset
            }
        };
        self.writer.flush()?;

        debug!(
            "Wrote incremental update: {} objects, {} removed, xref at {startxref}",
            update.objects.len(),
            update.removed.len()
        );
        Ok(UpdateSummary {
            startxref,
            entries: self
                .writer
                .entries()
                .iter()
                .map(|(number, entry)| (*number, *entry))
                .collect(),
            trailer,
            end: self.writer.position(),
        })
    }

    /// First number above both the old `/Size` and everything written.
    fn next_free_number(&self) -> u32 {
        let size = self
            .previous_trailer
            .get_integer("Size")
            .and_then(|s| u32::try_from(s).ok())
            .unwrap_or(0);
        let written = self
            .writer
            .entries()
            .keys()
            .next_back()
            .map_or(0, |max| max.saturating_add(1));
        size.max(written)
    }

    fn build_trailer(&self, xref_stream_id: Option<ObjectId>) -> Dictionary {
        let mut trailer: Dictionary = self
            .previous_trailer
            .iter()
            .filter(|(key, _)| !DROPPED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut size = self.next_free_number();
        if let Some(id) = xref_stream_id {
            size = size.max(id.number().saturating_add(1));
        }
        trailer.set("Size", i64::from(size));
        trailer.set("Prev", self.previous_startxref as i64);

        if let Some(Object::Array(ids)) = trailer.get_mut("ID") {
            if ids.len() == 2 {
                let seed = ids[0]
                    .as_pdf_string()
                    .map(|s| s.as_bytes().to_vec())
                    .unwrap_or_default();
                ids[1] = Object::String(PdfString::hex(generate_file_id(&seed)));
            }
        }
        trailer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn old_trailer() -> Dictionary {
        let mut trailer = Dictionary::new();
        trailer.set("Size", 5);
        trailer.set("Root", ObjectId::new(1, 0));
        trailer.set("Prev", 10);
        trailer.set("XRefStm", 20);
        trailer.set(
            "ID",
            vec![
                Object::String(PdfString::hex(vec![1; 16])),
                Object::String(PdfString::hex(vec![1; 16])),
            ],
        );
        trailer
    }

    #[test]
    fn test_table_update() {
        let catalog = Object::Dictionary(Dictionary::new());
        let update = IncrementalUpdate {
            objects: vec![(ObjectId::new(1, 0), &catalog)],
            removed: vec![ObjectId::new(3, 0)],
            kind: SectionKind::Table,
        };
        let writer = IncrementalWriter::new(Vec::new(), 500, &old_trailer(), 400);
        let summary = writer.write(update, true).unwrap();

        // "\n" + "1 0 obj\n<< >>\nendobj\n"
        assert_eq!(summary.startxref, 500 + 1 + 21);
        assert_eq!(
            summary.entries,
            vec![
                (
                    1,
                    XRefEntry::InUse {
                        offset: 501,
                        generation: 0
                    }
                ),
                (
                    3,
                    XRefEntry::Free {
                        next_free: 0,
                        generation: 1
                    }
                ),
            ]
        );
        assert_eq!(summary.trailer.get_integer("Size"), Some(5));
        assert!(!summary.trailer.contains_key("XRefStm"));
    }

    #[test]
    fn test_trailer_links_previous_section() {
        let update = IncrementalUpdate {
            objects: Vec::new(),
            removed: Vec::new(),
            kind: SectionKind::Table,
        };
        let mut out = Vec::new();
        IncrementalWriter::new(&mut out, 0, &old_trailer(), 400)
            .write(update, false)
            .unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("/Prev 400"), "{text}");
        assert!(text.starts_with("xref\ntrailer\n"), "{text}");
    }

    #[test]
    fn test_second_id_replaced() {
        let writer = IncrementalWriter::new(Vec::new(), 0, &old_trailer(), 0);
        let trailer = writer.build_trailer(None);
        let ids = trailer.get_array("ID").unwrap();
        assert_eq!(ids[0], Object::String(PdfString::hex(vec![1; 16])));
        assert_ne!(ids[1], ids[0]);
    }

    #[test]
    fn test_stream_update_numbers_after_size() {
        let object = Object::Integer(7);
        let update = IncrementalUpdate {
            objects: vec![(ObjectId::new(6, 0), &object)],
            removed: Vec::new(),
            kind: SectionKind::Stream,
        };
        let summary = IncrementalWriter::new(Vec::new(), 100, &old_trailer(), 50)
            .write(update, false)
            .unwrap();
        // The xref stream takes the next number after object 6
        assert_eq!(summary.trailer.get_integer("Size"), Some(8));
        assert!(summary
            .entries
            .iter()
            .any(|(number, entry)| *number == 7 && !entry.is_free()));
    }
}
