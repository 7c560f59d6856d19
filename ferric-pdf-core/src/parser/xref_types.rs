//! XRef entry and index types
//!
//! [`XRefIndex`] is the merged view over every cross-reference section
//! reachable from `startxref`. Sections are merged newest first and an object
//! number, once set, is never overwritten by an older section.

use std::collections::BTreeMap;

/// One cross-reference entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum XRefEntry {
    /// Type 0 / `f`
    Free { next_free: u64, generation: u16 },
    /// Type 1 / `n`: object stored at a byte offset
    InUse { offset: u64, generation: u16 },
    /// Type 2: object stored inside an object stream; generation is always 0
    Compressed { stream_number: u32, index: u32 },
}

impl XRefEntry {
    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Free { generation, .. } | XRefEntry::InUse { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }

    /// The entry as `(type, field2, field3)` in xref stream terms.
    pub fn fields(&self) -> (u8, u64, u64) {
        match *self {
            XRefEntry::Free {
                next_free,
                generation,
            } => (0, next_free, u64::from(generation)),
            XRefEntry::InUse { offset, generation } => (1, offset, u64::from(generation)),
            XRefEntry::Compressed {
                stream_number,
                index,
            } => (2, u64::from(stream_number), u64::from(index)),
        }
    }
}

/// How a cross-reference section is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SectionKind {
    /// Classic `xref` table with a `trailer` dictionary
    Table,
    /// `/Type /XRef` stream
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct XRefSection {
    pub offset: u64,
    pub kind: SectionKind,
}

/// Merged cross-reference index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XRefIndex {
    entries: BTreeMap<u32, XRefEntry>,
    /// Newest first
    sections: Vec<XRefSection>,
    startxref: u64,
    /// Rebuilt by scanning the file rather than read from xref sections
    recovered: bool,
}

impl XRefIndex {
    pub fn new(startxref: u64) -> Self {
        Self {
            startxref,
            ..Self::default()
        }
    }

    /// Offset recorded after the final `startxref` keyword.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// Sections in the order they were read, newest first.
    pub fn sections(&self) -> &[XRefSection] {
        &self.sections
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub(crate) fn mark_recovered(&mut self) {
        self.recovered = true;
    }

    pub fn newest_section(&self) -> Option<&XRefSection> {
        self.sections.first()
    }

    pub(crate) fn push_section(&mut self, section: XRefSection) {
        self.sections.push(section);
    }

    /// Add an entry unless a newer section already set this object number.
    pub fn insert_if_absent(&mut self, number: u32, entry: XRefEntry) -> bool {
        match self.entries.entry(number) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub(crate) fn insert(&mut self, number: u32, entry: XRefEntry) {
        self.entries.insert(number, entry);
    }

    pub(crate) fn remove(&mut self, number: u32) -> Option<XRefEntry> {
        self.entries.remove(&number)
    }

    pub fn get(&self, number: u32) -> Option<&XRefEntry> {
        self.entries.get(&number)
    }

    pub fn contains(&self, number: u32) -> bool {
        self.entries.contains_key(&number)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.entries.iter().map(|(number, entry)| (*number, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_object_number(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    /// Record an appended update section; its entries supersede older ones.
    pub fn apply_update(
        &mut self,
        startxref: u64,
        kind: SectionKind,
        entries: impl IntoIterator<Item = (u32, XRefEntry)>,
    ) {
        for (number, entry) in entries {
            self.entries.insert(number, entry);
        }
        self.sections.insert(
            0,
            XRefSection {
                offset: startxref,
                kind,
            },
        );
        self.startxref = startxref;
    }
}
