//! XRef Stream Writer for PDF 1.5+
//!
//! This module implements writing cross-reference streams according to
//! ISO 32000-1:2008 Section 7.5.8.

use super::pdf_writer::contiguous_runs;
use crate::error::Result;
use crate::objects::{Dictionary, Object, ObjectId, Stream};
use crate::parser::filters::FilterType;
use crate::parser::XRefEntry;
use std::collections::BTreeMap;

/// Dictionary keys that describe a stream rather than the trailer.
const STREAM_KEYS: &[&str] = &["Length", "Filter", "DecodeParms", "DL", "W", "Index"];

/// Writer for XRef streams
pub struct XRefStreamWriter {
    /// Entries to be written, by object number
    entries: BTreeMap<u32, XRefEntry>,
    /// Field widths [type, field2, field3]
    widths: [usize; 3],
    /// Object ID for this XRef stream
    stream_id: ObjectId,
}

impl XRefStreamWriter {
    /// Create a new XRef stream writer
    pub fn new(stream_id: ObjectId) -> Self {
        Self {
            entries: BTreeMap::new(),
            widths: [1, 1, 1],
            stream_id,
        }
    }

    /// Add or replace the entry for `number`, widening fields as needed.
    pub fn add_entry(&mut self, number: u32, entry: XRefEntry) {
        let (_, field2, field3) = entry.fields();
        self.widths[1] = self.widths[1].max(Self::bytes_needed(field2));
        self.widths[2] = self.widths[2].max(Self::bytes_needed(field3));
        self.entries.insert(number, entry);
    }

    pub fn widths(&self) -> [usize; 3] {
        self.widths
    }

    /// Calculate minimum bytes needed to represent a value
    fn bytes_needed(value: u64) -> usize {
        if value == 0 {
            1
        } else {
            ((value.ilog2() / 8) + 1) as usize
        }
    }

    /// Encode entries into binary data, in object-number order
    pub fn encode_entries(&self) -> Vec<u8> {
        let record = self.widths.iter().sum::<usize>();
        let mut data = Vec::with_capacity(self.entries.len() * record);
        for entry in self.entries.values() {
            let (kind, field2, field3) = entry.fields();
            Self::write_field(&mut data, u64::from(kind), self.widths[0]);
            Self::write_field(&mut data, field2, self.widths[1]);
            Self::write_field(&mut data, field3, self.widths[2]);
        }
        data
    }

    /// Write a field with the specified width
    fn write_field(data: &mut Vec<u8>, value: u64, width: usize) {
        for i in (0..width).rev() {
            data.push(((value >> (i * 8)) & 0xFF) as u8);
        }
    }

    /// `/Size` covering every entry and at least the trailer's own `/Size`.
    fn size(&self, trailer: &Dictionary) -> i64 {
        let from_entries = self
            .entries
            .keys()
            .next_back()
            .map_or(0, |max| i64::from(*max) + 1);
        trailer
            .get_integer("Size")
            .map_or(from_entries, |size| size.max(from_entries))
    }

    /// Create the XRef stream dictionary from the trailer entries
    pub fn create_dictionary(&self, trailer: &Dictionary) -> Dictionary {
        let mut dict: Dictionary = trailer
            .iter()
            .filter(|(key, _)| !STREAM_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let size = self.size(trailer);
        dict.set("Type", Object::name("XRef"));
        dict.set("Size", size);
        dict.set(
            "W",
            self.widths
                .iter()
                .map(|w| Object::Integer(*w as i64))
                .collect::<Vec<_>>(),
        );

        let runs = contiguous_runs(&self.entries);
        let default_index = matches!(runs.as_slice(), [(0, run)] if run.len() as i64 == size);
        if !default_index {
            let index: Vec<Object> = runs
                .iter()
                .flat_map(|(first, run)| {
                    [Object::from(*first), Object::Integer(run.len() as i64)]
                })
                .collect();
            dict.set("Index", index);
        }
        dict
    }

    /// Build the stream object; `compress` Flate-encodes the records.
    pub fn build(&self, trailer: &Dictionary, compress: bool) -> Result<Stream> {
        let data = self.encode_entries();
        let mut stream = Stream::new(self.create_dictionary(trailer), Vec::new());
        if compress && cfg!(feature = "compression") {
            stream.set_encoded_data(FilterType::Flate, None, &data)?;
        } else {
            stream.set_data(data);
        }
        Ok(stream)
    }

    /// Get the number of entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get the stream object ID
    pub fn stream_id(&self) -> ObjectId {
        self.stream_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseOptions;
    use crate::parser::xref_stream;

    #[test]
    fn test_bytes_needed() {
        assert_eq!(XRefStreamWriter::bytes_needed(0), 1);
        assert_eq!(XRefStreamWriter::bytes_needed(255), 1);
        assert_eq!(XRefStreamWriter::bytes_needed(256), 2);
        assert_eq!(XRefStreamWriter::bytes_needed(65535), 2);
        assert_eq!(XRefStreamWriter::bytes_needed(65536), 3);
        assert_eq!(XRefStreamWriter::bytes_needed(16777215), 3);
        assert_eq!(XRefStreamWriter::bytes_needed(16777216), 4);
    }

    #[test]
    fn test_encode_free_entry() {
        let mut writer = XRefStreamWriter::new(ObjectId::new(1, 0));
        writer.add_entry(
            0,
            XRefEntry::Free {
                next_free: 42,
                generation: 1,
            },
        );

        let data = writer.encode_entries();
        assert_eq!(writer.widths(), [1, 1, 1]);
        assert_eq!(data, vec![0, 42, 1]);
    }

    #[test]
    fn test_width_adjustment() {
        let mut writer = XRefStreamWriter::new(ObjectId::new(1, 0));
        writer.add_entry(
            1,
            XRefEntry::InUse {
                offset: 0x12345678,
                generation: 0,
            },
        );
        writer.add_entry(
            2,
            XRefEntry::InUse {
                offset: 7,
                generation: 300,
            },
        );

        assert_eq!(writer.widths(), [1, 4, 2]);
        let data = writer.encode_entries();
        assert_eq!(data.len(), 14);
        assert_eq!(&data[..7], &[1, 0x12, 0x34, 0x56, 0x78, 0, 0]);
        assert_eq!(&data[7..], &[1, 0, 0, 0, 7, 0x01, 0x2C]);
    }

    #[test]
    fn test_multiple_entry_types() {
        let mut writer = XRefStreamWriter::new(ObjectId::new(1, 0));
        writer.add_entry(
            0,
            XRefEntry::Free {
                next_free: 0,
                generation: 65535,
            },
        );
        writer.add_entry(
            1,
            XRefEntry::InUse {
                offset: 100,
                generation: 0,
            },
        );
        writer.add_entry(
            2,
            XRefEntry::Compressed {
                stream_number: 5,
                index: 3,
            },
        );
        assert_eq!(writer.entry_count(), 3);

        let data = writer.encode_entries();
        // Each entry is 1 + 1 + 2 bytes
        assert_eq!(data.len(), 12);
        assert_eq!(data[0], 0);
        assert_eq!(data[4], 1);
        assert_eq!(data[8], 2);
        assert_eq!(data[9], 5);
    }

    #[test]
    fn test_dictionary_keys() {
        let mut writer = XRefStreamWriter::new(ObjectId::new(9, 0));
        writer.add_entry(
            3,
            XRefEntry::InUse {
                offset: 100,
                generation: 0,
            },
        );
        writer.add_entry(
            4,
            XRefEntry::InUse {
                offset: 200,
                generation: 0,
            },
        );
        writer.add_entry(
            9,
            XRefEntry::InUse {
                offset: 300,
                generation: 0,
            },
        );

        let mut trailer = Dictionary::new();
        trailer.set("Root", ObjectId::new(1, 0));
        trailer.set("Size", 8);
        trailer.set("Prev", 40);
        trailer.set("Length", 5);
        let dict = writer.create_dictionary(&trailer);

        assert!(dict.is_type("XRef"));
        assert_eq!(dict.get_integer("Size"), Some(10));
        assert_eq!(dict.get_integer("Prev"), Some(40));
        assert_eq!(dict.get_reference("Root"), Some(ObjectId::new(1, 0)));
        assert!(!dict.contains_key("Length"));
        let index: Vec<i64> = dict
            .get_array("Index")
            .unwrap()
            .iter()
            .filter_map(Object::as_integer)
            .collect();
        assert_eq!(index, vec![3, 2, 9, 1]);
    }

    #[test]
    fn test_built_stream_reads_back() {
        let mut writer = XRefStreamWriter::new(ObjectId::new(2, 0));
        writer.add_entry(
            0,
            XRefEntry::Free {
                next_free: 0,
                generation: 65535,
            },
        );
        writer.add_entry(
            1,
            XRefEntry::InUse {
                offset: 15,
                generation: 0,
            },
        );
        writer.add_entry(
            2,
            XRefEntry::InUse {
                offset: 94,
                generation: 0,
            },
        );
        let mut trailer = Dictionary::new();
        trailer.set("Root", ObjectId::new(1, 0));

        let stream = writer.build(&trailer, true).unwrap();
        assert!(!stream.dict().contains_key("Index"));
        let options = ParseOptions::default();
        let data = stream.decode(&options).unwrap();
        let entries = xref_stream::parse_entries(stream.dict(), &data, 0, &options).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.get(&2),
            Some(&XRefEntry::InUse {
                offset: 94,
                generation: 0
            })
        );
    }
}
