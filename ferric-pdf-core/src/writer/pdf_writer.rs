//! Object serializer and classic cross-reference writer
//!
//! [`PdfWriter`] tracks the absolute byte position of everything it writes so
//! that xref entries can be produced for objects appended after an existing
//! file (incremental updates) as well as for fresh files.

use super::xref_stream_writer::XRefStreamWriter;
use crate::error::Result;
use crate::objects::{Dictionary, Object, ObjectId, PdfString, StringFormat};
use crate::parser::{PdfVersion, XRefEntry};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::Write;

/// Options for a full (non-incremental) save
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    /// Write an xref stream instead of a classic table
    pub use_xref_stream: bool,
    /// Flate-encode stream payloads that carry no filter
    pub compress_streams: bool,
    /// Header version; `None` keeps the source version
    pub version: Option<PdfVersion>,
}

impl SaveOptions {
    pub fn with_xref_stream(mut self, enabled: bool) -> Self {
        self.use_xref_stream = enabled;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_streams = enabled;
        self
    }

    pub fn with_version(mut self, version: PdfVersion) -> Self {
        self.version = Some(version);
        self
    }
}

pub struct PdfWriter<W: Write> {
    writer: W,
    position: u64,
    /// Entries for the next xref section, by object number
    entries: BTreeMap<u32, XRefEntry>,
}

impl<W: Write> PdfWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_position(writer, 0)
    }

    /// A writer whose first byte lands at absolute offset `position`.
    pub fn with_position(writer: W, position: u64) -> Self {
        Self {
            writer,
            position,
            entries: BTreeMap::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn entries(&self) -> &BTreeMap<u32, XRefEntry> {
        &self.entries
    }

    pub fn write_header(&mut self, version: PdfVersion) -> Result<()> {
        self.write_bytes(format!("%PDF-{version}\n").as_bytes())?;
        // Binary comment to ensure file is treated as binary
        self.write_bytes(&[b'%', 0xE2, 0xE3, 0xCF, 0xD3, b'\n'])?;
        Ok(())
    }

    /// Write `N G obj ... endobj` and record its offset.
    pub fn write_object(&mut self, id: ObjectId, object: &Object) -> Result<()> {
        self.entries.insert(
            id.number(),
            XRefEntry::InUse {
                offset: self.position,
                generation: id.generation(),
            },
        );
        let header = format!("{} {} obj\n", id.number(), id.generation());
        self.write_bytes(header.as_bytes())?;
        let mut body = Vec::new();
        write_object_value(&mut body, object)?;
        self.write_bytes(&body)?;
        self.write_bytes(b"\nendobj\n")?;
        Ok(())
    }

    /// Record a free entry for the next xref section.
    pub fn record_free(&mut self, number: u32, next_free: u32, generation: u16) {
        self.entries.insert(
            number,
            XRefEntry::Free {
                next_free: u64::from(next_free),
                generation,
            },
        );
    }

    /// Write the recorded entries as a classic table; returns its offset.
    ///
    /// Runs of consecutive object numbers become one subsection each.
    pub fn write_xref_table(&mut self) -> Result<u64> {
        let xref_offset = self.position;
        let mut out = String::from("xref\n");
        for (first, run) in contiguous_runs(&self.entries) {
            out.push_str(&format!("{first} {}\n", run.len()));
            for entry in run {
                let line = match entry {
                    XRefEntry::Free {
                        next_free,
                        generation,
                    } => format!("{next_free:010} {generation:05} f \n"),
                    XRefEntry::InUse { offset, generation } => {
                        format!("{offset:010} {generation:05} n \n")
                    }
                    // Never produced by this writer; tables cannot express it
                    XRefEntry::Compressed { .. } => continue,
                };
                out.push_str(&line);
            }
        }
        self.write_bytes(out.as_bytes())?;
        Ok(xref_offset)
    }

    pub fn write_trailer(&mut self, trailer: &Dictionary, xref_offset: u64) -> Result<()> {
        let mut body = b"trailer\n".to_vec();
        write_object_value(&mut body, &Object::Dictionary(trailer.clone()))?;
        self.write_bytes(&body)?;
        self.write_startxref(xref_offset)
    }

    /// Write the recorded entries as xref stream object `id`, carrying the
    /// trailer keys; returns its offset.
    pub fn write_xref_stream(
        &mut self,
        id: ObjectId,
        trailer: &Dictionary,
        compress: bool,
    ) -> Result<u64> {
        let xref_offset = self.position;
        self.entries.insert(
            id.number(),
            XRefEntry::InUse {
                offset: xref_offset,
                generation: id.generation(),
            },
        );
        let mut stream_writer = XRefStreamWriter::new(id);
        for (&number, entry) in &self.entries {
            stream_writer.add_entry(number, *entry);
        }
        let stream = stream_writer.build(trailer, compress)?;
        self.write_object(id, &Object::Stream(stream))?;
        self.write_startxref(xref_offset)?;
        Ok(xref_offset)
    }

    fn write_startxref(&mut self, xref_offset: u64) -> Result<()> {
        self.write_bytes(format!("\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Group entries into `(first, entries)` runs of consecutive numbers.
pub(crate) fn contiguous_runs(
    entries: &BTreeMap<u32, XRefEntry>,
) -> Vec<(u32, Vec<XRefEntry>)> {
    let mut runs: Vec<(u32, Vec<XRefEntry>)> = Vec::new();
    for (&number, entry) in entries {
        match runs.last_mut() {
            Some((first, run)) if u64::from(*first) + run.len() as u64 == u64::from(number) => {
                run.push(*entry)
            }
            _ => runs.push((number, vec![*entry])),
        }
    }
    runs
}

/// Serialize `object` in PDF syntax.
///
/// Dictionary keys are sorted. A stream's `/Length` is rewritten to match
/// its payload.
pub fn write_object_value<W: Write + ?Sized>(out: &mut W, object: &Object) -> Result<()> {
    match object {
        Object::Null => out.write_all(b"null")?,
        Object::Boolean(b) => out.write_all(if *b { b"true" } else { b"false" })?,
        Object::Integer(i) => write!(out, "{i}")?,
        Object::Real(r) => out.write_all(format_real(*r).as_bytes())?,
        Object::String(s) => write_string(out, s)?,
        Object::Name(n) => write_name(out, n)?,
        Object::Array(items) => {
            out.write_all(b"[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_all(b" ")?;
                }
                write_object_value(out, item)?;
            }
            out.write_all(b"]")?;
        }
        Object::Dictionary(dict) => write_dictionary(out, dict, None)?,
        Object::Stream(stream) => {
            write_dictionary(out, stream.dict(), Some(stream.data().len()))?;
            out.write_all(b"\nstream\n")?;
            out.write_all(stream.data())?;
            out.write_all(b"\nendstream")?;
        }
        Object::Reference(id) => write!(out, "{} {} R", id.number(), id.generation())?,
    }
    Ok(())
}

/// [`write_object_value`] into a fresh buffer.
pub fn serialize(object: &Object) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail
    let _ = write_object_value(&mut out, object);
    out
}

fn write_dictionary<W: Write + ?Sized>(
    out: &mut W,
    dict: &Dictionary,
    length: Option<usize>,
) -> Result<()> {
    out.write_all(b"<<")?;
    let mut wrote_length = false;
    for (key, value) in dict.sorted_entries() {
        out.write_all(b" ")?;
        write_name(out, key)?;
        out.write_all(b" ")?;
        match length {
            Some(len) if key == "Length" => {
                write!(out, "{len}")?;
                wrote_length = true;
            }
            _ => write_object_value(out, value)?,
        }
    }
    if let (Some(len), false) = (length, wrote_length) {
        write!(out, " /Length {len}")?;
    }
    out.write_all(b" >>")?;
    Ok(())
}

fn write_name<W: Write + ?Sized>(out: &mut W, name: &str) -> Result<()> {
    let mut bytes = vec![b'/'];
    for ch in name.chars() {
        let mut utf8 = [0u8; 4];
        let raw: &[u8] = match u8::try_from(u32::from(ch)) {
            Ok(b) => &[b][..],
            Err(_) => ch.encode_utf8(&mut utf8).as_bytes(),
        };
        for &b in raw.iter() {
            if needs_name_escape(b) {
                bytes.extend_from_slice(format!("#{b:02X}").as_bytes());
            } else {
                bytes.push(b);
            }
        }
    }
    out.write_all(&bytes)?;
    Ok(())
}

fn needs_name_escape(b: u8) -> bool {
    !(0x21..=0x7E).contains(&b)
        || matches!(
            b,
            b'#' | b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}'
        )
}

fn write_string<W: Write + ?Sized>(out: &mut W, s: &PdfString) -> Result<()> {
    if s.format() == StringFormat::Hex {
        out.write_all(b"<")?;
        for b in s.as_bytes() {
            write!(out, "{b:02X}")?;
        }
        out.write_all(b">")?;
        return Ok(());
    }
    let mut bytes = Vec::with_capacity(s.as_bytes().len() + 2);
    bytes.push(b'(');
    for &b in s.as_bytes() {
        match b {
            b'\\' => bytes.extend_from_slice(b"\\\\"),
            b'(' => bytes.extend_from_slice(b"\\("),
            b')' => bytes.extend_from_slice(b"\\)"),
            b'\r' => bytes.extend_from_slice(b"\\r"),
            b'\n' => bytes.extend_from_slice(b"\\n"),
            _ => bytes.push(b),
        }
    }
    bytes.push(b')');
    out.write_all(&bytes)?;
    Ok(())
}

/// Reals never use exponent notation, which PDF does not allow.
pub(crate) fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let text = format!("{value:.10}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// A fresh 16 byte file identifier derived from the current time and `seed`.
pub(crate) fn generate_file_id(seed: &[u8]) -> Vec<u8> {
    let now = Utc::now();
    let mut context = md5::Context::new();
    context.consume(now.to_rfc3339().as_bytes());
    context.consume(now.timestamp_subsec_nanos().to_be_bytes());
    context.consume(seed);
    context.finalize().0.to_vec()
}
