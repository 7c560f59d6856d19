//! Byte-level PDF builder shared by the integration tests.
//!
//! Offsets are tracked as objects are appended so the produced
//! cross-reference data is exact.

#![allow(dead_code)]

use std::collections::BTreeMap;

pub struct PdfBuilder {
    buf: Vec<u8>,
    offsets: BTreeMap<u32, usize>,
}

impl PdfBuilder {
    pub fn new(version: &str) -> Self {
        let mut buf = format!("%PDF-{version}\n").into_bytes();
        buf.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            offsets: BTreeMap::new(),
        }
    }

    pub fn object(&mut self, number: u32, body: &str) -> &mut Self {
        self.offsets.insert(number, self.buf.len());
        self.buf
            .extend_from_slice(format!("{number} 0 obj\n{body}\nendobj\n").as_bytes());
        self
    }

    pub fn stream(&mut self, number: u32, extra_keys: &str, data: &[u8]) -> &mut Self {
        self.offsets.insert(number, self.buf.len());
        self.buf.extend_from_slice(
            format!(
                "{number} 0 obj\n<< /Length {} {extra_keys} >>\nstream\n",
                data.len()
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn offset_of(&self, number: u32) -> usize {
        self.offsets[&number]
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Classic xref table covering objects `0..size`, then trailer and startxref.
    pub fn finish_with_table(mut self, trailer_extra: &str) -> Vec<u8> {
        let size = self.offsets.keys().next_back().map_or(1, |n| n + 1);
        let xref_offset = self.buf.len();
        let mut xref = format!("xref\n0 {size}\n");
        for number in 0..size {
            match self.offsets.get(&number) {
                Some(offset) => xref.push_str(&format!("{offset:010} 00000 n \n")),
                None if number == 0 => xref.push_str("0000000000 65535 f \n"),
                None => xref.push_str("0000000000 00001 f \n"),
            }
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {size} /Root 1 0 R {trailer_extra} >>\nstartxref\n{xref_offset}\n%%EOF\n"
        ));
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Catalog (1) and an empty page tree (2).
pub fn minimal_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    pdf.finish_with_table("")
}

/// The `startxref` value of the last section in `data`.
pub fn last_startxref(data: &[u8]) -> u64 {
    let at = data
        .windows(9)
        .rposition(|w| w == b"startxref")
        .expect("no startxref");
    String::from_utf8_lossy(&data[at + 9..])
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .expect("startxref offset")
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
