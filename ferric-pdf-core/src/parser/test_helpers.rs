//! Helper functions for creating valid test PDFs with correct offsets

use std::collections::BTreeMap;

/// Where [`TestPdf`] put an object
#[derive(Debug, Clone, Copy)]
enum Placed {
    Offset(usize),
    InStream(u32, u32),
}

/// Incrementally builds a PDF while recording object offsets
pub struct TestPdf {
    buf: Vec<u8>,
    placed: BTreeMap<u32, Placed>,
}

impl TestPdf {
    /// Header plus binary marker line.
    pub fn new(version: &str) -> Self {
        let mut buf = format!("%PDF-{version}\n").into_bytes();
        buf.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            placed: BTreeMap::new(),
        }
    }

    pub fn object(&mut self, number: u32, body: &str) -> &mut Self {
        self.raw_object(number, body.as_bytes())
    }

    /// An object whose body is given as raw bytes (streams included).
    pub fn raw_object(&mut self, number: u32, body: &[u8]) -> &mut Self {
        self.placed.insert(number, Placed::Offset(self.buf.len()));
        self.buf
            .extend_from_slice(format!("{number} 0 obj\n").as_bytes());
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
        self
    }

    /// A stream object with an exact direct `/Length`.
    pub fn stream(&mut self, number: u32, extra_keys: &str, data: &[u8]) -> &mut Self {
        let mut body = format!("<< /Length {} {extra_keys} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.raw_object(number, &body)
    }

    /// An unfiltered `/Type /ObjStm` holding `objects`.
    pub fn object_stream(&mut self, number: u32, objects: &[(u32, &str)]) -> &mut Self {
        let mut header = String::new();
        let mut body = String::new();
        for (index, (inner, text)) in objects.iter().enumerate() {
            header.push_str(&format!("{inner} {} ", body.len()));
            body.push_str(text);
            body.push(' ');
            self.placed
                .insert(*inner, Placed::InStream(number, index as u32));
        }
        let first = header.len();
        header.push_str(&body);
        let keys = format!("/Type /ObjStm /N {} /First {first}", objects.len());
        self.stream(number, &keys, header.as_bytes())
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn offset_of(&self, number: u32) -> Option<usize> {
        match self.placed.get(&number) {
            Some(Placed::Offset(offset)) => Some(*offset),
            _ => None,
        }
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn size(&self) -> u32 {
        self.placed.keys().next_back().map_or(1, |n| n + 1)
    }

    /// Append a classic xref table, trailer and `startxref`.
    pub fn finish_with_table(mut self, trailer_extra: &str) -> Vec<u8> {
        let size = self.size();
        let xref_offset = self.buf.len();
        let mut xref = format!("xref\n0 {size}\n");
        for number in 0..size {
            match self.placed.get(&number) {
                Some(Placed::Offset(offset)) => xref.push_str(&format!("{offset:010} 00000 n \n")),
                _ if number == 0 => xref.push_str("0000000000 65535 f \n"),
                _ => xref.push_str("0000000000 00001 f \n"),
            }
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {size} /Root 1 0 R {trailer_extra} >>\nstartxref\n{xref_offset}\n%%EOF\n"
        ));
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }

    /// Append an unfiltered xref stream as object `number` with `/W [1 4 2]`.
    pub fn finish_with_stream(mut self, number: u32, trailer_extra: &str) -> Vec<u8> {
        let xref_offset = self.buf.len();
        self.placed.insert(number, Placed::Offset(xref_offset));
        let size = self.size();
        let mut records = Vec::new();
        for n in 0..size {
            let (kind, field2, field3): (u8, u32, u16) = match self.placed.get(&n) {
                Some(Placed::Offset(offset)) => (1, *offset as u32, 0),
                Some(Placed::InStream(stream, index)) => (2, *stream, *index as u16),
                None if n == 0 => (0, 0, 65535),
                None => (0, 0, 1),
            };
            records.push(kind);
            records.extend_from_slice(&field2.to_be_bytes());
            records.extend_from_slice(&field3.to_be_bytes());
        }
        let keys = format!("/Type /XRef /Size {size} /W [1 4 2] /Root 1 0 R {trailer_extra}");
        self.stream(number, &keys, &records);
        self.buf
            .extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF\n").as_bytes());
        self.buf
    }
}

/// Catalog (1) and empty page tree (2) with a classic xref table.
pub fn minimal_pdf() -> Vec<u8> {
    let mut pdf = TestPdf::new("1.4");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    pdf.finish_with_table("")
}
