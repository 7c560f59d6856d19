//! Cross-reference reading through the public document API
//!
//! Covers classic tables, xref streams, hybrid files and `/Prev` chains,
//! including the malformed variants a reader has to survive.

mod common;

use common::{hex, PdfBuilder};
use ferric_pdf::{Document, ErrorKind, Object, ObjectId, ParseOptions, XRefEntry};
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn open_with(data: Vec<u8>, options: ParseOptions) -> ferric_pdf::Result<Document<Cursor<Vec<u8>>>> {
    Document::from_device(Cursor::new(data), options, "")
}

#[test]
fn test_classic_table_with_crlf_entries() {
    let mut data = b"%PDF-1.4\n%abcdefg\n".to_vec();
    assert_eq!(data.len(), 18);
    data.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    data.resize(77, b'\n');
    data.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
    let xref_offset = data.len();
    data.extend_from_slice(
        b"xref\r\n0 3\r\n0000000000 65535 f\r\n0000000018 00000 n\r\n0000000077 00000 n\r\n",
    );
    data.extend_from_slice(b"trailer\r\n<< /Root 1 0 R /Size 3 >>\r\n");
    data.extend_from_slice(format!("startxref\r\n{xref_offset}\r\n%%EOF\r\n").as_bytes());

    let mut doc = Document::from_bytes(data).unwrap();
    let xref = doc.xref().unwrap();
    assert_eq!(xref.len(), 3);
    assert!(xref.get(0).unwrap().is_free());
    assert_eq!(
        xref.get(1),
        Some(&XRefEntry::InUse {
            offset: 18,
            generation: 0
        })
    );
    assert_eq!(
        xref.get(2),
        Some(&XRefEntry::InUse {
            offset: 77,
            generation: 0
        })
    );
    assert!(doc.catalog().unwrap().is_type("Catalog"));
}

#[test]
fn test_xref_stream_with_hex_filter() {
    let mut pdf = PdfBuilder::new("1.5");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    let xref_offset = pdf.position();

    let mut records = vec![0u8, 0, 0, 0xFF];
    for number in [1u32, 2] {
        let offset = pdf.offset_of(number) as u16;
        records.push(1);
        records.extend_from_slice(&offset.to_be_bytes());
        records.push(0);
    }
    records.extend_from_slice(&[1, (xref_offset >> 8) as u8, xref_offset as u8, 0]);
    let encoded = format!("{}>", hex(&records));
    pdf.stream(
        3,
        "/Type /XRef /Size 4 /W [1 2 1] /Root 1 0 R /Filter /ASCIIHexDecode",
        encoded.as_bytes(),
    );
    pdf.raw(format!("startxref\n{xref_offset}\n%%EOF\n").as_bytes());

    let mut doc = Document::from_bytes(pdf.into_bytes()).unwrap();
    let xref = doc.xref().unwrap();
    assert_eq!(xref.len(), 4);
    assert_eq!(
        xref.get(0),
        Some(&XRefEntry::Free {
            next_free: 0,
            generation: 255
        })
    );
    assert_eq!(
        xref.get(3),
        Some(&XRefEntry::InUse {
            offset: xref_offset as u64,
            generation: 0
        })
    );
    assert!(doc.catalog().unwrap().is_type("Catalog"));
    assert_eq!(
        doc.get_object(ObjectId::new(2, 0))
            .unwrap()
            .as_dict()
            .unwrap()
            .get_integer("Count"),
        Some(0)
    );
}

#[test]
fn test_hybrid_file_reads_compressed_objects() {
    let mut pdf = PdfBuilder::new("1.5");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    pdf.stream(5, "/Type /ObjStm /N 1 /First 4", b"3 0\n(hidden)");
    let stm_offset = pdf.position();
    // Object 3 lives in object stream 5, index 0
    pdf.stream(
        6,
        "/Type /XRef /Size 7 /W [1 2 1] /Index [3 1]",
        &[2, 0, 5, 0],
    );
    let data = pdf.finish_with_table(&format!("/XRefStm {stm_offset}"));

    let mut doc = Document::from_bytes(data).unwrap();
    assert_eq!(
        doc.xref().unwrap().get(3),
        Some(&XRefEntry::Compressed {
            stream_number: 5,
            index: 0
        })
    );
    assert_eq!(
        doc.get_object(ObjectId::new(3, 0)).unwrap(),
        &Object::string(b"hidden".to_vec())
    );
    assert_eq!(
        doc.trailer().dict().get_integer("XRefStm"),
        Some(stm_offset as i64)
    );
}

#[test]
fn test_prev_chain_newest_entry_wins() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
    pdf.object(3, "(first)");
    let first = pdf.finish_with_table("");
    let first_startxref = common::last_startxref(&first);

    // Append an update that redefines object 3
    let mut data = first;
    let offset = data.len();
    data.extend_from_slice(b"3 0 obj\n(second)\nendobj\n");
    let xref_offset = data.len();
    data.extend_from_slice(
        format!(
            "xref\n3 1\n{offset:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R /Prev {first_startxref} >>\nstartxref\n{xref_offset}\n%%EOF\n"
        )
        .as_bytes(),
    );

    let mut doc = Document::from_bytes(data).unwrap();
    assert_eq!(doc.xref().unwrap().sections().len(), 2);
    assert_eq!(
        doc.get_object(ObjectId::new(3, 0)).unwrap(),
        &Object::string(b"second".to_vec())
    );
    assert_eq!(
        doc.trailer().dict().get_integer("Prev"),
        Some(first_startxref as i64)
    );
}

#[test]
fn test_prev_cycle_is_invalid_xref() {
    let mut data = common::minimal_pdf();
    let startxref = common::last_startxref(&data);
    // Point the only section at itself
    let at = data
        .windows(7)
        .rposition(|w| w == b"/Size 3")
        .expect("trailer");
    let patched = format!("/Prev {startxref} /Size 3");
    data.splice(at..at + 7, patched.bytes());
    // The table itself did not move, startxref still matches
    let err = open_with(data.clone(), ParseOptions::default())
        .err()
        .expect("cycle must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidXRef);

    // Strict mode fails the same way
    let err = open_with(data, ParseOptions::strict()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidXRef);
}

#[test]
fn test_subsection_beyond_object_limit() {
    let mut data = b"%PDF-1.4\n".to_vec();
    let xref_offset = data.len();
    data.extend_from_slice(
        format!(
            "xref\n4294967295 2\n0000000000 65535 f \n0000000000 65535 f \ntrailer\n<< /Size 1 /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n"
        )
        .as_bytes(),
    );
    let err = open_with(data, ParseOptions::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidXRef);
}

#[test]
fn test_object_limit_from_options() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, "<< /Type /Catalog >>");
    pdf.object(40, "null");
    let data = pdf.finish_with_table("");

    assert!(open_with(data.clone(), ParseOptions::default()).is_ok());
    let err = open_with(data, ParseOptions::default().with_max_object_count(10))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidXRef);
}

#[test]
fn test_missing_startxref() {
    let mut data = common::minimal_pdf();
    let at = data.windows(9).rposition(|w| w == b"startxref").unwrap();
    data.truncate(at);
    let err = open_with(data.clone(), ParseOptions::default())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::NoXRef);

    // Recovery rebuilds the index from the object headers
    let mut doc = open_with(data, ParseOptions::lenient()).unwrap();
    assert!(doc.xref().unwrap().is_recovered());
    assert!(doc.catalog().unwrap().is_type("Catalog"));
}
