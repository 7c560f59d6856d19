//! Lazy PDF reader
//!
//! [`PdfReader`] owns the input device and the merged cross-reference index.
//! Objects are parsed only when asked for: offset-addressed objects are read
//! in place, compressed ones through their (cached) object stream.

use super::encryption_handler::EncryptionHandler;
use super::header::{PdfHeader, PdfVersion};
use super::lexer::Lexer;
use super::object_stream::ObjectStream;
use super::objects::{expect_endobj, parse_indirect_header, read_stream_payload, IndirectBody};
use super::recovery;
use super::stack_safe::StackSafeContext;
use super::trailer::PdfTrailer;
use super::xref;
use super::xref_types::{XRefEntry, XRefIndex};
use crate::config::ParseOptions;
use crate::error::{ErrorKind, PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, trace, warn};

/// Low level reader over a seekable PDF source
pub struct PdfReader<R: Read + Seek> {
    lexer: Lexer<R>,
    file_len: u64,
    header: PdfHeader,
    xref: XRefIndex,
    trailer: PdfTrailer,
    options: ParseOptions,
    /// Set once the `/Encrypt` dictionary was unlocked
    encryption: Option<EncryptionHandler>,
    /// Parsed object streams by container object number
    object_streams: HashMap<u32, ObjectStream>,
    /// Objects currently being loaded, for `/Length` cycles
    loading: StackSafeContext,
}

impl<R: Read + Seek> PdfReader<R> {
    /// Read the header, cross-reference data and trailer of `source`.
    ///
    /// `password` is only consulted for encrypted files; pass an empty slice
    /// to try the empty user password.
    pub fn new(source: R, options: ParseOptions, password: &[u8]) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        lexer.set_strict(options.strict);
        let file_len = lexer.len()?;
        let header = PdfHeader::parse(&mut lexer, &options)?;
        debug!("PDF {} header at offset {}, {file_len} bytes", header.version, header.offset);

        let (xref, trailer) = match xref::load_xref(&mut lexer, file_len, &options) {
            Ok(loaded) => loaded,
            Err(err) if options.recover_xref && is_recoverable(&err) => {
                warn!("Cross-reference data unusable ({err}), rebuilding from object headers");
                recovery::rebuild_xref(&mut lexer, file_len, &options)?
            }
            Err(err) => return Err(err),
        };
        let trailer = PdfTrailer::new(trailer, xref.startxref());

        let mut reader = Self {
            lexer,
            file_len,
            header,
            xref,
            trailer,
            options,
            encryption: None,
            object_streams: HashMap::new(),
            loading: StackSafeContext::new(usize::MAX),
        };
        reader.unlock(password)?;
        Ok(reader)
    }

    fn unlock(&mut self, password: &[u8]) -> Result<()> {
        let Some(encrypt) = self.trailer.encrypt().cloned() else {
            return Ok(());
        };
        // Loaded before the handler exists, so it is read in the clear
        let (dict, encrypt_id) = match encrypt {
            Object::Reference(id) => match self.load_object(id)? {
                Object::Dictionary(dict) => (dict, Some(id)),
                other => {
                    return Err(PdfError::InvalidEncryptionDict(format!(
                        "/Encrypt {id} is a {}",
                        other.type_name()
                    )))
                }
            },
            Object::Dictionary(dict) => (dict, None),
            other => {
                return Err(PdfError::InvalidEncryptionDict(format!(
                    "/Encrypt is a {}",
                    other.type_name()
                )))
            }
        };
        let file_id = self
            .trailer
            .id()
            .map(|(first, _)| first.to_vec())
            .unwrap_or_default();
        self.encryption = Some(EncryptionHandler::new(
            &dict,
            encrypt_id,
            &file_id,
            password,
        )?);
        Ok(())
    }

    pub fn header(&self) -> &PdfHeader {
        &self.header
    }

    pub fn version(&self) -> PdfVersion {
        self.header.version
    }

    pub fn xref(&self) -> &XRefIndex {
        &self.xref
    }

    pub(crate) fn xref_mut(&mut self) -> &mut XRefIndex {
        &mut self.xref
    }

    pub fn trailer(&self) -> &PdfTrailer {
        &self.trailer
    }

    /// Replace the trailer after an update was appended to the source.
    pub(crate) fn set_trailer(&mut self, trailer: PdfTrailer) {
        self.trailer = trailer;
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Length of the source when it was opened, or after the last update
    /// appended through this reader's document.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub(crate) fn set_file_len(&mut self, len: u64) {
        self.file_len = len;
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn encryption_handler(&self) -> Option<&EncryptionHandler> {
        self.encryption.as_ref()
    }

    /// Parse the object `id` from the source.
    ///
    /// Nothing is cached except object stream containers; callers own the
    /// returned value.
    pub fn load_object(&mut self, id: ObjectId) -> Result<Object> {
        let entry = self
            .xref
            .get(id.number())
            .copied()
            .ok_or(PdfError::NoObject(id))?;
        match entry {
            XRefEntry::Free { .. } => Err(PdfError::NoObject(id)),
            XRefEntry::InUse { generation, .. } if generation != id.generation() => {
                Err(PdfError::NoObject(id))
            }
            XRefEntry::InUse { offset, .. } => {
                self.loading.push_ref(id)?;
                let result = self.load_at(id, offset);
                self.loading.pop_ref(id);
                result
            }
            XRefEntry::Compressed { .. } if id.generation() != 0 => Err(PdfError::NoObject(id)),
            XRefEntry::Compressed {
                stream_number,
                index,
            } => self.load_compressed(id, stream_number, index),
        }
    }

    fn load_at(&mut self, id: ObjectId, offset: u64) -> Result<Object> {
        if offset >= self.file_len {
            return Err(PdfError::broken(
                offset,
                format!("object {id} starts beyond end of file ({})", self.file_len),
            ));
        }
        trace!("Loading {id} at offset {offset}");
        self.lexer.seek(offset)?;
        let (found, body) = parse_indirect_header(&mut self.lexer, &self.options)?;
        if found != id {
            if self.options.strict {
                return Err(PdfError::broken(
                    offset,
                    format!("expected object {id}, found {found}"),
                ));
            }
            warn!("Xref entry for {id} points at object {found} (offset {offset})");
        }

        let mut object = match body {
            IndirectBody::Object(object) => {
                expect_endobj(&mut self.lexer, &self.options)?;
                object
            }
            IndirectBody::Stream { dict, data_offset } => {
                let length = self.stream_length(&dict)?;
                let data = read_stream_payload(
                    &mut self.lexer,
                    data_offset,
                    length,
                    self.file_len,
                    &self.options,
                )?;
                expect_endobj(&mut self.lexer, &self.options)?;
                let data = match &self.encryption {
                    Some(handler) => handler.decrypt_stream(id, &dict, &data)?,
                    None => data,
                };
                Object::Stream(Stream::new(dict, data))
            }
        };

        if let Some(handler) = &self.encryption {
            handler.decrypt_object(id, &mut object)?;
        }
        Ok(object)
    }

    /// `/Length` of a stream, following an indirect reference.
    ///
    /// `None` lets the payload reader fall back to scanning for `endstream`.
    fn stream_length(&mut self, dict: &Dictionary) -> Result<Option<u64>> {
        match dict.get("Length") {
            Some(Object::Integer(len)) => Ok(u64::try_from(*len).ok()),
            Some(Object::Reference(len_id)) => {
                let len_id = *len_id;
                match self.load_object(len_id) {
                    Ok(Object::Integer(len)) => Ok(u64::try_from(len).ok()),
                    Ok(other) => {
                        warn!("/Length {len_id} is a {}", other.type_name());
                        Ok(None)
                    }
                    Err(err) if err.kind() == ErrorKind::NoObject => {
                        warn!("/Length {len_id} does not exist");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
            _ => Ok(None),
        }
    }

    fn load_compressed(&mut self, id: ObjectId, stream_number: u32, index: u32) -> Result<Object> {
        self.ensure_object_stream(stream_number, id)?;
        let container = self
            .object_streams
            .get(&stream_number)
            .ok_or(PdfError::NoObject(ObjectId::new(stream_number, 0)))?;
        trace!("Loading {id} from object stream {stream_number}, index {index}");
        container.get(index, id.number(), &self.options)
    }

    fn ensure_object_stream(&mut self, stream_number: u32, for_id: ObjectId) -> Result<()> {
        if self.object_streams.contains_key(&stream_number) {
            return Ok(());
        }
        let container_id = ObjectId::new(stream_number, 0);
        match self.xref.get(stream_number) {
            Some(XRefEntry::InUse { .. }) => {}
            Some(XRefEntry::Compressed { .. }) => {
                return Err(PdfError::broken(
                    0,
                    format!("object stream {container_id} is itself compressed"),
                ))
            }
            _ => {
                return Err(PdfError::broken(
                    0,
                    format!("object stream {container_id} holding {for_id} does not exist"),
                ))
            }
        }

        let stream = match self.load_object(container_id)? {
            Object::Stream(stream) => stream,
            other => {
                return Err(PdfError::broken(
                    0,
                    format!("object stream {container_id} is a {}", other.type_name()),
                ))
            }
        };
        let data = stream.decode(&self.options)?;
        let parsed = ObjectStream::parse(container_id, stream.dict(), data, &self.options)?;
        debug!("Loaded object stream {container_id} with {} objects", parsed.len());
        self.object_streams.insert(stream_number, parsed);
        Ok(())
    }

    /// Drop parsed object streams; they are reparsed on the next access.
    pub fn clear_object_stream_cache(&mut self) {
        self.object_streams.clear();
    }

    /// Read raw bytes from the source without disturbing object loading.
    pub fn read_raw(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.lexer.read_at(offset, len)
    }

    /// Copy the source as it was opened into `out`.
    pub(crate) fn copy_source_to<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<u64> {
        let len = self.file_len;
        let source = self.lexer.get_mut();
        source.seek(SeekFrom::Start(0))?;
        let copied = io::copy(&mut source.by_ref().take(len), out)?;
        // Resynchronize the buffered lexer with the moved source
        self.lexer.seek(0)?;
        if copied != len {
            return Err(PdfError::broken(copied, "source shrank while copying"));
        }
        Ok(copied)
    }

    /// Current length of the source, which may differ from [`file_len`](Self::file_len)
    /// if something else wrote to it.
    pub(crate) fn current_len(&mut self) -> Result<u64> {
        self.lexer.len()
    }
}

fn is_recoverable(err: &PdfError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NoXRef | ErrorKind::InvalidXRef | ErrorKind::InvalidXRefStream | ErrorKind::BrokenFile
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::{minimal_pdf, TestPdf};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn open(data: Vec<u8>) -> PdfReader<Cursor<Vec<u8>>> {
        PdfReader::new(Cursor::new(data), ParseOptions::default(), b"").unwrap()
    }

    #[test]
    fn test_open_minimal() {
        let mut reader = open(minimal_pdf());
        assert_eq!(reader.version(), PdfVersion::V1_4);
        assert_eq!(reader.xref().len(), 3);
        assert_eq!(reader.trailer().root().unwrap(), ObjectId::new(1, 0));
        assert!(!reader.is_encrypted());

        let catalog = reader.load_object(ObjectId::new(1, 0)).unwrap();
        assert!(catalog.as_dict().unwrap().is_type("Catalog"));
    }

    #[test]
    fn test_free_and_missing_objects() {
        let mut reader = open(minimal_pdf());
        for id in [ObjectId::new(0, 65535), ObjectId::new(9, 0), ObjectId::new(1, 3)] {
            let err = reader.load_object(id).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NoObject, "{id}");
        }
    }

    #[test]
    fn test_stream_with_indirect_length() {
        let mut pdf = TestPdf::new("1.5");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.raw_object(2, b"<< /Length 3 0 R >>\nstream\nhello world\nendstream");
        pdf.object(3, "11");
        let mut reader = open(pdf.finish_with_table(""));

        let object = reader.load_object(ObjectId::new(2, 0)).unwrap();
        assert_eq!(object.as_stream().unwrap().data(), b"hello world");
    }

    #[test]
    fn test_self_referential_length() {
        let mut pdf = TestPdf::new("1.5");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.raw_object(2, b"<< /Length 2 0 R >>\nstream\nabc\nendstream");
        let mut reader = open(pdf.finish_with_table(""));

        let err = reader.load_object(ObjectId::new(2, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenFile);
    }

    #[test]
    fn test_wrong_length_lenient_and_strict() {
        let mut pdf = TestPdf::new("1.5");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.raw_object(2, b"<< /Length 4 >>\nstream\nlonger payload\nendstream");
        let data = pdf.finish_with_table("");

        let mut reader = open(data.clone());
        let object = reader.load_object(ObjectId::new(2, 0)).unwrap();
        assert_eq!(object.as_stream().unwrap().data(), b"longer payload");

        let mut strict = PdfReader::new(Cursor::new(data), ParseOptions::strict(), b"").unwrap();
        let err = strict.load_object(ObjectId::new(2, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenFile);
    }

    #[test]
    fn test_length_beyond_file_is_rescanned_not_allocated() {
        let mut pdf = TestPdf::new("1.5");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.raw_object(2, b"<< /Length 99999999999999 >>\nstream\nabc\nendstream");
        let data = pdf.finish_with_table("");

        let mut reader = open(data.clone());
        let object = reader.load_object(ObjectId::new(2, 0)).unwrap();
        assert_eq!(object.as_stream().unwrap().data(), b"abc");

        let mut strict = PdfReader::new(Cursor::new(data), ParseOptions::strict(), b"").unwrap();
        let err = strict.load_object(ObjectId::new(2, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenFile);
    }

    #[test]
    fn test_header_id_mismatch() {
        let mut pdf = TestPdf::new("1.4");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.object(2, "(two)");
        let mut data = pdf.finish_with_table("");
        // Rename object 2 in place; the xref still points there
        let at = data.windows(7).position(|w| w == b"2 0 obj").unwrap();
        data[at] = b'7';

        let mut reader = open(data.clone());
        assert_eq!(
            reader.load_object(ObjectId::new(2, 0)).unwrap(),
            Object::string(b"two".to_vec())
        );
        let mut strict = PdfReader::new(Cursor::new(data), ParseOptions::strict(), b"").unwrap();
        let err = strict.load_object(ObjectId::new(2, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenFile);
    }

    #[test]
    fn test_compressed_objects() {
        let mut pdf = TestPdf::new("1.5");
        pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        pdf.object_stream(5, &[(2, "<< /Type /Pages /Count 0 >>"), (3, "[1 2 3]")]);
        let mut reader = open(pdf.finish_with_stream(6, ""));

        assert_eq!(
            reader.xref().get(3),
            Some(&XRefEntry::Compressed {
                stream_number: 5,
                index: 1
            })
        );
        let pages = reader.load_object(ObjectId::new(2, 0)).unwrap();
        assert!(pages.as_dict().unwrap().is_type("Pages"));
        let array = reader.load_object(ObjectId::new(3, 0)).unwrap();
        assert_eq!(array.as_array().unwrap().len(), 3);
        assert_eq!(
            reader.load_object(ObjectId::new(3, 1)).unwrap_err().kind(),
            ErrorKind::NoObject
        );
    }

    #[test]
    fn test_offset_beyond_file() {
        let mut pdf = TestPdf::new("1.4");
        pdf.object(1, "<< /Type /Catalog >>");
        let mut reader = open(pdf.finish_with_table(""));
        reader.xref_mut().insert(
            4,
            XRefEntry::InUse {
                offset: 1 << 40,
                generation: 0,
            },
        );
        let err = reader.load_object(ObjectId::new(4, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenFile);
    }

    #[test]
    fn test_recovery_is_opt_in() {
        let mut data = minimal_pdf();
        let at = data.windows(9).rposition(|w| w == b"startxref").unwrap();
        data.truncate(at);

        let err = PdfReader::new(Cursor::new(data.clone()), ParseOptions::default(), b"")
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NoXRef);

        let mut reader = PdfReader::new(Cursor::new(data), ParseOptions::lenient(), b"").unwrap();
        assert!(reader.xref().is_recovered());
        assert_eq!(reader.trailer().root().unwrap(), ObjectId::new(1, 0));
        assert!(reader.load_object(ObjectId::new(2, 0)).is_ok());
    }

    #[test]
    fn test_copy_source() {
        let data = minimal_pdf();
        let mut reader = open(data.clone());
        reader.load_object(ObjectId::new(1, 0)).unwrap();
        let mut out = Vec::new();
        assert_eq!(reader.copy_source_to(&mut out).unwrap(), data.len() as u64);
        assert_eq!(out, data);
        // Still usable afterwards
        assert!(reader.load_object(ObjectId::new(2, 0)).is_ok());
    }
}
