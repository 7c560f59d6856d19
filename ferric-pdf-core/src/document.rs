//! PDF documents
//!
//! A [`Document`] ties a lazily read source ([`PdfReader`]) to the
//! [`IndirectObjectTable`] that owns every object held in memory. Objects are
//! loaded on first access, may be changed or created, and are written back
//! either as a complete new file or as an incremental update.
//!
//! # Example
//!
//! ```rust,no_run
//! use ferric_pdf::{Document, Object};
//!
//! let mut doc = Document::open("input.pdf")?;
//! let root = doc.trailer().root()?;
//! let mut catalog = doc.get_object(root)?.clone();
//! if let Object::Dictionary(dict) = &mut catalog {
//!     dict.set("PageMode", Object::name("UseOutlines"));
//! }
//! doc.set_object(root, catalog);
//! doc.save_update("input.pdf")?;
//! # Ok::<(), ferric_pdf::PdfError>(())
//! ```

mod save;

use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, IndirectObjectTable, Object, ObjectId};
use crate::parser::{PdfReader, PdfTrailer, PdfVersion, XRefEntry, XRefIndex};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest chain of indirect objects that only hold another reference.
const MAX_REFERENCE_CHAIN: usize = 32;

static NULL: Object = Object::Null;

/// A PDF document backed by a seekable source, or held entirely in memory.
pub struct Document<R: Read + Seek = File> {
    /// `None` for documents created with [`Document::new`]
    reader: Option<PdfReader<R>>,
    table: IndirectObjectTable,
    trailer: PdfTrailer,
    version: PdfVersion,
    options: ParseOptions,
    /// Path of the source file, when opened from one
    path: Option<PathBuf>,
}

enum Step {
    Found,
    Follow(ObjectId),
    Dangling,
}

impl Document<File> {
    /// Creates an empty in-memory document with a catalog and an empty page tree.
    pub fn new() -> Self {
        let catalog_id = ObjectId::new(1, 0);
        let pages_id = ObjectId::new(2, 0);
        let mut table = IndirectObjectTable::new(3);

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::name("Catalog"));
        catalog.set("Pages", pages_id);
        table.set_modified(catalog_id, Object::Dictionary(catalog));

        let mut pages = Dictionary::new();
        pages.set("Type", Object::name("Pages"));
        pages.set("Kids", Vec::<Object>::new());
        pages.set("Count", 0);
        table.set_modified(pages_id, Object::Dictionary(pages));

        let mut trailer = Dictionary::new();
        trailer.set("Root", catalog_id);
        trailer.set("Size", 3);

        Self {
            reader: None,
            table,
            trailer: PdfTrailer::new(trailer, 0),
            version: PdfVersion::V1_7,
            options: ParseOptions::default(),
            path: None,
        }
    }

    /// Open a file with default options and the empty user password.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, ParseOptions::default(), "")
    }

    pub fn open_with_password(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        Self::open_with_options(path, ParseOptions::default(), password)
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: ParseOptions,
        password: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut doc = Self::from_device(file, options, password)?;
        doc.path = Some(path.to_path_buf());
        Ok(doc)
    }
}

impl Default for Document<File> {
    fn default() -> Self {
        Self::new()
    }
}

impl Document<Cursor<Vec<u8>>> {
    /// Load a document held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_device(Cursor::new(data), ParseOptions::default(), "")
    }
}

impl<R: Read + Seek> Document<R> {
    /// Load a document from any seekable source.
    pub fn from_device(source: R, options: ParseOptions, password: &str) -> Result<Self> {
        let reader = PdfReader::new(source, options.clone(), password.as_bytes())?;
        let trailer = reader.trailer().clone();
        trailer.validate()?;

        let xref = reader.xref();
        let from_xref = xref.max_object_number().map_or(1, |max| max.saturating_add(1));
        let from_size = trailer.size().unwrap_or(0);
        let table = IndirectObjectTable::new(from_xref.max(from_size));
        debug!(
            "Opened PDF {} with {} xref entries, next object number {}",
            reader.version(),
            xref.len(),
            table.next_number()
        );

        Ok(Self {
            version: reader.version(),
            reader: Some(reader),
            table,
            trailer,
            options,
            path: None,
        })
    }

    /// Get an object, loading it from the source on first access.
    ///
    /// Returns [`PdfError::NoObject`] for free, removed, missing and
    /// generation-mismatched ids.
    pub fn get_object(&mut self, id: ObjectId) -> Result<&Object> {
        if self.table.is_removed(id) {
            return Err(PdfError::NoObject(id));
        }
        if self.table.get(id).is_none() {
            let reader = self.reader.as_mut().ok_or(PdfError::NoObject(id))?;
            let object = reader.load_object(id)?;
            self.table.store_loaded(id, object);
        }
        self.table.get(id).ok_or(PdfError::NoObject(id))
    }

    /// Get an object for modification; it is written on the next save.
    pub fn get_object_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.get_object(id)?;
        self.table.get_mut(id).ok_or(PdfError::NoObject(id))
    }

    /// Follow `id` through objects that are themselves references.
    ///
    /// A dangling reference resolves to `null`.
    pub fn resolve(&mut self, id: ObjectId) -> Result<&Object> {
        let mut current = id;
        for _ in 0..MAX_REFERENCE_CHAIN {
            let step = match self.get_object(current) {
                Ok(Object::Reference(next)) => Step::Follow(*next),
                Ok(_) => Step::Found,
                Err(PdfError::NoObject(_)) => Step::Dangling,
                Err(err) => return Err(err),
            };
            match step {
                Step::Found => return self.get_object(current),
                Step::Follow(next) => current = next,
                Step::Dangling => {
                    debug!("Reference {current} is dangling, resolving to null");
                    return Ok(&NULL);
                }
            }
        }
        Err(PdfError::broken(
            0,
            format!("reference chain from {id} is longer than {MAX_REFERENCE_CHAIN}"),
        ))
    }

    /// Resolve `object` if it is a reference, otherwise return it unchanged.
    pub fn resolve_object<'a>(&'a mut self, object: &'a Object) -> Result<&'a Object> {
        match object {
            Object::Reference(id) => self.resolve(*id),
            other => Ok(other),
        }
    }

    /// Replace (or introduce) the object `id`.
    pub fn set_object(&mut self, id: ObjectId, object: impl Into<Object>) {
        self.table.set_modified(id, object.into());
    }

    /// Add a new object under the next unused object number.
    pub fn create_object(&mut self, object: impl Into<Object>) -> ObjectId {
        let id = self.table.allocate();
        self.table.set_modified(id, object.into());
        id
    }

    /// Delete `id`; the next save writes a free entry for it.
    pub fn remove_object(&mut self, id: ObjectId) {
        self.table.remove(id);
    }

    /// Drop the in-memory copy of an unchanged object, to be reloaded on the
    /// next access. Returns `false` for memory-only documents and for objects
    /// that are not loaded or carry changes.
    pub fn free_object_memory(&mut self, id: ObjectId) -> bool {
        if self.reader.is_none() {
            return false;
        }
        self.table.evict(id)
    }

    /// Decoded payload of the stream object `id`.
    pub fn decode_stream(&mut self, id: ObjectId) -> Result<Vec<u8>> {
        let options = self.options.clone();
        match self.get_object(id)? {
            Object::Stream(stream) => stream.decode(&options),
            other => Err(PdfError::type_mismatch("stream", other)),
        }
    }

    pub fn trailer(&self) -> &PdfTrailer {
        &self.trailer
    }

    /// The document catalog (`/Root`).
    pub fn catalog(&mut self) -> Result<&Dictionary> {
        let root = self.trailer.root()?;
        match self.resolve(root)? {
            Object::Dictionary(dict) => Ok(dict),
            other => Err(PdfError::type_mismatch("dictionary", other)),
        }
    }

    pub fn version(&self) -> PdfVersion {
        self.version
    }

    /// The merged cross-reference index; `None` for memory-only documents.
    pub fn xref(&self) -> Option<&XRefIndex> {
        self.reader.as_ref().map(PdfReader::xref)
    }

    pub fn is_encrypted(&self) -> bool {
        self.reader.as_ref().is_some_and(PdfReader::is_encrypted)
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn reader(&self) -> Option<&PdfReader<R>> {
        self.reader.as_ref()
    }

    /// True when there are created, changed or removed objects not yet saved.
    pub fn has_changes(&self) -> bool {
        self.table.has_changes()
    }

    /// Number of objects currently held in memory.
    pub fn loaded_count(&self) -> usize {
        self.table.len()
    }

    /// Ids of every live object: in-use xref entries plus objects created in
    /// memory, minus removed ones. Ordered by object number.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids = BTreeSet::new();
        if let Some(xref) = self.xref() {
            for (number, entry) in xref.iter() {
                let id = match *entry {
                    XRefEntry::InUse { generation, .. } => ObjectId::new(number, generation),
                    XRefEntry::Compressed { .. } => ObjectId::new(number, 0),
                    XRefEntry::Free { .. } => continue,
                };
                ids.insert(id);
            }
        }
        ids.extend(self.table.modified().map(|(id, _)| id));
        for id in self.table.removed() {
            ids.remove(&id);
        }
        if ids.remove(&ObjectId::new(0, 0)) {
            warn!("Ignoring in-use entry for object 0");
        }
        ids.into_iter().collect()
    }

    /// Whether `path` names the file this document was opened from.
    fn is_source_path(&self, path: &Path) -> bool {
        let Some(source) = &self.path else {
            return false;
        };
        match (source.canonicalize(), path.canonicalize()) {
            (Ok(source), Ok(target)) => source == target,
            _ => source == path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::objects::Stream;
    use crate::parser::test_helpers::{minimal_pdf, TestPdf};
    use pretty_assertions::assert_eq;

    fn load(data: Vec<u8>) -> Document<Cursor<Vec<u8>>> {
        Document::from_bytes(data).unwrap()
    }

    #[test]
    fn test_new_document_has_catalog() {
        let mut doc = Document::new();
        assert!(doc.xref().is_none());
        assert!(doc.has_changes());
        let catalog = doc.catalog().unwrap();
        assert!(catalog.is_type("Catalog"));
        assert_eq!(catalog.get_reference("Pages"), Some(ObjectId::new(2, 0)));
        assert_eq!(
            doc.object_ids(),
            vec![ObjectId::new(1, 0), ObjectId::new(2, 0)]
        );
    }

    #[test]
    fn test_lazy_loading() {
        let mut doc = load(minimal_pdf());
        assert_eq!(doc.loaded_count(), 0);
        let pages = doc.get_object(ObjectId::new(2, 0)).unwrap();
        assert_eq!(pages.as_dict().unwrap().get_integer("Count"), Some(0));
        assert_eq!(doc.loaded_count(), 1);
        assert!(!doc.has_changes());
    }

    #[test]
    fn test_missing_object() {
        let mut doc = load(minimal_pdf());
        let err = doc.get_object(ObjectId::new(9, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoObject);
        // Wrong generation
        let err = doc.get_object(ObjectId::new(1, 3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoObject);
    }

    #[test]
    fn test_resolve_chain_and_dangling() {
        let mut pdf = TestPdf::new("1.4");
        pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        pdf.object(2, "<< /Type /Pages /Kids [] /Count 0 >>");
        pdf.object(3, "4 0 R");
        pdf.object(4, "(end)");
        let mut doc = load(pdf.finish_with_table(""));

        assert_eq!(
            doc.resolve(ObjectId::new(3, 0)).unwrap(),
            &Object::string(b"end".to_vec())
        );
        assert!(doc.resolve(ObjectId::new(40, 0)).unwrap().is_null());
        let reference = Object::Reference(ObjectId::new(4, 0));
        assert_eq!(
            doc.resolve_object(&reference).unwrap(),
            &Object::string(b"end".to_vec())
        );
    }

    #[test]
    fn test_reference_loop_is_bounded() {
        let mut pdf = TestPdf::new("1.4");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.object(2, "3 0 R");
        pdf.object(3, "2 0 R");
        let mut doc = load(pdf.finish_with_table(""));
        let err = doc.resolve(ObjectId::new(2, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenFile);
    }

    #[test]
    fn test_create_continues_after_size() {
        let mut pdf = TestPdf::new("1.4");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.object(9, "null");
        let mut doc = load(pdf.finish_with_table(""));
        let id = doc.create_object(Object::Integer(5));
        assert_eq!(id, ObjectId::new(10, 0));
        assert_eq!(doc.get_object(id).unwrap(), &Object::Integer(5));
        assert!(doc.object_ids().contains(&id));
    }

    #[test]
    fn test_modify_and_remove() {
        let mut doc = load(minimal_pdf());
        let pages = ObjectId::new(2, 0);
        if let Object::Dictionary(dict) = doc.get_object_mut(pages).unwrap() {
            dict.set("Count", 1);
        }
        assert!(doc.has_changes());
        // Modified objects stay in memory
        assert!(!doc.free_object_memory(pages));

        doc.remove_object(pages);
        assert_eq!(doc.get_object(pages).unwrap_err().kind(), ErrorKind::NoObject);
        assert_eq!(doc.object_ids(), vec![ObjectId::new(1, 0)]);
    }

    #[test]
    fn test_free_object_memory() {
        let mut doc = load(minimal_pdf());
        let catalog = ObjectId::new(1, 0);
        assert!(!doc.free_object_memory(catalog));
        doc.get_object(catalog).unwrap();
        assert!(doc.free_object_memory(catalog));
        assert_eq!(doc.loaded_count(), 0);
        // Reloaded transparently
        assert!(doc.get_object(catalog).unwrap().as_dict().is_some());

        let mut memory_only = Document::new();
        assert!(!memory_only.free_object_memory(catalog));
        assert!(memory_only.get_object(catalog).is_ok());
    }

    #[test]
    fn test_decode_stream() {
        let mut pdf = TestPdf::new("1.4");
        pdf.object(1, "<< /Type /Catalog >>");
        pdf.stream(2, "/Filter /ASCIIHexDecode", b"48656C6C6F>");
        let mut doc = load(pdf.finish_with_table(""));
        assert_eq!(doc.decode_stream(ObjectId::new(2, 0)).unwrap(), b"Hello");
        let err = doc.decode_stream(ObjectId::new(1, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDataType);
    }

    #[test]
    fn test_set_object_into_memory_document() {
        let mut doc = Document::new();
        let id = doc.create_object(Stream::with_data(b"abc".to_vec()));
        assert_eq!(id, ObjectId::new(3, 0));
        assert_eq!(doc.decode_stream(id).unwrap(), b"abc");
    }

    #[test]
    fn test_compressed_objects_listed() {
        let mut pdf = TestPdf::new("1.5");
        pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>");
        pdf.object_stream(5, &[(2, "<< /Type /Pages >>"), (3, "42")]);
        let mut doc = load(pdf.finish_with_stream(6, ""));
        let ids = doc.object_ids();
        assert!(ids.contains(&ObjectId::new(3, 0)));
        assert_eq!(doc.get_object(ObjectId::new(3, 0)).unwrap(), &Object::Integer(42));
    }
}
