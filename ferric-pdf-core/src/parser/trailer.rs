//! PDF Trailer
//!
//! Typed access to the merged trailer dictionary according to ISO 32000-1
//! Section 7.5.5.

use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId};

/// PDF Trailer information
#[derive(Debug, Clone, PartialEq)]
pub struct PdfTrailer {
    dict: Dictionary,
    /// Byte offset of the newest xref section
    xref_offset: u64,
}

impl PdfTrailer {
    pub fn new(dict: Dictionary, xref_offset: u64) -> Self {
        Self { dict, xref_offset }
    }

    pub fn xref_offset(&self) -> u64 {
        self.xref_offset
    }

    /// Get the size (number of entries in xref table)
    pub fn size(&self) -> Result<u32> {
        match self.dict.get("Size") {
            Some(Object::Integer(n)) => u32::try_from(*n)
                .map_err(|_| PdfError::ValueOutOfRange(format!("trailer /Size {n}"))),
            Some(other) => Err(PdfError::type_mismatch("integer", other)),
            None => Err(PdfError::invalid_xref(self.xref_offset, "trailer has no /Size")),
        }
    }

    /// Get the root object reference (document catalog)
    pub fn root(&self) -> Result<ObjectId> {
        match self.dict.get("Root") {
            Some(Object::Reference(id)) => Ok(*id),
            Some(other) => Err(PdfError::type_mismatch("reference", other)),
            None => Err(PdfError::broken(self.xref_offset, "trailer has no /Root")),
        }
    }

    /// Get the info object reference (document information dictionary)
    pub fn info(&self) -> Option<ObjectId> {
        self.dict.get_reference("Info")
    }

    /// Both file identifiers, when `/ID` is a well-formed pair of strings.
    pub fn id(&self) -> Option<(&[u8], &[u8])> {
        match self.dict.get_array("ID")?.as_slice() {
            [first, second] => Some((
                first.as_pdf_string()?.as_bytes(),
                second.as_pdf_string()?.as_bytes(),
            )),
            _ => None,
        }
    }

    /// Check if this PDF is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.dict.contains_key("Encrypt")
    }

    /// The `/Encrypt` entry: a reference or, rarely, a direct dictionary.
    pub fn encrypt(&self) -> Option<&Object> {
        self.dict.get("Encrypt")
    }

    /// Validate the entries every document must have.
    pub fn validate(&self) -> Result<()> {
        self.size()?;
        self.root()?;
        Ok(())
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dict
    }

    pub fn into_dict(self) -> Dictionary {
        self.dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::objects::PdfString;

    fn basic() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Size", 10);
        dict.set("Root", ObjectId::new(1, 0));
        dict
    }

    #[test]
    fn test_trailer_basic() {
        let trailer = PdfTrailer::new(basic(), 500);
        assert_eq!(trailer.size().unwrap(), 10);
        assert_eq!(trailer.root().unwrap(), ObjectId::new(1, 0));
        assert_eq!(trailer.xref_offset(), 500);
        assert!(trailer.info().is_none());
        assert!(!trailer.is_encrypted());
        assert!(trailer.validate().is_ok());
    }

    #[test]
    fn test_trailer_missing_entries() {
        let mut dict = basic();
        dict.remove("Size");
        let err = PdfTrailer::new(dict, 0).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidXRef);

        let mut dict = basic();
        dict.remove("Root");
        let err = PdfTrailer::new(dict, 0).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenFile);
    }

    #[test]
    fn test_trailer_wrong_types() {
        let mut dict = basic();
        dict.set("Root", 1);
        let err = PdfTrailer::new(dict, 0).root().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDataType);

        let mut dict = basic();
        dict.set("Size", -4);
        let err = PdfTrailer::new(dict, 0).size().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueOutOfRange);
    }

    #[test]
    fn test_trailer_id_and_encrypt() {
        let mut dict = basic();
        dict.set(
            "ID",
            vec![
                Object::String(PdfString::hex(vec![1, 2])),
                Object::String(PdfString::hex(vec![3, 4])),
            ],
        );
        dict.set("Encrypt", ObjectId::new(9, 0));
        dict.set("Info", ObjectId::new(2, 0));
        let trailer = PdfTrailer::new(dict, 0);
        assert_eq!(trailer.id(), Some((&[1u8, 2][..], &[3u8, 4][..])));
        assert!(trailer.is_encrypted());
        assert_eq!(
            trailer.encrypt(),
            Some(&Object::Reference(ObjectId::new(9, 0)))
        );
        assert_eq!(trailer.info(), Some(ObjectId::new(2, 0)));
    }

    #[test]
    fn test_trailer_malformed_id() {
        let mut dict = basic();
        dict.set("ID", vec![Object::Integer(1)]);
        assert!(PdfTrailer::new(dict, 0).id().is_none());
    }
}
