//! PDF Object Stream Parser
//!
//! Handles compressed objects stored in object streams (PDF 1.5+,
//! ISO 32000-1 Section 7.5.7). The header of `/N` pairs is read when the
//! container is opened; individual objects are parsed when requested.

use super::lexer::{Lexer, Token};
use super::objects::parse_object;
use crate::config::ParseOptions;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId};
use std::io::Cursor;
use tracing::{debug, warn};

/// Represents a decoded PDF object stream
#[derive(Debug)]
pub struct ObjectStream {
    id: ObjectId,
    /// `(object number, offset relative to /First)` for each contained object
    header: Vec<(u32, usize)>,
    first: usize,
    data: Vec<u8>,
}

fn header_integer<R: std::io::Read>(lexer: &mut Lexer<R>, id: ObjectId, what: &str) -> Result<u64> {
    match lexer.next_token()? {
        Token::Integer(n) if n >= 0 => Ok(n as u64),
        other => Err(PdfError::broken(
            lexer.token_start(),
            format!("object stream {id}: expected {what}, found {}", other.describe()),
        )),
    }
}

impl ObjectStream {
    /// Open an object stream from its dictionary and decoded payload.
    pub fn parse(id: ObjectId, dict: &Dictionary, data: Vec<u8>, options: &ParseOptions) -> Result<Self> {
        if !dict.is_type("ObjStm") {
            if options.strict {
                return Err(PdfError::broken(
                    0,
                    format!("object {id} is not /Type /ObjStm"),
                ));
            }
            warn!("Object stream {id} lacks /Type /ObjStm");
        }

        let count = Self::non_negative(dict, "N", id)?;
        let first = Self::non_negative(dict, "First", id)?;
        if first > data.len() {
            return Err(PdfError::broken(
                0,
                format!(
                    "object stream {id}: /First {first} beyond decoded length {}",
                    data.len()
                ),
            ));
        }
        // Every header pair takes at least four bytes ("n o ")
        if count > first / 2 + 1 {
            return Err(PdfError::broken(
                0,
                format!("object stream {id}: /N {count} does not fit before /First {first}"),
            ));
        }

        let mut lexer = Lexer::new(Cursor::new(&data[..first]));
        let mut header = Vec::with_capacity(count);
        for _ in 0..count {
            let number = header_integer(&mut lexer, id, "object number")?;
            let offset = header_integer(&mut lexer, id, "object offset")?;
            let number = u32::try_from(number).map_err(|_| {
                PdfError::broken(0, format!("object stream {id}: object number {number} too large"))
            })?;
            let offset = usize::try_from(offset)
                .ok()
                .filter(|off| first.checked_add(*off).is_some_and(|abs| abs <= data.len()))
                .ok_or_else(|| {
                    PdfError::broken(
                        0,
                        format!("object stream {id}: offset {offset} of object {number} out of range"),
                    )
                })?;
            header.push((number, offset));
        }
        debug!("Opened object stream {id} with {count} objects");

        Ok(Self {
            id,
            header,
            first,
            data,
        })
    }

    fn non_negative(dict: &Dictionary, key: &str, id: ObjectId) -> Result<usize> {
        match dict.get(key) {
            Some(Object::Integer(n)) => usize::try_from(*n).map_err(|_| {
                PdfError::broken(0, format!("object stream {id}: negative /{key} {n}"))
            }),
            Some(other) => Err(PdfError::type_mismatch("integer", other)),
            None => Err(PdfError::broken(
                0,
                format!("object stream {id} has no /{key}"),
            )),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.header.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    /// Object numbers in header order.
    pub fn object_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.header.iter().map(|(number, _)| *number)
    }

    /// Parse the object at `index`, which the xref says holds object `number`.
    pub fn get(&self, index: u32, number: u32, options: &ParseOptions) -> Result<Object> {
        let &(found, offset) = self.header.get(index as usize).ok_or_else(|| {
            PdfError::broken(
                0,
                format!(
                    "object stream {} has {} objects, index {index} requested",
                    self.id,
                    self.header.len()
                ),
            )
        })?;
        if found != number {
            if options.strict {
                return Err(PdfError::broken(
                    0,
                    format!(
                        "object stream {} holds object {found} at index {index}, expected {number}",
                        self.id
                    ),
                ));
            }
            warn!(
                "Object stream {} holds object {found} at index {index}, expected {number}",
                self.id
            );
        }

        let start = self.first + offset;
        let mut lexer = Lexer::new(Cursor::new(&self.data[start..]));
        lexer.set_strict(options.strict);
        parse_object(&mut lexer, options)
    }

    /// Every contained object, in header order.
    pub fn objects(&self, options: &ParseOptions) -> Result<Vec<(u32, Object)>> {
        (0..self.header.len() as u32)
            .map(|index| {
                let number = self.header[index as usize].0;
                Ok((number, self.get(index, number, options)?))
            })
            .collect()
    }
}
