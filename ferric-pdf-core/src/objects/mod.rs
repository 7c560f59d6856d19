mod dictionary;
mod primitive;
mod stream;
mod table;

pub use dictionary::Dictionary;
pub use primitive::{Object, ObjectId, PdfString, StringFormat};
pub use stream::Stream;
pub use table::{IndirectObjectTable, Slot};

/// Arrays are plain vectors of objects.
pub type Array = Vec<Object>;
