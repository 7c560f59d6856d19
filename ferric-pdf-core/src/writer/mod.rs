//! PDF serialization: full saves and incremental updates

mod incremental;
mod pdf_writer;
mod xref_stream_writer;

pub use incremental::{IncrementalUpdate, IncrementalWriter, UpdateSummary};
pub(crate) use pdf_writer::generate_file_id;
pub use pdf_writer::{serialize, write_object_value, PdfWriter, SaveOptions};
pub use xref_stream_writer::XRefStreamWriter;
