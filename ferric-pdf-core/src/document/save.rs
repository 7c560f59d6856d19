//! Full saves and incremental updates of a [`Document`]

use super::Document;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId, PdfString, Stream};
use crate::parser::filters::FilterType;
use crate::parser::{PdfTrailer, PdfVersion, SectionKind};
use crate::writer::{
    generate_file_id, IncrementalUpdate, IncrementalWriter, PdfWriter, SaveOptions, UpdateSummary,
};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info, warn};

impl<R: Read + Seek> Document<R> {
    /// Write the whole document to a new file.
    ///
    /// Overwriting the file the document was opened from is refused, since
    /// unloaded objects are still read from it; use
    /// [`save_update`](Self::save_update) for that.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.save_with_options(path, &SaveOptions::default())
    }

    pub fn save_with_options(&mut self, path: impl AsRef<Path>, options: &SaveOptions) -> Result<()> {
        let path = path.as_ref();
        if self.is_source_path(path) {
            return Err(PdfError::Unsupported(format!(
                "full save over the source file {}",
                path.display()
            )));
        }
        let mut out = BufWriter::new(File::create(path)?);
        self.save_to(&mut out, options)?;
        out.flush()?;
        info!("Saved {}", path.display());
        Ok(())
    }

    /// Write the whole document: every live object, a fresh cross-reference
    /// section and trailer. Object streams are expanded into plain objects.
    pub fn save_to<W: Write>(&mut self, out: W, options: &SaveOptions) -> Result<()> {
        if self.is_encrypted() {
            return Err(PdfError::Unsupported("saving an encrypted document".to_string()));
        }
        let mut version = options.version.unwrap_or(self.version);
        if options.use_xref_stream && version < PdfVersion::V1_5 {
            debug!("Raising version {version} to 1.5 for an xref stream");
            version = PdfVersion::V1_5;
        }

        let ids = self.object_ids();
        let mut writer = PdfWriter::new(out);
        writer.write_header(version)?;
        writer.record_free(0, 0, u16::MAX);

        for id in ids {
            let loaded;
            let object = match self.table.get(id) {
                Some(object) => object,
                None => {
                    let Some(reader) = self.reader.as_mut() else {
                        continue;
                    };
                    match reader.load_object(id) {
                        Ok(object) => {
                            loaded = object;
                            &loaded
                        }
                        Err(PdfError::NoObject(_)) => {
                            warn!("Skipping unreadable object {id}");
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
            };

            let compressed;
            let object = match object {
                Object::Stream(stream) if is_structural(stream) => continue,
                Object::Stream(stream)
                    if options.compress_streams
                        && cfg!(feature = "compression")
                        && !stream.is_filtered() =>
                {
                    let mut encoded = Stream::new(stream.dict().clone(), Vec::new());
                    encoded.set_encoded_data(FilterType::Flate, None, stream.data())?;
                    compressed = Object::Stream(encoded);
                    &compressed
                }
                other => other,
            };
            writer.write_object(id, object)?;
        }

        let max = writer.entries().keys().next_back().copied().unwrap_or(0);
        let mut trailer = Dictionary::new();
        for key in ["Root", "Info"] {
            if let Some(value) = self.trailer.dict().get(key) {
                trailer.set(key, value.clone());
            }
        }
        trailer.set("ID", self.file_ids(max));

        if options.use_xref_stream {
            let stream_number = max.saturating_add(1);
            trailer.set("Size", i64::from(stream_number) + 1);
            writer.write_xref_stream(
                ObjectId::new(stream_number, 0),
                &trailer,
                options.compress_streams,
            )?;
        } else {
            trailer.set("Size", i64::from(max) + 1);
            let offset = writer.write_xref_table()?;
            writer.write_trailer(&trailer, offset)?;
        }
        writer.flush()?;
        debug!("Full save wrote {} objects", writer.entries().len() - 1);
        Ok(())
    }

    /// `/ID` for a full save: kept from the source, else freshly generated.
    fn file_ids(&self, object_count: u32) -> Vec<Object> {
        match self.trailer.id() {
            Some((first, second)) => vec![
                Object::String(PdfString::hex(first.to_vec())),
                Object::String(PdfString::hex(second.to_vec())),
            ],
            None => {
                let seed = object_count.to_be_bytes();
                let first = generate_file_id(&seed);
                let second = generate_file_id(&first);
                vec![
                    Object::String(PdfString::hex(first)),
                    Object::String(PdfString::hex(second)),
                ]
            }
        }
    }

    /// Append the pending changes as an incremental update.
    ///
    /// When `path` is the file the document was opened from, the update is
    /// appended in place and the document continues from the new state, so
    /// later updates chain onto this one. Any other path receives a copy of
    /// the source followed by the update.
    pub fn save_update(&mut self, path: impl AsRef<Path>) -> Result<UpdateSummary> {
        let path = path.as_ref();
        self.check_updatable()?;
        if self.is_source_path(path) {
            return self.append_update(path);
        }
        let mut out = BufWriter::new(File::create(path)?);
        let summary = self.save_update_to(&mut out)?;
        out.flush()?;
        info!("Wrote update of {} objects to {}", summary.entries.len(), path.display());
        Ok(summary)
    }

    /// Write the source bytes followed by an incremental update to `out`.
    ///
    /// The document itself is left unchanged.
    pub fn save_update_to<W: Write>(&mut self, mut out: W) -> Result<UpdateSummary> {
        self.check_updatable()?;
        if let Some(reader) = self.reader.as_mut() {
            reader.copy_source_to(&mut out)?;
        }
        let (summary, _) = self.write_update(&mut out)?;
        Ok(summary)
    }

    fn check_updatable(&self) -> Result<()> {
        let Some(reader) = self.reader.as_ref() else {
            return Err(PdfError::Unsupported(
                "incremental update of a document without a source".to_string(),
            ));
        };
        if reader.is_encrypted() {
            return Err(PdfError::Unsupported("updating an encrypted document".to_string()));
        }
        if reader.xref().is_recovered() {
            return Err(PdfError::Unsupported(
                "incremental update on top of a rebuilt cross-reference index".to_string(),
            ));
        }
        Ok(())
    }

    fn append_update(&mut self, path: &Path) -> Result<UpdateSummary> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            PdfError::Unsupported("incremental update of a document without a source".to_string())
        })?;
        let expected = reader.file_len();
        let current = reader.current_len()?;
        if current != expected {
            return Err(PdfError::broken(
                current,
                format!("file length changed from {expected} to {current} since it was loaded"),
            ));
        }

        let mut out = BufWriter::new(OpenOptions::new().append(true).open(path)?);
        let (summary, kind) = self.write_update(&mut out)?;
        out.flush()?;
        drop(out);

        if let Some(reader) = self.reader.as_mut() {
            reader
                .xref_mut()
                .apply_update(summary.startxref, kind, summary.entries.iter().copied());
            reader.set_file_len(summary.end);
            reader.set_trailer(PdfTrailer::new(summary.trailer.clone(), summary.startxref));
        }
        self.trailer = PdfTrailer::new(summary.trailer.clone(), summary.startxref);
        self.table.commit();
        // The update may have consumed numbers itself, such as its xref stream
        if let Some(size) = summary
            .trailer
            .get_integer("Size")
            .and_then(|size| u32::try_from(size).ok())
        {
            self.table.reserve_below(size);
        }
        info!(
            "Appended update to {}, xref at {}",
            path.display(),
            summary.startxref
        );
        Ok(summary)
    }

    /// Write the pending changes after the source bytes, which `out` is
    /// assumed to already hold.
    fn write_update<W: Write>(&mut self, out: W) -> Result<(UpdateSummary, SectionKind)> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            PdfError::Unsupported("incremental update of a document without a source".to_string())
        })?;
        let append_at = reader.file_len();
        let needs_eol = match append_at.checked_sub(1) {
            Some(last) => !matches!(reader.read_raw(last, 1)?.first(), Some(b'\n' | b'\r')),
            None => false,
        };
        let kind = reader
            .xref()
            .newest_section()
            .map_or(SectionKind::Table, |section| section.kind);

        let update = IncrementalUpdate {
            objects: self.table.modified().collect(),
            removed: self.table.removed().collect(),
            kind,
        };
        let summary = IncrementalWriter::new(
            out,
            append_at,
            self.trailer.dict(),
            self.trailer.xref_offset(),
        )
        .write(update, needs_eol)?;
        Ok((summary, kind))
    }
}

/// Streams that only describe the file layout and are rebuilt on save.
fn is_structural(stream: &Stream) -> bool {
    stream.dict().is_type("XRef") || stream.dict().is_type("ObjStm")
}
