//! Streaming multi-document merge.
//!
//! Consumes fully parsed documents one at a time: every live object of a
//! source is given a fresh slot in the output numbering space, rewritten
//! through that mapping, and streamed out before the next document is
//! ingested. Peak memory is bounded by the largest single input plus the
//! offset table, no matter how many documents are merged.

use std::path::{Path, PathBuf};

use lopdf::{Document, Object};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::PdfStreamError;
use crate::rewrite::{replace_references, ReferenceMap};
use crate::writer::{PdfVersion, StreamingPdfWriter};

/// Figures reported after a successful merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub documents: usize,
    pub pages: usize,
    /// Objects transplanted from the inputs, not counting the
    /// synthesized page tree and catalog.
    pub objects: usize,
    pub output_bytes: u64,
}

/// Merges documents into a single PDF written through a temp file that
/// is atomically renamed over the destination on `finish`.
///
/// Dropping the merger before `finish` discards the temp file, so an
/// abandoned merge never replaces an existing output.
pub struct StreamingMerger {
    output_path: PathBuf,
    version: PdfVersion,
    writer: Option<StreamingPdfWriter<NamedTempFile>>,
    total_pages: usize,
    total_objects: usize,
    total_documents: usize,
}

impl StreamingMerger {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            version: PdfVersion::default(),
            writer: None,
            total_pages: 0,
            total_objects: 0,
            total_documents: 0,
        }
    }

    /// Override the PDF version written to the file header.
    pub fn with_version(mut self, version: PdfVersion) -> Self {
        self.version = version;
        self
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Pages accumulated so far across all ingested documents.
    pub fn page_count(&self) -> usize {
        self.total_pages
    }

    pub fn document_count(&self) -> usize {
        self.total_documents
    }

    /// Objects transplanted so far across all ingested documents.
    pub fn object_count(&self) -> usize {
        self.total_objects
    }

    /// Open a temporary file next to the destination and write the
    /// document prologue. The destination is not touched until `finish`.
    pub fn begin(&mut self) -> Result<(), PdfStreamError> {
        // The temp file must live in the destination directory for the
        // final rename to stay atomic.
        let dir = self
            .output_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = NamedTempFile::new_in(dir)?;
        let mut writer = StreamingPdfWriter::new(file);
        writer.begin_document(self.version)?;
        self.writer = Some(writer);
        Ok(())
    }

    /// Transplant one parsed document into the output.
    ///
    /// Two passes over the source's objects in slot order: the reserve
    /// pass allocates an output number for every live object so forward
    /// and backward references can be rewritten alike, the emit pass
    /// rewrites each object through the mapping and fulfills its
    /// reservation. Null slots are skipped and leave no mapping entry.
    /// All transplanted objects land at generation 0; the output is a
    /// fresh document with no revision history.
    ///
    /// `document_index` only labels log records. `namespace_fields` is a
    /// forward-compatibility hook for form-field renaming; non-default
    /// values are rejected rather than silently ignored.
    pub fn add_document(
        &mut self,
        document: &Document,
        document_index: usize,
        namespace_fields: bool,
    ) -> Result<(), PdfStreamError> {
        if namespace_fields {
            return Err(PdfStreamError::UnsupportedOption("namespace_fields"));
        }
        let writer = self.writer.as_mut().ok_or(PdfStreamError::NotOpen)?;

        let mut mapping = ReferenceMap::new();
        for (&old_id, object) in &document.objects {
            if matches!(object, Object::Null) {
                continue;
            }
            let new_id = writer.reserve_object(0)?;
            mapping.insert(old_id, new_id);
        }

        for (&old_id, object) in &document.objects {
            if matches!(object, Object::Null) {
                continue;
            }
            if let Some(&new_id) = mapping.get(&old_id) {
                let rewritten = replace_references(object, &mapping);
                writer.write_reserved_object(new_id, &rewritten)?;
            }
        }

        let mut transplanted_pages = 0usize;
        for (_, page_id) in document.get_pages() {
            match mapping.get(&page_id) {
                Some(&new_id) => {
                    writer.add_page(new_id);
                    transplanted_pages += 1;
                }
                None => {
                    // A page without a live object means the source is
                    // inconsistent; dropping it beats emitting a dangling
                    // kid reference.
                    tracing::warn!(
                        document_index,
                        page = page_id.0,
                        "dropping page with no transplanted object"
                    );
                }
            }
        }

        self.total_pages += transplanted_pages;
        self.total_objects += mapping.len();
        self.total_documents += 1;
        tracing::debug!(
            document_index,
            objects = mapping.len(),
            pages = transplanted_pages,
            "transplanted document"
        );
        Ok(())
    }

    /// Finalize the output and atomically move it over the destination.
    ///
    /// On any failure the temp file is discarded and the destination is
    /// left untouched.
    pub fn finish(&mut self) -> Result<MergeReport, PdfStreamError> {
        let writer = self.writer.take().ok_or(PdfStreamError::NotOpen)?;
        let file = writer.end_document()?;
        let output_bytes = file.as_file().metadata().map(|m| m.len()).unwrap_or(0);
        file.persist(&self.output_path)
            .map_err(|error| PdfStreamError::FileCommit(error.to_string()))?;

        let report = MergeReport {
            documents: self.total_documents,
            pages: self.total_pages,
            objects: self.total_objects,
            output_bytes,
        };
        tracing::info!(
            documents = report.documents,
            pages = report.pages,
            objects = report.objects,
            output_bytes = report.output_bytes,
            path = %self.output_path.display(),
            "merged output committed"
        );
        Ok(report)
    }
}

/// Merge the given input files into `output`, holding at most one parsed
/// document in memory at a time.
pub fn merge_files<P, Q>(inputs: &[P], output: Q) -> Result<MergeReport, PdfStreamError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mut merger = StreamingMerger::new(output.as_ref());
    merger.begin()?;
    for (index, input) in inputs.iter().enumerate() {
        let document = Document::load(input.as_ref())
            .map_err(|error| PdfStreamError::Parse(error.to_string()))?;
        merger.add_document(&document, index, false)?;
        // `document` drops here, before the next input is loaded.
    }
    merger.finish()
}
