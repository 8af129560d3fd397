//! Streaming PDF document writing and merging.
//!
//! Produces a single valid PDF file without holding every constructed
//! object in memory: the writer emits each indirect object the moment it
//! is supplied, keeping only a per-object offset record for the
//! cross-reference table, and the merger ingests parsed documents one at
//! a time, relabeling their indirect references into the output numbering
//! space and releasing each source before the next.
//!
//! Parsing and the in-memory object model come from `lopdf`; this crate
//! only ever writes.
//!
//! ```
//! use lopdf::Object;
//! use pdfstream_core::{PdfVersion, StreamingPdfWriter};
//!
//! let mut writer = StreamingPdfWriter::new(Vec::new());
//! writer.begin_document(PdfVersion::default())?;
//! writer.write_object(&Object::Integer(42), 0)?;
//! let bytes = writer.end_document()?;
//! assert!(bytes.starts_with(b"%PDF-1.7\r\n"));
//! # Ok::<(), pdfstream_core::PdfStreamError>(())
//! ```

pub mod error;
pub mod merge;
pub mod rewrite;
pub mod serialize;
pub mod sink;
pub mod writer;

pub use error::PdfStreamError;
pub use merge::{merge_files, MergeReport, StreamingMerger};
pub use rewrite::{replace_references, ReferenceMap};
pub use sink::CountingSink;
pub use writer::{PdfVersion, StreamingPdfWriter};
