//! Streaming document writer.
//!
//! Indirect objects are emitted to the output the moment they are
//! supplied; only a compact per-object offset record is retained so the
//! cross-reference table and trailer can be appended at finalization.
//! Mutually referencing objects are handled by reserving an object number
//! first and filling it in later.

use std::io::Write;

use lopdf::{dictionary, Object, ObjectId};

use crate::error::PdfStreamError;
use crate::serialize;
use crate::sink::CountingSink;

const CRLF: &[u8] = b"\r\n";

/// Generation number of the free-list head in slot 0.
const FREE_SLOT_GENERATION: u16 = 65535;

/// PDF version advertised in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfVersion {
    pub major: u8,
    pub minor: u8,
}

impl PdfVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for PdfVersion {
    fn default() -> Self {
        Self::new(1, 7)
    }
}

/// One slot of the cross-reference table under construction.
#[derive(Debug, Clone, Copy)]
struct ObjectEntry {
    /// Byte position of the `N G obj` header; `None` until written.
    offset: Option<u64>,
    generation: u16,
    /// Set between `reserve_object` and `write_reserved_object`.
    reserved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Created,
    Open,
}

/// Writes a PDF document to an append-only sink in a single forward pass.
///
/// Object numbers are allocated densely from 1 by a counter shared
/// between immediate writes and reservations; slot 0 is the head of the
/// free list and is never written. `end_document` consumes the writer and
/// hands the sink back, so the owner decides when and whether to commit
/// the underlying file.
pub struct StreamingPdfWriter<W: Write> {
    sink: CountingSink<W>,
    entries: Vec<ObjectEntry>,
    pages: Vec<ObjectId>,
    catalog: Option<ObjectId>,
    info: Option<ObjectId>,
    state: WriterState,
}

impl<W: Write> StreamingPdfWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: CountingSink::new(sink),
            entries: vec![ObjectEntry {
                offset: None,
                generation: FREE_SLOT_GENERATION,
                reserved: false,
            }],
            pages: Vec::new(),
            catalog: None,
            info: None,
            state: WriterState::Created,
        }
    }

    /// Write the file prologue and open the document for object emission.
    pub fn begin_document(&mut self, version: PdfVersion) -> Result<(), PdfStreamError> {
        if self.state != WriterState::Created {
            return Err(PdfStreamError::NotOpen);
        }
        write!(self.sink, "%PDF-{}.{}", version.major, version.minor)?;
        self.sink.write_all(CRLF)?;
        write!(
            self.sink,
            "% PDF producer: {} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )?;
        self.sink.write_all(CRLF)?;
        // Binary marker so transfer tools treat the file as binary.
        self.sink.write_all(b"%\xE2\xE3\xCF\xD3")?;
        self.sink.write_all(CRLF)?;
        self.sink.write_all(CRLF)?;
        self.state = WriterState::Open;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state == WriterState::Open
    }

    /// Current byte position of the output.
    pub fn position(&self) -> u64 {
        self.sink.position()
    }

    /// Allocated object slots, including the free slot 0.
    pub fn object_count(&self) -> usize {
        self.entries.len()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Emit `object` as the next indirect object and return its reference.
    pub fn write_object(
        &mut self,
        object: &Object,
        generation: u16,
    ) -> Result<ObjectId, PdfStreamError> {
        if !self.is_open() {
            return Err(PdfStreamError::NotOpen);
        }
        let id = (self.entries.len() as u32, generation);
        self.entries.push(ObjectEntry {
            offset: Some(self.sink.position()),
            generation,
            reserved: false,
        });
        self.emit_object(id, object)?;
        Ok(id)
    }

    /// Allocate an object number whose body will be supplied later via
    /// `write_reserved_object`.
    pub fn reserve_object(&mut self, generation: u16) -> Result<ObjectId, PdfStreamError> {
        if !self.is_open() {
            return Err(PdfStreamError::NotOpen);
        }
        let id = (self.entries.len() as u32, generation);
        self.entries.push(ObjectEntry {
            offset: None,
            generation,
            reserved: true,
        });
        Ok(id)
    }

    /// Fill a previously reserved slot. The reference must be exactly the
    /// one returned by `reserve_object`, and each reservation can be
    /// fulfilled once.
    pub fn write_reserved_object(
        &mut self,
        id: ObjectId,
        object: &Object,
    ) -> Result<(), PdfStreamError> {
        if !self.is_open() {
            return Err(PdfStreamError::NotOpen);
        }
        let (number, generation) = id;
        let position = self.sink.position();
        let entry = match self.entries.get_mut(number as usize) {
            Some(entry) if entry.reserved && entry.generation == generation => entry,
            _ => return Err(PdfStreamError::InvalidReservation(number)),
        };
        entry.offset = Some(position);
        entry.reserved = false;
        self.emit_object(id, object)
    }

    /// Append a page reference for the synthesized page tree. The
    /// referent is not validated.
    pub fn add_page(&mut self, page: ObjectId) {
        self.pages.push(page);
    }

    /// Use `catalog` as the document root instead of synthesizing one.
    pub fn set_catalog_reference(&mut self, catalog: ObjectId) {
        self.catalog = Some(catalog);
    }

    pub fn set_info_reference(&mut self, info: ObjectId) {
        self.info = Some(info);
    }

    /// Finish the document and return the inner sink.
    ///
    /// Refuses with `UnfulfilledReservation` if any reserved slot was
    /// never written; nothing is emitted in that case. When no catalog
    /// reference was supplied, a flat page tree over the accumulated
    /// pages and a minimal catalog are synthesized first. Then the
    /// cross-reference table, trailer, `startxref` and `%%EOF` are
    /// written; the file's final byte is the `F` of `%%EOF`.
    pub fn end_document(mut self) -> Result<W, PdfStreamError> {
        if !self.is_open() {
            return Err(PdfStreamError::NotOpen);
        }
        for (number, entry) in self.entries.iter().enumerate().skip(1) {
            if entry.reserved {
                return Err(PdfStreamError::UnfulfilledReservation(number as u32));
            }
        }

        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => {
                let page_tree = self.write_page_tree()?;
                self.write_catalog(page_tree)?
            }
        };

        let xref_offset = self.sink.position();
        self.sink.write_all(b"xref")?;
        self.sink.write_all(CRLF)?;
        write!(self.sink, "0 {}", self.entries.len())?;
        self.sink.write_all(CRLF)?;
        // Fixed-width rows: readers locate entries by arithmetic, so each
        // row is exactly 20 bytes including the CRLF.
        for (number, entry) in self.entries.iter().enumerate() {
            let kind = if number == 0 || entry.offset.is_none() {
                'f'
            } else {
                'n'
            };
            write!(
                self.sink,
                "{:010} {:05} {}",
                entry.offset.unwrap_or(0),
                entry.generation,
                kind
            )?;
            self.sink.write_all(CRLF)?;
        }

        let mut trailer = dictionary! {
            "Size" => self.entries.len() as i64,
            "Root" => catalog,
        };
        if let Some(info) = self.info {
            trailer.set("Info", info);
        }
        self.sink.write_all(b"trailer")?;
        self.sink.write_all(CRLF)?;
        serialize::write_object(&mut self.sink, &Object::Dictionary(trailer))?;
        self.sink.write_all(CRLF)?;
        self.sink.write_all(b"startxref")?;
        self.sink.write_all(CRLF)?;
        write!(self.sink, "{}", xref_offset)?;
        self.sink.write_all(CRLF)?;
        self.sink.write_all(b"%%EOF")?;
        self.sink.flush()?;
        Ok(self.sink.into_inner())
    }

    fn write_page_tree(&mut self) -> Result<ObjectId, PdfStreamError> {
        let kids: Vec<Object> = self.pages.iter().map(|&id| Object::Reference(id)).collect();
        let page_tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => self.pages.len() as i64,
        };
        self.write_object(&Object::Dictionary(page_tree), 0)
    }

    fn write_catalog(&mut self, page_tree: ObjectId) -> Result<ObjectId, PdfStreamError> {
        let catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => page_tree,
        };
        self.write_object(&Object::Dictionary(catalog), 0)
    }

    fn emit_object(&mut self, id: ObjectId, object: &Object) -> Result<(), PdfStreamError> {
        write!(self.sink, "{} {} obj", id.0, id.1)?;
        self.sink.write_all(CRLF)?;
        serialize::write_object(&mut self.sink, object)?;
        self.sink.write_all(b"endobj")?;
        self.sink.write_all(CRLF)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Document, StringFormat};
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    /// Sink whose bytes stay inspectable after the writer consumed it.
    #[derive(Debug, Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|window| window == needle)
    }

    fn open_writer() -> StreamingPdfWriter<Vec<u8>> {
        let mut writer = StreamingPdfWriter::new(Vec::new());
        writer.begin_document(PdfVersion::default()).unwrap();
        writer
    }

    fn finished_document(
        build: impl FnOnce(&mut StreamingPdfWriter<Vec<u8>>) -> Result<(), PdfStreamError>,
    ) -> Vec<u8> {
        let mut writer = open_writer();
        build(&mut writer).unwrap();
        writer.end_document().unwrap()
    }

    /// Read the startxref value from the end of the file.
    fn startxref_offset(bytes: &[u8]) -> usize {
        let tail_start = bytes.len().saturating_sub(64);
        let tail = &bytes[tail_start..];
        let pos = find(tail, b"startxref\r\n").expect("startxref not found");
        let digits = &tail[pos + 11..];
        let end = digits
            .iter()
            .position(|&b| !b.is_ascii_digit())
            .unwrap_or(digits.len());
        std::str::from_utf8(&digits[..end]).unwrap().parse().unwrap()
    }

    #[test]
    fn test_prologue_layout() {
        let bytes = finished_document(|_| Ok(()));
        assert!(bytes.starts_with(b"%PDF-1.7\r\n"));
        assert!(find(&bytes, b"% PDF producer: pdfstream-core").is_some());
        assert!(find(&bytes, b"%\xE2\xE3\xCF\xD3\r\n\r\n").is_some());
        assert!(bytes.ends_with(b"%%EOF"));
    }

    #[test]
    fn test_requested_version_in_header() {
        let mut writer = StreamingPdfWriter::new(Vec::new());
        writer.begin_document(PdfVersion::new(1, 4)).unwrap();
        let bytes = writer.end_document().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.4\r\n"));
    }

    #[test]
    fn test_empty_document_synthesizes_page_tree_and_catalog() {
        let bytes = finished_document(|_| Ok(()));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 0);
        // Free slot 0 plus the synthesized page tree and catalog.
        assert_eq!(doc.trailer.get(b"Size").unwrap().as_i64().unwrap(), 3);
    }

    #[test]
    fn test_single_page_document() {
        let bytes = finished_document(|writer| {
            let page_id = writer.reserve_object(0)?;
            // The synthesized page tree will be object 2; pointing Parent
            // at it keeps the tree consistent both ways.
            let page = Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference((2, 0)),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            writer.write_reserved_object(page_id, &page)?;
            writer.add_page(page_id);
            Ok(())
        });
        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages.values().next().copied(), Some((1, 0)));
    }

    #[test]
    fn test_mutually_referencing_objects_via_reservation() {
        let bytes = finished_document(|writer| {
            let first = writer.reserve_object(0)?;
            let second = writer.reserve_object(0)?;
            writer.write_reserved_object(
                first,
                &Object::Dictionary(dictionary! { "Next" => second }),
            )?;
            writer.write_reserved_object(
                second,
                &Object::Dictionary(dictionary! { "Prev" => first }),
            )?;
            Ok(())
        });
        let doc = Document::load_mem(&bytes).unwrap();
        let first = doc.get_object((1, 0)).unwrap().as_dict().unwrap();
        assert_eq!(first.get(b"Next").unwrap().as_reference().unwrap(), (2, 0));
        let second = doc.get_object((2, 0)).unwrap().as_dict().unwrap();
        assert_eq!(second.get(b"Prev").unwrap().as_reference().unwrap(), (1, 0));
    }

    #[test]
    fn test_xref_rows_are_20_bytes_and_offsets_resolve() {
        let bytes = finished_document(|writer| {
            writer.write_object(&Object::Integer(1), 0)?;
            writer.write_object(&Object::String(b"x".to_vec(), StringFormat::Literal), 0)?;
            Ok(())
        });

        let xref = startxref_offset(&bytes);
        assert!(bytes[xref..].starts_with(b"xref\r\n"));

        let header_start = xref + 6;
        let header_len = find(&bytes[header_start..], b"\r\n").unwrap();
        let header = std::str::from_utf8(&bytes[header_start..header_start + header_len]).unwrap();
        let count: usize = header.strip_prefix("0 ").unwrap().parse().unwrap();
        // Slot 0, two written objects, the page tree and the catalog.
        assert_eq!(count, 5);

        let rows_start = header_start + header_len + 2;
        for number in 0..count {
            let row = &bytes[rows_start + 20 * number..rows_start + 20 * (number + 1)];
            assert!(row.ends_with(b"\r\n"));
            let offset: usize = std::str::from_utf8(&row[..10]).unwrap().parse().unwrap();
            let generation = std::str::from_utf8(&row[11..16]).unwrap();
            if number == 0 {
                assert_eq!(&row[17..18], b"f");
                assert_eq!(generation, "65535");
                assert_eq!(offset, 0);
            } else {
                assert_eq!(&row[17..18], b"n");
                assert_eq!(generation, "00000");
                let header = format!("{} 0 obj\r\n", number);
                assert!(bytes[offset..].starts_with(header.as_bytes()));
            }
        }
    }

    #[test]
    fn test_unfulfilled_reservation_refuses_to_finalize() {
        let buffer = SharedBuffer::default();
        let mut writer = StreamingPdfWriter::new(buffer.clone());
        writer.begin_document(PdfVersion::default()).unwrap();
        let first = writer.reserve_object(0).unwrap();
        let second = writer.reserve_object(0).unwrap();
        writer.write_reserved_object(second, &Object::Null).unwrap();

        let error = writer.end_document().unwrap_err();
        assert!(matches!(
            error,
            PdfStreamError::UnfulfilledReservation(number) if number == first.0
        ));
        let bytes = buffer.0.borrow();
        assert!(find(&bytes, b"xref").is_none());
        assert!(find(&bytes, b"trailer").is_none());
    }

    #[test]
    fn test_invalid_reservations_are_rejected() {
        let mut writer = open_writer();

        let written = writer.write_object(&Object::Null, 0).unwrap();
        assert!(matches!(
            writer.write_reserved_object(written, &Object::Null),
            Err(PdfStreamError::InvalidReservation(_))
        ));

        let reserved = writer.reserve_object(0).unwrap();
        writer
            .write_reserved_object(reserved, &Object::Boolean(true))
            .unwrap();
        assert!(matches!(
            writer.write_reserved_object(reserved, &Object::Boolean(false)),
            Err(PdfStreamError::InvalidReservation(_))
        ));

        assert!(matches!(
            writer.write_reserved_object((99, 0), &Object::Null),
            Err(PdfStreamError::InvalidReservation(99))
        ));

        let other_generation = (writer.reserve_object(0).unwrap().0, 5);
        assert!(matches!(
            writer.write_reserved_object(other_generation, &Object::Null),
            Err(PdfStreamError::InvalidReservation(_))
        ));
    }

    #[test]
    fn test_operations_require_open_state() {
        let mut writer = StreamingPdfWriter::new(Vec::new());
        assert!(matches!(
            writer.write_object(&Object::Null, 0),
            Err(PdfStreamError::NotOpen)
        ));
        assert!(matches!(
            writer.reserve_object(0),
            Err(PdfStreamError::NotOpen)
        ));
        assert!(matches!(
            writer.end_document(),
            Err(PdfStreamError::NotOpen)
        ));
    }

    #[test]
    fn test_begin_document_twice_fails() {
        let mut writer = open_writer();
        assert!(matches!(
            writer.begin_document(PdfVersion::default()),
            Err(PdfStreamError::NotOpen)
        ));
    }

    #[test]
    fn test_supplied_catalog_suppresses_synthesis() {
        let bytes = finished_document(|writer| {
            let page_tree = writer.write_object(
                &Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Kids" => Vec::<Object>::new(),
                    "Count" => 0,
                }),
                0,
            )?;
            let catalog = writer.write_object(
                &Object::Dictionary(dictionary! {
                    "Type" => "Catalog",
                    "Pages" => page_tree,
                }),
                0,
            )?;
            writer.set_catalog_reference(catalog);
            Ok(())
        });
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.trailer.get(b"Size").unwrap().as_i64().unwrap(), 3);
        assert_eq!(
            doc.trailer.get(b"Root").unwrap().as_reference().unwrap(),
            (2, 0)
        );
    }

    #[test]
    fn test_info_reference_lands_in_trailer() {
        let bytes = finished_document(|writer| {
            let info = writer.write_object(
                &Object::Dictionary(dictionary! {
                    "Title" => Object::String(b"Merged".to_vec(), StringFormat::Literal),
                }),
                0,
            )?;
            writer.set_info_reference(info);
            Ok(())
        });
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(
            doc.trailer.get(b"Info").unwrap().as_reference().unwrap(),
            (1, 0)
        );
    }

    #[test]
    fn test_name_with_every_byte_survives_a_reparse() {
        let all_bytes: Vec<u8> = (0u8..=255).collect();
        let bytes = finished_document(|writer| {
            writer.write_object(&Object::Name(all_bytes.clone()), 0)?;
            Ok(())
        });
        let doc = Document::load_mem(&bytes).unwrap();
        match doc.get_object((1, 0)).unwrap() {
            Object::Name(name) => assert_eq!(name, &all_bytes),
            other => panic!("expected name, got {:?}", other),
        }
    }

    #[test]
    fn test_startxref_points_at_xref_keyword() {
        let bytes = finished_document(|writer| {
            writer.write_object(&Object::Integer(7), 0)?;
            Ok(())
        });
        let offset = startxref_offset(&bytes);
        assert_eq!(&bytes[offset..offset + 4], b"xref");
    }
}
