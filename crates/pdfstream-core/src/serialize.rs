//! PDF object serialization.
//!
//! Translates an in-memory `lopdf::Object` into the PDF lexical byte
//! grammar used by the streaming writer. Serialization is deterministic:
//! the same value always produces the same bytes.

use std::io::Write;

use lopdf::{Dictionary, Object, Stream};

use crate::error::PdfStreamError;

const CRLF: &[u8] = b"\r\n";

/// Serialize one PDF value into `out`.
///
/// Every atom is followed by a single space so tokens never need a
/// context-dependent separator. Stream dictionaries must carry a direct
/// `Length` entry matching the payload; the serializer never derives one,
/// since some streams deliberately declare a post-filter length.
pub fn write_object<W: Write>(out: &mut W, object: &Object) -> Result<(), PdfStreamError> {
    match object {
        Object::Null => out.write_all(b"null ")?,
        Object::Boolean(value) => out.write_all(if *value { b"true " } else { b"false " })?,
        Object::Integer(value) => write!(out, "{} ", value)?,
        Object::Real(value) => write!(out, "{:.5} ", value)?,
        Object::String(bytes, _) => write_string(out, bytes)?,
        Object::Name(bytes) => write_name(out, bytes)?,
        Object::Array(items) => {
            out.write_all(b"[ ")?;
            for item in items {
                write_object(out, item)?;
            }
            out.write_all(b"] ")?;
        }
        Object::Dictionary(dict) => write_dictionary(out, dict)?,
        Object::Stream(stream) => write_stream(out, stream)?,
        Object::Reference((number, generation)) => write!(out, "{} {} R ", number, generation)?,
    }
    Ok(())
}

/// Literal form unless the payload contains a byte that would need
/// escaping, in which case the whole string is written in hex form.
fn write_string<W: Write>(out: &mut W, bytes: &[u8]) -> Result<(), PdfStreamError> {
    if bytes
        .iter()
        .any(|&byte| byte == b'(' || byte == b')' || byte == b'\\')
    {
        out.write_all(b"<")?;
        for byte in bytes {
            write!(out, "{:02x}", byte)?;
        }
        out.write_all(b"> ")?;
    } else {
        out.write_all(b"(")?;
        out.write_all(bytes)?;
        out.write_all(b") ")?;
    }
    Ok(())
}

/// A regular character may appear verbatim in a name; everything else is
/// written as `#` plus two hex digits.
fn is_regular(byte: u8) -> bool {
    matches!(byte, 0x21..=0x7e)
        && !matches!(
            byte,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
        )
}

fn write_name<W: Write>(out: &mut W, bytes: &[u8]) -> Result<(), PdfStreamError> {
    out.write_all(b"/")?;
    for &byte in bytes {
        if is_regular(byte) {
            out.write_all(&[byte])?;
        } else {
            write!(out, "#{:02x}", byte)?;
        }
    }
    out.write_all(b" ")?;
    Ok(())
}

fn write_dictionary<W: Write>(out: &mut W, dict: &Dictionary) -> Result<(), PdfStreamError> {
    out.write_all(b"<< ")?;
    for (key, value) in dict.iter() {
        write_name(out, key)?;
        write_object(out, value)?;
    }
    out.write_all(b">> ")?;
    Ok(())
}

fn write_stream<W: Write>(out: &mut W, stream: &Stream) -> Result<(), PdfStreamError> {
    let declared = stream
        .dict
        .get(b"Length")
        .ok()
        .and_then(|value| value.as_i64().ok());
    match declared {
        Some(length) if length == stream.content.len() as i64 => {}
        Some(length) => {
            return Err(PdfStreamError::Structural(format!(
                "stream Length {} disagrees with payload of {} bytes",
                length,
                stream.content.len()
            )))
        }
        None => {
            return Err(PdfStreamError::Structural(
                "stream dictionary has no direct Length entry".into(),
            ))
        }
    }
    write_dictionary(out, &stream.dict)?;
    out.write_all(b"stream")?;
    out.write_all(CRLF)?;
    out.write_all(&stream.content)?;
    out.write_all(CRLF)?;
    out.write_all(b"endstream")?;
    out.write_all(CRLF)?;
    Ok(())
}
