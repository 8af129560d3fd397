//! Append-only byte sink with a running position counter.
//!
//! Cross-reference offsets are recorded synchronously with writes, so the
//! output never needs to be seekable; pipes and sockets work as well as
//! files.

use std::io::{self, Write};

/// Counts the bytes successfully written to the wrapped output.
///
/// A failed write latches the sink: every later operation fails until the
/// sink is discarded.
pub struct CountingSink<W: Write> {
    inner: W,
    written: u64,
    failed: bool,
}

impl<W: Write> CountingSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            failed: false,
        }
    }

    /// Bytes successfully written since creation.
    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn failure() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "output sink is in a failed state")
    }
}

impl<W: Write> Write for CountingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failed {
            return Err(Self::failure());
        }
        match self.inner.write(buf) {
            Ok(count) => {
                self.written += count as u64;
                Ok(count)
            }
            Err(error) => {
                self.failed = true;
                Err(error)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.failed {
            return Err(Self::failure());
        }
        match self.inner.flush() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.failed = true;
                Err(error)
            }
        }
    }
}
