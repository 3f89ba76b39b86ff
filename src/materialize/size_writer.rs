//! Counting byte sink.

use std::io::{self, Write};

/// Forwards writes to the inner sink and accumulates the byte count.
///
/// Fetches stream through one of these so the puller can account for bytes
/// only after the fetch completes.
#[derive(Debug)]
pub struct SizeWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> SizeWriter<W> {
    /// Wraps a sink.
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Bytes successfully written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Unwraps the inner sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for SizeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
