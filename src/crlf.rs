//! CRLF line-ending writer
//!
//! Wraps any [`Write`] and rewrites every `\n` to `\r\n` on the way through.
//! Used for the run log and the parsing log.

use std::io::{self, Write};

/// Writer decorator that emits CRLF line endings
#[derive(Debug)]
pub struct CrlfWriter<W: Write> {
    inner: W,
}

impl<W: Write> CrlfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    /// Reports the full input length once the translated bytes are written
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut start = 0;
        for (i, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                self.inner.write_all(&buf[start..i])?;
                self.inner.write_all(b"\r\n")?;
                start = i + 1;
            }
        }
        self.inner.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
