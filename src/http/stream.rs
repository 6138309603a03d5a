//! Buffered HTTP/1.x connection halves.
//!
//! Wraps a socket with a read buffer so heads can be parsed without
//! losing body bytes that arrive in the same segment.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::head::HeadError;

const READ_CHUNK: usize = 8 * 1024;

/// A socket plus the bytes read from it but not yet consumed.
#[derive(Debug)]
pub struct HttpStream<S> {
    io: S,
    buf: BytesMut,
}

impl<S> HttpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read one message head, including the terminating empty line.
    ///
    /// Returns `Ok(None)` when the peer closed cleanly before sending
    /// anything. Empty lines preceding a head are skipped.
    pub async fn read_head(&mut self, max: usize) -> Result<Option<BytesMut>, HeadError> {
        let mut scanned = 0;
        loop {
            while self.buf.starts_with(b"\r\n") {
                self.buf.advance(2);
                scanned = 0;
            }

            if let Some(end) = find_head_end(&self.buf, scanned) {
                if end > max {
                    return Err(HeadError::TooLarge(max));
                }
                return Ok(Some(self.buf.split_to(end)));
            }
            if self.buf.len() > max {
                return Err(HeadError::TooLarge(max));
            }
            scanned = self.buf.len().saturating_sub(3);

            self.buf.reserve(READ_CHUNK);
            if self.io.read_buf(&mut self.buf).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(HeadError::Closed)
                };
            }
        }
    }

    /// Read one CRLF-terminated line, terminator included.
    ///
    /// `Ok(None)` means the peer closed before the line was complete.
    pub async fn read_line(&mut self, max: usize) -> std::io::Result<Option<BytesMut>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                return Ok(Some(self.buf.split_to(scanned + pos + 1)));
            }
            if self.buf.len() > max {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "line too long",
                ));
            }
            scanned = self.buf.len();

            self.buf.reserve(READ_CHUNK);
            if self.io.read_buf(&mut self.buf).await? == 0 {
                return Ok(None);
            }
        }
    }

    /// Read into `out`, serving buffered bytes first. Returns 0 on EOF.
    pub async fn read_some(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if !self.buf.is_empty() {
            let n = out.len().min(self.buf.len());
            out[..n].copy_from_slice(&self.buf[..n]);
            self.buf.advance(n);
            return Ok(n);
        }
        self.io.read(out).await
    }

    /// Bytes already buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.io.write_all(data).await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.io.flush().await
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io
    }
}

fn find_head_end(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| from + pos + 4)
}
