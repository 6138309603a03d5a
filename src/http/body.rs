//! Streaming body relay.
//!
//! Bodies are copied through a fixed buffer and never held whole in
//! memory. Chunked bodies are passed on verbatim, chunk headers and
//! trailers included, so the receiver sees exactly what was sent.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::http::head::BodyFraming;
use crate::http::stream::HttpStream;

/// Longest accepted chunk-size or trailer line.
const MAX_CHUNK_LINE: usize = 4096;

/// Failure while relaying a body. `Read` errors come from the source,
/// `Write` errors from the destination.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("read failed: {0}")]
    Read(std::io::Error),
    #[error("write failed: {0}")]
    Write(std::io::Error),
    #[error("peer closed before the body was complete")]
    UnexpectedEof,
    #[error("invalid chunked encoding: {0}")]
    InvalidChunk(&'static str),
}

/// Copy one body from `src` to `dst` according to `framing`.
///
/// Adds the number of bytes written to `counter` as it goes, so the
/// count stays accurate when the relay fails part way.
pub async fn relay_body<R, W>(
    src: &mut HttpStream<R>,
    dst: &mut W,
    framing: BodyFraming,
    buf: &mut [u8],
    counter: &mut u64,
) -> Result<(), RelayError>
where
    R: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::Empty => Ok(()),
        BodyFraming::Length(n) => copy_exact(src, dst, n, buf, counter).await,
        BodyFraming::Chunked => copy_chunked(src, dst, buf, counter).await,
        BodyFraming::UntilClose => copy_until_close(src, dst, buf, counter).await,
    }
}

async fn copy_exact<R, W>(
    src: &mut HttpStream<R>,
    dst: &mut W,
    mut remaining: u64,
    buf: &mut [u8],
    counter: &mut u64,
) -> Result<(), RelayError>
where
    R: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = src.read_some(&mut buf[..want]).await.map_err(RelayError::Read)?;
        if n == 0 {
            return Err(RelayError::UnexpectedEof);
        }
        dst.write_all(&buf[..n]).await.map_err(RelayError::Write)?;
        remaining -= n as u64;
        *counter += n as u64;
    }
    dst.flush().await.map_err(RelayError::Write)
}

async fn copy_until_close<R, W>(
    src: &mut HttpStream<R>,
    dst: &mut W,
    buf: &mut [u8],
    counter: &mut u64,
) -> Result<(), RelayError>
where
    R: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let n = src.read_some(buf).await.map_err(RelayError::Read)?;
        if n == 0 {
            return dst.flush().await.map_err(RelayError::Write);
        }
        dst.write_all(&buf[..n]).await.map_err(RelayError::Write)?;
        *counter += n as u64;
    }
}

async fn copy_chunked<R, W>(
    src: &mut HttpStream<R>,
    dst: &mut W,
    buf: &mut [u8],
    counter: &mut u64,
) -> Result<(), RelayError>
where
    R: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = read_chunk_line(src).await?;
        let size = parse_chunk_size(&line)?;
        forward(dst, &line, counter).await?;

        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                let trailer = read_chunk_line(src).await?;
                forward(dst, &trailer, counter).await?;
                if trailer.as_slice() == b"\r\n" || trailer.as_slice() == b"\n" {
                    return dst.flush().await.map_err(RelayError::Write);
                }
            }
        }

        copy_exact(src, dst, size, buf, counter).await?;

        let end = read_chunk_line(src).await?;
        if end.as_slice() != b"\r\n" && end.as_slice() != b"\n" {
            return Err(RelayError::InvalidChunk("missing CRLF after chunk data"));
        }
        forward(dst, &end, counter).await?;
    }
}

async fn read_chunk_line<R>(src: &mut HttpStream<R>) -> Result<Vec<u8>, RelayError>
where
    R: AsyncRead + AsyncWrite + Unpin,
{
    match src.read_line(MAX_CHUNK_LINE).await {
        Ok(Some(line)) => Ok(line.to_vec()),
        Ok(None) => Err(RelayError::UnexpectedEof),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            Err(RelayError::InvalidChunk("line too long"))
        }
        Err(e) => Err(RelayError::Read(e)),
    }
}

async fn forward<W>(dst: &mut W, data: &[u8], counter: &mut u64) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    dst.write_all(data).await.map_err(RelayError::Write)?;
    *counter += data.len() as u64;
    Ok(())
}

/// Parse the hex size at the start of a chunk header line.
/// Chunk extensions after `;` are ignored.
fn parse_chunk_size(line: &[u8]) -> Result<u64, RelayError> {
    let text = std::str::from_utf8(line).map_err(|_| RelayError::InvalidChunk("non-ASCII chunk size"))?;
    let digits = text
        .trim_end_matches(['\r', '\n'])
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if digits.is_empty() || digits.len() > 16 {
        return Err(RelayError::InvalidChunk("bad chunk size"));
    }
    u64::from_str_radix(digits, 16).map_err(|_| RelayError::InvalidChunk("bad chunk size"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn relay(input: &[u8], framing: BodyFraming) -> (Result<(), RelayError>, Vec<u8>, u64) {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        writer.write_all(input).await.unwrap();
        drop(writer);

        let mut src = HttpStream::new(reader);
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        let mut count = 0;
        let result = relay_body(&mut src, &mut out, framing, &mut buf, &mut count).await;
        (result, out, count)
    }

    #[test]
    fn chunk_size_parsing() {
        assert_eq!(parse_chunk_size(b"1a\r\n").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"0;ext=1\r\n").unwrap(), 0);
        assert!(parse_chunk_size(b"\r\n").is_err());
        assert!(parse_chunk_size(b"zz\r\n").is_err());
    }

    #[tokio::test]
    async fn exact_length_stops_at_boundary() {
        let (result, out, count) = relay(b"hello worldEXTRA", BodyFraming::Length(11)).await;
        result.unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(count, 11);
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let (result, out, count) = relay(b"abc", BodyFraming::Length(10)).await;
        assert!(matches!(result, Err(RelayError::UnexpectedEof)));
        assert_eq!(out, b"abc");
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn chunked_is_copied_verbatim() {
        let body = b"5\r\nhello\r\n10;x=y\r\n0123456789abcdef\r\n0\r\nTrailer: v\r\n\r\n";
        let mut input = body.to_vec();
        input.extend_from_slice(b"GET /next HTTP/1.1\r\n\r\n");

        let (result, out, count) = relay(&input, BodyFraming::Chunked).await;
        result.unwrap();
        assert_eq!(out, body.to_vec());
        assert_eq!(count, body.len() as u64);
    }

    #[tokio::test]
    async fn truncated_chunked_body() {
        let (result, _, _) = relay(b"5\r\nhel", BodyFraming::Chunked).await;
        assert!(matches!(result, Err(RelayError::UnexpectedEof)));

        let (result, _, _) = relay(b"5\r\nhelloXX0\r\n\r\n", BodyFraming::Chunked).await;
        assert!(matches!(result, Err(RelayError::InvalidChunk(_))));
    }

    #[tokio::test]
    async fn until_close_reads_everything() {
        let (result, out, _) = relay(b"all of it", BodyFraming::UntilClose).await;
        result.unwrap();
        assert_eq!(out, b"all of it");
    }
}
