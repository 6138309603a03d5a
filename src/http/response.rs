//! Response heads and locally generated responses.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::head::{parse_head, BodyFraming, HeadError, Headers, Version};
use crate::http::stream::HttpStream;

/// Upper bound on writing a locally generated error response.
const ERROR_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A parsed status line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn parse(raw: &[u8]) -> Result<Self, HeadError> {
        let (start, headers) = parse_head(raw)?;
        let mut parts = start.splitn(3, ' ');
        let version = Version::parse(parts.next().unwrap_or_default())?;
        let status: u16 = parts
            .next()
            .filter(|s| s.len() == 3)
            .and_then(|s| s.parse().ok())
            .filter(|s| (100..1000).contains(s))
            .ok_or(HeadError::Malformed("invalid status code"))?;
        Ok(Self {
            version,
            status,
            reason: parts.next().unwrap_or_default().to_string(),
            headers,
        })
    }

    /// Interim 1xx response that is followed by the final one.
    /// `101 Switching Protocols` is final.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }

    /// Response body framing, which depends on the request method.
    pub fn framing(&self, request_was_head: bool) -> Result<BodyFraming, HeadError> {
        if request_was_head || (100..200).contains(&self.status) || self.status == 204 || self.status == 304 {
            return Ok(BodyFraming::Empty);
        }
        match self.headers.declared_framing() {
            Ok(Some(framing)) => Ok(framing),
            Ok(None) => Ok(BodyFraming::UntilClose),
            // Unknown transfer codings are delimited by connection close.
            Err(HeadError::Malformed("unsupported transfer-encoding")) => Ok(BodyFraming::UntilClose),
            Err(e) => Err(e),
        }
    }

    pub fn keep_alive(&self) -> bool {
        self.headers.keep_alive(self.version)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.version.as_str().as_bytes());
        out.extend_from_slice(format!(" {} ", self.status).as_bytes());
        out.extend_from_slice(self.reason.as_bytes());
        out.extend_from_slice(b"\r\n");
        self.headers.encode_into(&mut out);
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Reason phrase for the statuses the proxy generates itself.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        400 => "Bad Request",
        408 => "Request Timeout",
        431 => "Request Header Fields Too Large",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// A complete plain-text response that closes the connection.
pub fn error_response(status: u16, message: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        reason_phrase(status),
        message.len(),
        message
    )
    .into_bytes()
}

/// Write an [`error_response`] to the client, giving up quietly if the
/// client is gone or too slow.
pub async fn send_error<S>(client: &mut HttpStream<S>, status: u16, message: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = error_response(status, message);
    let write = async {
        client.write_all(&response).await?;
        client.flush().await
    };
    match tokio::time::timeout(ERROR_WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(status, error = %e, "Failed to send error response"),
        Err(_) => tracing::debug!(status, "Timed out sending error response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_line() {
        let head = ResponseHead::parse(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(head.framing(false).unwrap(), BodyFraming::Empty);
    }

    #[test]
    fn empty_reason_is_allowed() {
        let head = ResponseHead::parse(b"HTTP/1.1 200\r\n\r\n").unwrap();
        assert_eq!(head.reason, "");
        assert_eq!(head.framing(false).unwrap(), BodyFraming::UntilClose);
    }

    #[test]
    fn bodyless_statuses() {
        let head = ResponseHead::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\n").unwrap();
        assert_eq!(head.framing(true).unwrap(), BodyFraming::Empty);
        assert_eq!(head.framing(false).unwrap(), BodyFraming::Length(9));

        let head = ResponseHead::parse(b"HTTP/1.1 304 Not Modified\r\nContent-Length: 9\r\n\r\n").unwrap();
        assert_eq!(head.framing(false).unwrap(), BodyFraming::Empty);
    }

    #[test]
    fn interim_responses() {
        assert!(ResponseHead::parse(b"HTTP/1.1 100 Continue\r\n\r\n").unwrap().is_interim());
        assert!(!ResponseHead::parse(b"HTTP/1.1 101 Switching Protocols\r\n\r\n").unwrap().is_interim());
    }

    #[test]
    fn rejects_bad_status() {
        assert!(ResponseHead::parse(b"HTTP/1.1 20 OK\r\n\r\n").is_err());
        assert!(ResponseHead::parse(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
        assert!(ResponseHead::parse(b"ICY 200 OK\r\n\r\n").is_err());
    }

    #[test]
    fn error_response_format() {
        let raw = error_response(503, "No healthy backends");
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.contains("Content-Length: 19\r\n"));
        assert!(text.ends_with("\r\n\r\nNo healthy backends"));
    }
}
