//! HTTP/1.x message head parsing shared by requests and responses.
//!
//! Only what the relay needs is parsed: the start line, an ordered header
//! list, and the body framing. Header names keep their original case.

use std::fmt;

use thiserror::Error;

/// Upper bound on header lines in one head.
pub const MAX_HEADERS: usize = 128;

/// Failure while reading or parsing a message head.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("message head exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed message head: {0}")]
    Malformed(&'static str),
    #[error("connection closed in the middle of a message head")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol version on the start line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn parse(raw: &str) -> Result<Self, HeadError> {
        match raw {
            "HTTP/1.1" => Ok(Version::Http11),
            "HTTP/1.0" => Ok(Version::Http10),
            _ => Err(HeadError::Malformed("unsupported HTTP version")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the body following a head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body.
    Empty,
    /// Exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the peer closes (responses only).
    UntilClose,
}

impl BodyFraming {
    /// True when the end of the body is visible without closing the connection.
    pub fn is_delimited(&self) -> bool {
        !matches!(self, BodyFraming::UntilClose)
    }
}

/// Ordered, case-preserving header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name` (case-insensitive), in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when any comma-separated element of `name` equals `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Comma-separated elements across every `name` header.
    pub fn tokens<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Remove every `name` header. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    /// Mutable access to the last `name` header value.
    pub fn last_mut(&mut self, name: &str) -> Option<&mut String> {
        self.0
            .iter_mut()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append `Name: value\r\n` lines.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for (name, value) in &self.0 {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }

    /// Framing declared by `Transfer-Encoding` / `Content-Length`.
    ///
    /// `Ok(None)` means neither header is present. A transfer coding other
    /// than a final `chunked` yields `Err` so each side can decide.
    pub fn declared_framing(&self) -> Result<Option<BodyFraming>, HeadError> {
        if self.contains("transfer-encoding") {
            return match self.tokens("transfer-encoding").last() {
                Some(last) if last.eq_ignore_ascii_case("chunked") => Ok(Some(BodyFraming::Chunked)),
                _ => Err(HeadError::Malformed("unsupported transfer-encoding")),
            };
        }

        let mut length: Option<u64> = None;
        for value in self.tokens("content-length") {
            let parsed: u64 = value
                .parse()
                .map_err(|_| HeadError::Malformed("invalid content-length"))?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(HeadError::Malformed("conflicting content-length"));
                }
                _ => length = Some(parsed),
            }
        }
        Ok(length.map(|n| {
            if n == 0 {
                BodyFraming::Empty
            } else {
                BodyFraming::Length(n)
            }
        }))
    }

    /// Keep-alive per HTTP/1.x defaults and the `Connection` header.
    pub fn keep_alive(&self, version: Version) -> bool {
        match version {
            Version::Http11 => !self.has_token("connection", "close"),
            Version::Http10 => self.has_token("connection", "keep-alive"),
        }
    }
}

/// Split a raw head (ending in an empty line) into start line and headers.
pub fn parse_head(raw: &[u8]) -> Result<(&str, Headers), HeadError> {
    let text = std::str::from_utf8(raw).map_err(|_| HeadError::Malformed("head is not valid UTF-8"))?;
    let text = text.trim_end_matches("\r\n");

    let mut lines = text.split("\r\n");
    let start = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or(HeadError::Malformed("missing start line"))?;

    let mut headers = Headers::new();
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(HeadError::Malformed("obsolete header line folding"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(HeadError::Malformed("header line without colon"))?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(HeadError::Malformed("invalid header name"));
        }
        if headers.len() == MAX_HEADERS {
            return Err(HeadError::Malformed("too many headers"));
        }
        headers.push(name, value.trim());
    }
    Ok((start, headers))
}
