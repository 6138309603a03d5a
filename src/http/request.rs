//! Request heads and request IDs.
//!
//! # Responsibilities
//! - Parse the client's request line and headers
//! - Decide request body framing and keep-alive
//! - Generate unique request IDs

use std::fmt;

use uuid::Uuid;

use crate::http::head::{parse_head, BodyFraming, HeadError, Headers, Version};

/// Header used to propagate the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Unique identifier for one request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parsed request line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

impl RequestHead {
    pub fn parse(raw: &[u8]) -> Result<Self, HeadError> {
        let (start, headers) = parse_head(raw)?;
        let mut parts = start.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HeadError::Malformed("invalid request line"));
        };
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(HeadError::Malformed("invalid method"));
        }
        if target.is_empty() {
            return Err(HeadError::Malformed("empty request target"));
        }
        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: Version::parse(version)?,
            headers,
        })
    }

    /// Request body framing. Requests without length headers have no body.
    pub fn framing(&self) -> Result<BodyFraming, HeadError> {
        Ok(self.headers.declared_framing()?.unwrap_or(BodyFraming::Empty))
    }

    pub fn keep_alive(&self) -> bool {
        self.headers.keep_alive(self.version)
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    pub fn expects_continue(&self) -> bool {
        self.version == Version::Http11 && self.headers.has_token("expect", "100-continue")
    }

    /// Serialize back to wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.target.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.version.as_str().as_bytes());
        out.extend_from_slice(b"\r\n");
        self.headers.encode_into(&mut out);
        out.extend_from_slice(b"\r\n");
        out
    }
}
