//! Header rewriting between client and backend.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Append the client address to X-Forwarded-For
//! - Propagate the request ID to the backend
//! - State the client connection's fate in the response
//!
//! # Design Decisions
//! - `Transfer-Encoding` and `Content-Length` pass through since bodies are
//!   relayed verbatim, except that `Content-Length` is dropped when a
//!   transfer-coding is present so the next hop frames the body the same way
//! - An existing X-Forwarded-For chain is extended, never replaced

use std::net::IpAddr;

use crate::http::head::{Headers, Version};
use crate::http::request::{RequestHead, RequestId, X_REQUEST_ID};
use crate::http::response::ResponseHead;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut Headers) {
    let listed: Vec<String> = headers
        .tokens("connection")
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| t != "transfer-encoding" && t != "content-length")
        .collect();
    for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

/// Add the client address to the end of the X-Forwarded-For chain.
pub fn append_forwarded_for(headers: &mut Headers, client: IpAddr) {
    match headers.last_mut(X_FORWARDED_FOR) {
        Some(chain) if !chain.trim().is_empty() => {
            chain.push_str(", ");
            chain.push_str(&client.to_string());
        }
        Some(chain) => *chain = client.to_string(),
        None => headers.push("X-Forwarded-For", client.to_string()),
    }
}

/// Drop `Content-Length` when `Transfer-Encoding` is also present.
///
/// The transfer-coding decides the framing, and a receiver that honoured
/// the stale length would split messages differently.
pub fn drop_conflicting_length(headers: &mut Headers) {
    if headers.contains("transfer-encoding") {
        headers.remove("content-length");
    }
}

/// Rewrite a client request for the backend.
///
/// `Expect` is answered by the proxy itself and is not passed on.
pub fn prepare_request(head: &mut RequestHead, client: IpAddr, id: RequestId) {
    strip_hop_by_hop(&mut head.headers);
    drop_conflicting_length(&mut head.headers);
    head.headers.remove("expect");
    append_forwarded_for(&mut head.headers, client);
    if !head.headers.contains(X_REQUEST_ID) {
        head.headers.push("X-Request-Id", id.to_string());
    }
}

/// Rewrite a backend response for the client.
///
/// `reuse` says whether the client connection stays open afterwards.
pub fn prepare_response(head: &mut ResponseHead, reuse: bool, client_version: Version) {
    strip_hop_by_hop(&mut head.headers);
    drop_conflicting_length(&mut head.headers);
    if !reuse {
        head.headers.push("Connection", "close");
    } else if client_version == Version::Http10 {
        head.headers.push("Connection", "keep-alive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw: &[u8]) -> RequestHead {
        RequestHead::parse(raw).unwrap()
    }

    #[test]
    fn strips_hop_by_hop_and_listed_headers() {
        let mut head = request(
            b"GET / HTTP/1.1\r\nHost: a\r\nConnection: keep-alive, X-Secret\r\nX-Secret: 1\r\n\
              Keep-Alive: timeout=5\r\nUpgrade: websocket\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        strip_hop_by_hop(&mut head.headers);
        let names: Vec<&str> = head.headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Host", "Transfer-Encoding"]);
    }

    #[test]
    fn chunked_request_loses_content_length() {
        let mut head = request(
            b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        prepare_request(&mut head, "127.0.0.1".parse().unwrap(), RequestId::new());
        assert_eq!(head.headers.get("transfer-encoding"), Some("chunked"));
        assert!(!head.headers.contains("content-length"));

        let mut head = request(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\n");
        prepare_request(&mut head, "127.0.0.1".parse().unwrap(), RequestId::new());
        assert_eq!(head.headers.get("content-length"), Some("3"));
    }

    #[test]
    fn forwarded_for_is_created_or_extended() {
        let client: IpAddr = "10.0.0.7".parse().unwrap();

        let mut headers = Headers::new();
        append_forwarded_for(&mut headers, client);
        assert_eq!(headers.get("x-forwarded-for"), Some("10.0.0.7"));

        let mut headers = Headers::new();
        headers.push("X-Forwarded-For", "203.0.113.1");
        append_forwarded_for(&mut headers, client);
        assert_eq!(headers.get("x-forwarded-for"), Some("203.0.113.1, 10.0.0.7"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn request_gets_id_unless_present() {
        let id = RequestId::new();
        let client: IpAddr = "127.0.0.1".parse().unwrap();

        let mut head = request(b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 1\r\n\r\n");
        prepare_request(&mut head, client, id);
        assert_eq!(head.headers.get(X_REQUEST_ID), Some(id.to_string().as_str()));
        assert!(!head.headers.contains("expect"));
        assert_eq!(head.headers.get("content-length"), Some("1"));

        let mut head = request(b"GET / HTTP/1.1\r\nX-Request-Id: abc\r\n\r\n");
        prepare_request(&mut head, client, id);
        assert_eq!(head.headers.get_all(X_REQUEST_ID).collect::<Vec<_>>(), vec!["abc"]);
    }

    #[test]
    fn response_connection_header() {
        let raw = b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n";

        let mut head = ResponseHead::parse(raw).unwrap();
        prepare_response(&mut head, false, Version::Http11);
        assert_eq!(head.headers.get_all("connection").collect::<Vec<_>>(), vec!["close"]);

        let mut head = ResponseHead::parse(raw).unwrap();
        prepare_response(&mut head, true, Version::Http11);
        assert!(!head.headers.contains("connection"));

        let mut head = ResponseHead::parse(raw).unwrap();
        prepare_response(&mut head, true, Version::Http10);
        assert_eq!(head.headers.get("connection"), Some("keep-alive"));
    }
}
