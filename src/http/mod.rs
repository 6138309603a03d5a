//! HTTP/1.1 proxying subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection
//!     → server.rs (request loop, keep-alive, admission)
//!     → stream.rs + head.rs + request.rs (read and parse the request head)
//!     → Selector picks a backend
//!     → forwarder.rs (dial, rewrite headers, relay request)
//!     → body.rs (stream bodies in both directions)
//!     → response.rs (parse backend head, decide reuse)
//!     → Outcome recorded once, event emitted
//! ```

pub mod body;
pub mod context;
pub mod forwarder;
pub mod head;
pub mod request;
pub mod response;
pub mod server;
pub mod stream;

pub use context::{Outcome, ProxyRequestContext};
pub use forwarder::{ForwardError, Forwarder, ForwarderConfig};
pub use head::{BodyFraming, HeadError, Headers, Version};
pub use request::{RequestHead, RequestId, X_REQUEST_ID};
pub use response::ResponseHead;
pub use server::ProxyServer;
pub use stream::HttpStream;
