//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Classify accept errors as transient or fatal

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The bind address did not parse.
    #[error("invalid bind address {0:?}")]
    InvalidAddress(String),
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(std::io::Error),
    /// The admission semaphore was closed.
    #[error("listener closed")]
    Closed,
}

impl ListenerError {
    /// True for accept failures worth retrying after a short pause.
    pub fn is_transient(&self) -> bool {
        let ListenerError::Accept(e) = self else {
            return false;
        };
        use std::io::ErrorKind::*;
        if matches!(
            e.kind(),
            ConnectionRefused
                | ConnectionAborted
                | ConnectionReset
                | Interrupted
                | TimedOut
                | WouldBlock
                | OutOfMemory
        ) {
            return true;
        }
        // Descriptor and buffer exhaustion have no stable `ErrorKind`.
        e.raw_os_error()
            .is_some_and(|code| RESOURCE_ERRNOS.contains(&code))
    }
}

/// EMFILE, ENFILE, ENOBUFS and ENOMEM. ENOBUFS differs between Linux and
/// the BSD family; other targets only get the `ErrorKind` checks above.
#[cfg(any(target_os = "linux", target_os = "android"))]
const RESOURCE_ERRNOS: &[i32] = &[24, 23, 105, 12];
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
))]
const RESOURCE_ERRNOS: &[i32] = &[24, 23, 55, 12];
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
const RESOURCE_ERRNOS: &[i32] = &[];

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::InvalidAddress(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;

        Ok(Self::from_tcp(listener, config.max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, max_connections, "Listener bound");
        }
        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Waits for a free slot before accepting. The returned permit must be
    /// held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This keeps backpressure intact even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admission_is_bounded() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Listener::from_tcp(tcp, 1);
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();

        let (_s1, _, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        // Second accept waits for the first permit.
        let blocked = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(blocked.is_err());

        drop(permit);
        let accepted = tokio::time::timeout(Duration::from_secs(1), listener.accept()).await;
        assert!(accepted.unwrap().is_ok());
    }

    #[tokio::test]
    async fn bad_address_is_rejected() {
        let config = ListenerConfig {
            bind_address: "not-an-address".to_string(),
            max_connections: 1,
        };
        assert!(matches!(
            Listener::bind(&config).await,
            Err(ListenerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn transient_classification() {
        let reset = ListenerError::Accept(std::io::Error::from(std::io::ErrorKind::ConnectionAborted));
        assert!(reset.is_transient());
        let oom = ListenerError::Accept(std::io::Error::from(std::io::ErrorKind::OutOfMemory));
        assert!(oom.is_transient());
        assert!(!ListenerError::Bind {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        }
        .is_transient());
        assert!(!ListenerError::Closed.is_transient());
        let other = ListenerError::Accept(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!other.is_transient());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_resource_exhaustion_is_transient() {
        for errno in [24, 23, 105, 12] {
            let err = ListenerError::Accept(std::io::Error::from_raw_os_error(errno));
            assert!(err.is_transient(), "errno {errno}");
        }
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn macos_enobufs_is_transient() {
        let err = ListenerError::Accept(std::io::Error::from_raw_os_error(55));
        assert!(err.is_transient());
    }
}
