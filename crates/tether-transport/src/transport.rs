//! Transport trait abstraction for multiple stream-transport backends.
//!
//! This module defines the core `Transport` trait that abstracts over
//! connection-oriented byte-stream transports (TCP, an in-memory hub, a
//! Bluetooth RFCOMM equivalent). The link coordinator works entirely against
//! these traits, so the same lifecycle logic runs over any backend.
//!
//! Cancellation contract: closing a `LinkListener` unblocks a pending
//! `accept`, and closing a `LinkStream` unblocks a pending `read`. This is
//! the only supported way to interrupt blocked transport I/O.

use async_trait::async_trait;
use std::fmt;
use std::io;
use uuid::Uuid;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Endpoint or stream is closed
    #[error("endpoint is closed")]
    Closed,

    /// Address binding failed
    #[error("failed to bind listening endpoint: {0}")]
    BindFailed(String),

    /// Outbound connection attempt failed
    #[error("dial failed: {0}")]
    DialFailed(String),

    /// Peer address could not be interpreted by this backend
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Well-known identifier locating the listening service on a transport.
///
/// Both peers must agree on the service id out of band; it plays the role a
/// service-record UUID plays on record-based transports. Backends without a
/// service registry (plain TCP) carry it for parity but do not use it to
/// select the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Create a service id from a raw 128-bit value.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Create a fresh random service id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ServiceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Opaque stable address identifying a remote endpoint.
///
/// The interpretation is backend-specific: a `host:port` pair for TCP, an
/// endpoint name for the in-memory hub, a device address elsewhere. The link
/// coordinator never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr(String);

impl PeerAddr {
    /// Create a peer address from its backend-specific representation.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get the backend-specific representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddr {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

/// Async transport over connection-oriented byte streams.
///
/// Implementations are shared behind `Arc<dyn Transport>`; all methods take
/// `&self` and are safe to call concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a listening endpoint for the given service.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the endpoint cannot be opened.
    async fn listen(&self, service: &ServiceId) -> TransportResult<Box<dyn LinkListener>>;

    /// Open an outbound stream to a peer's listening service.
    ///
    /// May block until the connection is established or fails.
    ///
    /// # Errors
    /// Returns `TransportError::DialFailed` if the peer cannot be reached,
    /// or `TransportError::InvalidAddress` if the address is not valid for
    /// this backend.
    async fn dial(&self, peer: &PeerAddr, service: &ServiceId)
    -> TransportResult<Box<dyn LinkStream>>;

    /// Pause any discovery-like background activity before dialing.
    ///
    /// Backends with a scanning or advertisement phase override this; the
    /// default is a no-op. Called by the dialer immediately before the
    /// outbound attempt, since scanning competes with connecting on shared
    /// radios.
    async fn suspend_discovery(&self) {}
}

/// A bound, listening endpoint yielding inbound streams.
#[async_trait]
pub trait LinkListener: Send + Sync {
    /// Accept one inbound connection.
    ///
    /// Blocks until a peer connects, the endpoint fails, or the endpoint is
    /// closed from another task.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the endpoint has been closed.
    async fn accept(&self) -> TransportResult<(Box<dyn LinkStream>, PeerAddr)>;

    /// The address peers dial to reach this endpoint.
    ///
    /// # Errors
    /// Returns an error if the backend cannot determine the bound address.
    fn local_addr(&self) -> TransportResult<PeerAddr>;

    /// Close the endpoint, unblocking any pending `accept`.
    ///
    /// Idempotent; safe to call multiple times.
    async fn close(&self);
}

/// An established bidirectional byte stream.
///
/// Streams are shared behind `Arc<dyn LinkStream>`: the session role reads in
/// its own task while writes arrive from callers concurrently. Read and write
/// sides are internally serialized.
#[async_trait]
pub trait LinkStream: Send + Sync {
    /// Read up to `buf.len()` bytes.
    ///
    /// Returns the number of bytes read; `Ok(0)` signals end of stream.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the stream has been closed
    /// locally, or an I/O error if the peer side died.
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Write all of `buf` to the stream.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the stream has been closed
    /// locally, or an I/O error if the peer side died.
    async fn write(&self, buf: &[u8]) -> TransportResult<()>;

    /// Close the stream, unblocking any pending read or write.
    ///
    /// Idempotent; safe to call multiple times.
    async fn close(&self);

    /// The remote endpoint's address.
    fn peer(&self) -> PeerAddr;
}
