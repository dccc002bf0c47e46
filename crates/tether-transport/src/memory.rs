//! In-memory transport backend for tests and simulation.
//!
//! A `MemoryHub` is a process-local wire: endpoints register listening
//! services in a shared registry keyed by `(peer, service)`, and dialing
//! looks the target up and hands it one half of a duplex pipe. Streams and
//! listeners behave exactly like the TCP backend's, including the
//! close-unblocks-pending-I/O contract, which makes the hub suitable for
//! driving every race and recovery scenario deterministically.

use crate::stream::StreamPair;
use crate::transport::{
    LinkListener, LinkStream, PeerAddr, ServiceId, Transport, TransportError, TransportResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};

const PIPE_CAPACITY: usize = 64 * 1024;

struct Inbound {
    stream: Box<dyn LinkStream>,
    peer: PeerAddr,
}

struct ServiceEntry {
    token: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

type Registry = Arc<DashMap<(PeerAddr, ServiceId), ServiceEntry>>;

/// A process-local wire connecting `MemoryTransport` endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    registry: Registry,
    tokens: Arc<AtomicU64>,
}

impl MemoryHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint attached to this hub under the given name.
    ///
    /// The name is the endpoint's `PeerAddr`: other endpoints dial it by
    /// this name.
    pub fn endpoint(&self, name: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            local: PeerAddr::new(name),
            registry: Arc::clone(&self.registry),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

/// One endpoint on a `MemoryHub`.
pub struct MemoryTransport {
    local: PeerAddr,
    registry: Registry,
    tokens: Arc<AtomicU64>,
}

impl MemoryTransport {
    /// This endpoint's own address on the hub.
    #[must_use]
    pub fn local_addr(&self) -> PeerAddr {
        self.local.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, service: &ServiceId) -> TransportResult<Box<dyn LinkListener>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        let key = (self.local.clone(), *service);

        // A newer listener replaces an older one; the old receiver's sender
        // is dropped here, so its pending accept ends.
        self.registry.insert(key, ServiceEntry { token, tx });

        let (closed, _) = watch::channel(false);
        Ok(Box::new(MemoryListener {
            local: self.local.clone(),
            service: *service,
            token,
            rx: Mutex::new(rx),
            closed,
            registry: Arc::clone(&self.registry),
        }))
    }

    async fn dial(
        &self,
        peer: &PeerAddr,
        service: &ServiceId,
    ) -> TransportResult<Box<dyn LinkStream>> {
        let key = (peer.clone(), *service);
        let entry = self
            .registry
            .get(&key)
            .ok_or_else(|| TransportError::DialFailed(format!("no listener at {peer}")))?;

        let (ours, theirs) = pipe_pair(peer.clone(), self.local.clone());
        entry
            .tx
            .send(Inbound {
                stream: Box::new(theirs),
                peer: self.local.clone(),
            })
            .map_err(|_| TransportError::DialFailed(format!("listener at {peer} is gone")))?;

        Ok(Box::new(ours))
    }
}

/// Listening endpoint on a `MemoryHub`.
struct MemoryListener {
    local: PeerAddr,
    service: ServiceId,
    token: u64,
    rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    closed: watch::Sender<bool>,
    registry: Registry,
}

#[async_trait]
impl LinkListener for MemoryListener {
    async fn accept(&self) -> TransportResult<(Box<dyn LinkStream>, PeerAddr)> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = closed.changed() => Err(TransportError::Closed),
            inbound = rx.recv() => match inbound {
                Some(Inbound { stream, peer }) => Ok((stream, peer)),
                None => Err(TransportError::Closed),
            },
        }
    }

    fn local_addr(&self) -> TransportResult<PeerAddr> {
        Ok(self.local.clone())
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        // Deregister so subsequent dials fail, but only if this listener is
        // still the registered one (a replacement may have taken the slot).
        self.registry
            .remove_if(&(self.local.clone(), self.service), |_, entry| {
                entry.token == self.token
            });
    }
}

type Pipe = StreamPair<
    tokio::io::ReadHalf<tokio::io::DuplexStream>,
    tokio::io::WriteHalf<tokio::io::DuplexStream>,
>;

fn pipe_pair(remote_of_ours: PeerAddr, remote_of_theirs: PeerAddr) -> (Pipe, Pipe) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    let (ra, wa) = tokio::io::split(a);
    let (rb, wb) = tokio::io::split(b);
    (
        StreamPair::new(ra, wa, remote_of_ours),
        StreamPair::new(rb, wb, remote_of_theirs),
    )
}
