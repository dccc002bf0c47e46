//! Shared stream plumbing for backends built from split read/write halves.
//!
//! `StreamPair` adapts any `AsyncRead`/`AsyncWrite` half pair into a
//! `LinkStream`. The halves live behind async mutexes so the stream can be
//! shared behind `Arc<dyn LinkStream>` (one task reading, others writing),
//! and a `watch`-based closed flag is raced against every I/O future so that
//! `close()` reliably unblocks a pending read or write without a lost wakeup.

use crate::transport::{LinkStream, PeerAddr, TransportError, TransportResult};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};

/// A `LinkStream` over a split read half and write half.
pub struct StreamPair<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    peer: PeerAddr,
    closed: watch::Sender<bool>,
}

impl<R, W> StreamPair<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Build a stream from its halves and the remote peer's address.
    pub fn new(reader: R, writer: W, peer: PeerAddr) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
            closed,
        }
    }
}

#[async_trait]
impl<R, W> LinkStream for StreamPair<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = closed.changed() => Err(TransportError::Closed),
            res = reader.read(buf) => Ok(res?),
        }
    }

    async fn write(&self, buf: &[u8]) -> TransportResult<()> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            _ = closed.changed() => Err(TransportError::Closed),
            res = writer.write_all(buf) => {
                res?;
                Ok(())
            }
        }
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        // The flag is set first, so a write blocked on the mutex bails out
        // and releases it before this lock is taken.
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn peer(&self) -> PeerAddr {
        self.peer.clone()
    }
}
