//! Session role: the single active data-transfer connection.

use crate::coordinator::{LinkInner, RoleId};
use crate::state::LinkState;
use std::sync::Arc;
use tether_transport::{LinkStream, PeerAddr};
use tokio::task::JoinHandle;

/// The active session: the established stream plus its read-loop task.
///
/// The stream is shared so writes can be issued from callers while the read
/// loop runs; cancellation closes the stream, which unblocks a pending read
/// and ends the loop.
pub(crate) struct SessionHandle {
    pub(crate) id: RoleId,
    pub(crate) peer: PeerAddr,
    pub(crate) stream: Arc<dyn LinkStream>,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) fn spawn(
    inner: Arc<LinkInner>,
    stream: Arc<dyn LinkStream>,
    peer: PeerAddr,
    id: RoleId,
) -> SessionHandle {
    let task = tokio::spawn(run(inner, Arc::clone(&stream), peer.clone(), id));
    SessionHandle {
        id,
        peer,
        stream,
        task,
    }
}

async fn run(inner: Arc<LinkInner>, stream: Arc<dyn LinkStream>, peer: PeerAddr, id: RoleId) {
    tracing::debug!(id, %peer, "session started");
    let mut buf = vec![0u8; inner.config.read_buffer_size];

    while inner.state() == LinkState::Connected {
        match stream.read(&mut buf).await {
            Ok(0) => {
                tracing::info!(%peer, "peer closed the stream");
                break;
            }
            Ok(n) => {
                tracing::trace!(bytes = n, "inbound payload");
                inner.deliver_inbound(buf[..n].to_vec()).await;
            }
            Err(e) => {
                tracing::info!(%peer, "session read failed: {e}");
                break;
            }
        }
    }

    inner.connection_lost(id).await;
    tracing::debug!(id, "session ended");
}
