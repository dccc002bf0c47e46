//! Dialer role: one outbound connection attempt to a chosen peer.

use crate::coordinator::{LinkInner, RoleId, SessionOrigin};
use std::sync::Arc;
use tether_transport::PeerAddr;
use tokio::task::JoinHandle;

/// An active outbound attempt.
///
/// Owned by the coordinator; cancellation aborts the task, which drops the
/// in-flight dial and thereby closes any partially open attempt.
pub(crate) struct DialerHandle {
    pub(crate) id: RoleId,
    pub(crate) peer: PeerAddr,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) fn spawn(inner: Arc<LinkInner>, peer: PeerAddr, id: RoleId) -> DialerHandle {
    let task = tokio::spawn(run(inner, peer.clone(), id));
    DialerHandle { id, peer, task }
}

async fn run(inner: Arc<LinkInner>, peer: PeerAddr, id: RoleId) {
    tracing::debug!(id, %peer, "outbound attempt started");

    // Scanning competes with connecting on shared radios; pause it first.
    inner.transport.suspend_discovery().await;

    match inner.transport.dial(&peer, &inner.config.service).await {
        Ok(stream) => {
            if inner.claim_dialer(id).await {
                inner
                    .session_established(stream, peer, SessionOrigin::Outbound)
                    .await;
            } else {
                tracing::debug!(%peer, "outbound attempt superseded, discarding stream");
                stream.close().await;
            }
        }
        Err(e) => {
            tracing::info!(%peer, "dial failed: {e}");
            inner.connection_failed(id, peer).await;
        }
    }
}
