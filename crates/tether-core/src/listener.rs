//! Listener role: accepts inbound connections while no session is active.

use crate::coordinator::{LinkInner, RoleId, SessionOrigin};
use crate::state::LinkState;
use std::sync::Arc;
use tether_transport::LinkListener;
use tokio::task::JoinHandle;

/// An active listener: the bound endpoint plus the accept-loop task.
///
/// Owned by the coordinator; cancellation closes the endpoint, which is the
/// only reliable way to unblock a pending accept.
pub(crate) struct ListenerHandle {
    pub(crate) id: RoleId,
    pub(crate) endpoint: Arc<dyn LinkListener>,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) fn spawn(
    inner: Arc<LinkInner>,
    endpoint: Arc<dyn LinkListener>,
    id: RoleId,
) -> ListenerHandle {
    let task = tokio::spawn(run(inner, Arc::clone(&endpoint), id));
    ListenerHandle { id, endpoint, task }
}

async fn run(inner: Arc<LinkInner>, endpoint: Arc<dyn LinkListener>, id: RoleId) {
    tracing::debug!(id, "listener started");

    while inner.state() != LinkState::Connected {
        match endpoint.accept().await {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "inbound connection");
                Arc::clone(&inner)
                    .session_established(stream, peer, SessionOrigin::Inbound { listener: id })
                    .await;
            }
            Err(e) => {
                // Includes the endpoint close used for cancellation.
                tracing::debug!(id, "accept ended: {e}");
                break;
            }
        }
    }

    inner.clear_listener(id).await;
    tracing::debug!(id, "listener ended");
}
