//! Connection coordinator.
//!
//! `Link` owns the lifecycle state and the three role slots (listener,
//! dialer, session) behind one exclusive lock. Every transition (role
//! start, role success, role failure) runs as a single critical section:
//! superseded roles have their endpoint or stream closed before the
//! replacement is installed, so no two roles of the same kind are ever live
//! at once and a listener success racing a dial success resolves
//! deterministically.
//!
//! Role tasks identify themselves with a generation id (`RoleId`); a
//! transition reported by a role that has already been superseded is a
//! no-op. Task joins are reaped only after the critical section ends, since
//! a cancelled role's final transition call needs the same lock.

use crate::config::LinkConfig;
use crate::dialer::{self, DialerHandle};
use crate::event::LinkEvent;
use crate::listener::{self, ListenerHandle};
use crate::session::{self, SessionHandle};
use crate::state::LinkState;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tether_transport::{LinkListener, LinkStream, PeerAddr, Transport};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Generation id distinguishing a role instance from its successors.
pub(crate) type RoleId = u64;

/// Which role produced an established stream.
pub(crate) enum SessionOrigin {
    /// The listener accepted an inbound connection.
    Inbound {
        /// The accepting listener's generation.
        listener: RoleId,
    },
    /// The dialer connected out. The dialer has already taken its own
    /// handle out of the coordinator via `claim_dialer`.
    Outbound,
}

/// Join handles of superseded role tasks, reaped after the lock is released.
#[derive(Default)]
struct Teardown {
    tasks: Vec<JoinHandle<()>>,
}

impl Teardown {
    fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    async fn reap(self) {
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
    }
}

/// The three role slots plus the state they drive, guarded by one lock.
struct Roles {
    state: LinkState,
    listener: Option<ListenerHandle>,
    dialer: Option<DialerHandle>,
    session: Option<SessionHandle>,
}

/// Shared coordinator state.
pub(crate) struct LinkInner {
    pub(crate) config: LinkConfig,
    pub(crate) transport: Arc<dyn Transport>,
    roles: Mutex<Roles>,
    state_snapshot: AtomicU8,
    events: mpsc::Sender<LinkEvent>,
    next_role_id: AtomicU64,
}

/// Point-to-point link over a stream transport.
///
/// A `Link` listens for inbound sessions while remaining able to dial out;
/// whichever attempt wins becomes the single active session and every
/// competing attempt is torn down. Session loss or dial failure cycles the
/// link back to listening. Cheap to clone; all clones drive the same link.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tether_core::{Link, LinkConfig, LinkEvent};
/// use tether_transport::{PeerAddr, TcpTransport};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = Arc::new(TcpTransport::new("0.0.0.0:7654".parse().unwrap()));
///     let (link, mut events) = Link::new(transport, LinkConfig::default());
///     link.start().await;
///     link.connect(PeerAddr::new("192.0.2.7:7654")).await;
///
///     while let Some(event) = events.recv().await {
///         if let LinkEvent::Inbound(payload) = event {
///             link.write(&payload).await;
///         }
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl Link {
    /// Create a link over the given transport.
    ///
    /// Returns the link and the receiving end of its event channel. The link
    /// starts in `Idle`; call [`start`](Self::start) to begin listening.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: LinkConfig,
    ) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (events, events_rx) = mpsc::channel(config.event_capacity);
        let inner = LinkInner {
            config,
            transport,
            roles: Mutex::new(Roles {
                state: LinkState::Idle,
                listener: None,
                dialer: None,
                session: None,
            }),
            state_snapshot: AtomicU8::new(LinkState::Idle as u8),
            events,
            next_role_id: AtomicU64::new(1),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Start (or re-arm) listening.
    ///
    /// Cancels any active dialer, then opens a listening endpoint if none is
    /// active. Idempotent; safe to call repeatedly, including after every
    /// failure. A bind failure is logged and leaves the link without an
    /// inbound path until `start` is called again.
    pub async fn start(&self) {
        let mut teardown = Teardown::default();
        {
            let mut roles = self.inner.roles.lock().await;
            LinkInner::start_locked(&self.inner, &mut roles, &mut teardown).await;
        }
        teardown.reap().await;
    }

    /// Dial out to a peer.
    ///
    /// Replaces any outbound attempt already in flight and cancels any
    /// active session. The listener keeps running: a competing inbound
    /// accept may still win.
    pub async fn connect(&self, peer: PeerAddr) {
        let mut teardown = Teardown::default();
        {
            let mut roles = self.inner.roles.lock().await;
            if let Some(dialer) = roles.dialer.take() {
                tracing::debug!(old = %dialer.peer, new = %peer, "replacing outbound attempt");
                teardown.push(dialer.task);
            }
            if let Some(old) = roles.session.take() {
                tracing::debug!(peer = %old.peer, "cancelling session to dial out");
                old.stream.close().await;
                teardown.push(old.task);
            }
            tracing::info!(%peer, "connecting");
            let id = self.inner.next_role_id();
            roles.dialer = Some(dialer::spawn(Arc::clone(&self.inner), peer, id));
            self.inner.set_state(&mut roles, LinkState::Connecting);
        }
        teardown.reap().await;
    }

    /// Write a payload to the active session.
    ///
    /// Silently drops the payload unless the link is `Connected`; there is
    /// no queuing across reconnects. The session stream is snapshotted under
    /// the lock and the write itself runs outside it; write failures are
    /// logged only, session death is detected by the read loop.
    pub async fn write(&self, payload: &[u8]) {
        let stream = {
            let roles = self.inner.roles.lock().await;
            if roles.state != LinkState::Connected {
                tracing::trace!(state = %roles.state, "write dropped, no session");
                return;
            }
            roles.session.as_ref().map(|s| Arc::clone(&s.stream))
        };
        let Some(stream) = stream else { return };

        match stream.write(payload).await {
            Ok(()) => self.inner.emit(LinkEvent::Written(payload.to_vec())),
            Err(e) => tracing::warn!("session write failed: {e}"),
        }
    }

    /// Non-blocking lifecycle state snapshot.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    /// The active session's peer, if any.
    pub async fn peer(&self) -> Option<PeerAddr> {
        let roles = self.inner.roles.lock().await;
        roles.session.as_ref().map(|s| s.peer.clone())
    }

    /// The listening endpoint's address, if a listener is active.
    ///
    /// Useful when the transport selects the address at bind time.
    pub async fn listener_addr(&self) -> Option<PeerAddr> {
        let roles = self.inner.roles.lock().await;
        roles
            .listener
            .as_ref()
            .and_then(|l| l.endpoint.local_addr().ok())
    }

    /// Tear down all roles and go `Idle` without restarting.
    ///
    /// Idempotent. The link can be brought back with [`start`](Self::start).
    pub async fn stop(&self) {
        let mut teardown = Teardown::default();
        {
            let mut roles = self.inner.roles.lock().await;
            if let Some(dialer) = roles.dialer.take() {
                tracing::debug!(peer = %dialer.peer, "cancelling outbound attempt");
                teardown.push(dialer.task);
            }
            if let Some(session) = roles.session.take() {
                tracing::debug!(peer = %session.peer, "closing session");
                session.stream.close().await;
                teardown.push(session.task);
            }
            if let Some(listener) = roles.listener.take() {
                listener.endpoint.close().await;
                teardown.push(listener.task);
            }
            self.inner.set_state(&mut roles, LinkState::Idle);
        }
        teardown.reap().await;
    }
}

impl LinkInner {
    pub(crate) fn state(&self) -> LinkState {
        LinkState::from_u8(self.state_snapshot.load(Ordering::Acquire))
    }

    fn next_role_id(&self) -> RoleId {
        self.next_role_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set_state(&self, roles: &mut Roles, next: LinkState) {
        if roles.state == next {
            return;
        }
        debug_assert!(roles.state.can_transition(next));
        tracing::debug!(from = %roles.state, to = %next, "link state transition");
        roles.state = next;
        self.state_snapshot.store(next as u8, Ordering::Release);
        self.emit(LinkEvent::StateChanged(next));
    }

    /// State implied by the live role slots. Only valid where the explicit
    /// transitions do not apply (listener spawn/death with the dialer and
    /// session slots already settled).
    fn derive_state(&self, roles: &Roles) -> LinkState {
        if roles.session.is_some() {
            LinkState::Connected
        } else if roles.dialer.is_some() {
            LinkState::Connecting
        } else if roles.listener.is_some() {
            LinkState::Listening
        } else {
            LinkState::Idle
        }
    }

    fn emit(&self, event: LinkEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "event consumer lagging, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Deliver one inbound payload with backpressure.
    pub(crate) async fn deliver_inbound(&self, payload: Vec<u8>) {
        let _ = self.events.send(LinkEvent::Inbound(payload)).await;
    }

    /// The start transition, shared by `Link::start` and the failure
    /// recovery paths. Caller holds the roles lock.
    async fn start_locked(inner: &Arc<Self>, roles: &mut Roles, teardown: &mut Teardown) {
        if let Some(dialer) = roles.dialer.take() {
            tracing::debug!(peer = %dialer.peer, "cancelling outbound attempt");
            teardown.push(dialer.task);
        }

        if roles.listener.is_none() {
            match inner.transport.listen(&inner.config.service).await {
                Ok(endpoint) => {
                    let endpoint: Arc<dyn LinkListener> = Arc::from(endpoint);
                    let id = inner.next_role_id();
                    roles.listener = Some(listener::spawn(Arc::clone(inner), endpoint, id));
                }
                Err(e) => {
                    tracing::warn!("failed to open listening endpoint: {e}");
                }
            }
        }

        let next = inner.derive_state(roles);
        inner.set_state(roles, next);
    }

    /// Take the dialer's own handle out of its slot before it reports
    /// success. Returns false if the attempt has been superseded, in which
    /// case the dialer must discard its stream.
    ///
    /// Taking the handle first means a listener success racing in has no
    /// dialer left to cancel; the dial's subsequent install wins the race.
    pub(crate) async fn claim_dialer(&self, id: RoleId) -> bool {
        let mut roles = self.roles.lock().await;
        if roles.dialer.as_ref().is_some_and(|d| d.id == id) {
            roles.dialer = None;
            true
        } else {
            false
        }
    }

    /// The single transition point into `Connected`, called by the listener
    /// and the dialer on success.
    ///
    /// An inbound stream is rejected when its listener has been superseded
    /// or the link is already `Connected` or `Idle`: the first winner keeps
    /// the session and the straggler's stream is closed. An outbound stream
    /// installs unconditionally unless the link was stopped; of two
    /// near-simultaneous successes, the last caller wins and the loser's
    /// resources are released here.
    pub(crate) async fn session_established(
        self: Arc<Self>,
        stream: Box<dyn LinkStream>,
        peer: PeerAddr,
        origin: SessionOrigin,
    ) {
        let mut teardown = Teardown::default();
        {
            let mut roles = self.roles.lock().await;
            let accepted = match origin {
                SessionOrigin::Inbound { listener } => {
                    roles.listener.as_ref().is_some_and(|l| l.id == listener)
                        && matches!(roles.state, LinkState::Listening | LinkState::Connecting)
                }
                SessionOrigin::Outbound => roles.state != LinkState::Idle,
            };
            if !accepted {
                tracing::debug!(%peer, state = %roles.state, "rejecting superseded connection");
                stream.close().await;
                return;
            }

            if let Some(dialer) = roles.dialer.take() {
                tracing::debug!(peer = %dialer.peer, "cancelling outbound attempt");
                teardown.push(dialer.task);
            }
            if let Some(old) = roles.session.take() {
                tracing::debug!(peer = %old.peer, "superseding active session");
                old.stream.close().await;
                teardown.push(old.task);
            }
            if let Some(listener) = roles.listener.take() {
                // Only one session is ever wanted; the listener goes too.
                listener.endpoint.close().await;
                if !matches!(origin, SessionOrigin::Inbound { .. }) {
                    teardown.push(listener.task);
                }
                // On the inbound path the listener is the caller; its loop
                // ends on its own now that the endpoint is closed.
            }

            tracing::info!(%peer, "session established");
            let id = self.next_role_id();
            let stream: Arc<dyn LinkStream> = Arc::from(stream);
            self.set_state(&mut roles, LinkState::Connected);
            roles.session = Some(session::spawn(
                Arc::clone(&self),
                Arc::clone(&stream),
                peer.clone(),
                id,
            ));
            self.emit(LinkEvent::Connected { peer });
        }
        teardown.reap().await;
    }

    /// Outbound attempt failed. Falls back to listening unless the attempt
    /// has already been superseded.
    pub(crate) async fn connection_failed(self: Arc<Self>, id: RoleId, peer: PeerAddr) {
        let mut teardown = Teardown::default();
        {
            let mut roles = self.roles.lock().await;
            if !roles.dialer.as_ref().is_some_and(|d| d.id == id) {
                tracing::debug!(%peer, "ignoring failure of superseded outbound attempt");
                return;
            }
            roles.dialer = None;
            self.set_state(&mut roles, LinkState::Idle);
            self.emit(LinkEvent::DialFailed { peer });
            Self::start_locked(&self, &mut roles, &mut teardown).await;
        }
        teardown.reap().await;
    }

    /// Active session died. Falls back to listening unless the session has
    /// already been superseded.
    pub(crate) async fn connection_lost(self: Arc<Self>, id: RoleId) {
        let mut teardown = Teardown::default();
        {
            let mut roles = self.roles.lock().await;
            if !roles.session.as_ref().is_some_and(|s| s.id == id) {
                tracing::debug!("ignoring loss of superseded session");
                return;
            }
            if let Some(session) = roles.session.take() {
                session.stream.close().await;
            }
            self.set_state(&mut roles, LinkState::Idle);
            self.emit(LinkEvent::Disconnected);
            Self::start_locked(&self, &mut roles, &mut teardown).await;
        }
        teardown.reap().await;
    }

    /// The listener's accept loop ended (failure or cancellation). Clears
    /// the slot so a later `start` can re-arm; a superseded listener's call
    /// is a no-op.
    pub(crate) async fn clear_listener(&self, id: RoleId) {
        let mut roles = self.roles.lock().await;
        if roles.listener.as_ref().is_some_and(|l| l.id == id) {
            roles.listener = None;
            let next = self.derive_state(&roles);
            self.set_state(&mut roles, next);
        }
    }
}
