//! Events delivered from the link to the embedding application.

use crate::state::LinkState;
use tether_transport::PeerAddr;

/// One event on the channel handed out by [`Link::new`](crate::Link::new).
///
/// `Inbound` carries session payloads and is delivered with backpressure;
/// the remaining variants are control notifications and may be dropped if
/// the consumer lags (the authoritative state is always available from
/// [`Link::state`](crate::Link::state)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The lifecycle state changed.
    StateChanged(LinkState),

    /// A session was established with the given peer.
    Connected {
        /// The remote endpoint's address.
        peer: PeerAddr,
    },

    /// One read's payload from the active session.
    Inbound(Vec<u8>),

    /// Echo of a payload successfully written to the session.
    Written(Vec<u8>),

    /// The active session died (read failure or end of stream).
    Disconnected,

    /// An outbound attempt failed.
    DialFailed {
        /// The peer that could not be reached.
        peer: PeerAddr,
    },
}
