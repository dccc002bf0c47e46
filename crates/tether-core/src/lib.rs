//! # Tether Core
//!
//! Core link implementation for tether: one point-to-point session over a
//! connection-oriented stream transport.
//!
//! This crate provides:
//! - The lifecycle state machine (`LinkState`)
//! - The connection coordinator (`Link`)
//! - The three concurrent roles: listener, dialer, session
//! - Event delivery to the embedding application (`LinkEvent`)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Link                                   │
//! │   (coordinator: one lock, one lifecycle state, three role slots)│
//! ├───────────────────┬───────────────────┬─────────────────────────┤
//! │     Listener      │      Dialer       │        Session          │
//! │  (blocking accept)│ (blocking dial)   │ (read loop + writes)    │
//! ├───────────────────┴───────────────────┴─────────────────────────┤
//! │                     Transport (tether-transport)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The listener and an optional dialer run concurrently; whichever
//! establishes a stream first becomes the single active session and the
//! competing roles are torn down. Any failure cycles the link back to
//! listening.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod event;
pub mod state;

mod dialer;
mod listener;
mod session;

pub use config::LinkConfig;
pub use coordinator::Link;
pub use event::LinkEvent;
pub use state::LinkState;

use tether_transport::ServiceId;

/// Well-known service id both peers use to locate the link service.
pub const LINK_SERVICE: ServiceId =
    ServiceId::from_u128(0x476a_f1b5_0587_4457_81f6_af51_4dc8_354b);
