//! Property-based tests for tether.
//!
//! Uses proptest to verify lifecycle invariants across arbitrary operation
//! sequences: the link never reports an invalid state edge, writes never
//! block outside `Connected`, and `stop` always lands in `Idle`.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Link, LinkConfig, LinkEvent, LinkState};
use tether_transport::{LinkListener, MemoryHub, PeerAddr, Transport};

// ============================================================================
// State Machine Properties
// ============================================================================

mod state_properties {
    use super::*;

    proptest! {
        /// Self-transitions are always valid (idempotent operations).
        #[test]
        fn self_transitions_valid(raw in 0u8..4) {
            let state = state_from(raw);
            prop_assert!(state.can_transition(state));
        }

        /// The recovery cycle out of any state is valid: drop to Idle, then
        /// re-arm listening.
        #[test]
        fn recovery_cycle_valid(raw in 0u8..4) {
            let state = state_from(raw);
            prop_assert!(state.can_transition(LinkState::Idle));
            prop_assert!(LinkState::Idle.can_transition(LinkState::Listening));
        }

        /// A session is never entered straight from Idle, and loss always
        /// passes through Idle.
        #[test]
        fn forbidden_edges_hold(from_raw in 0u8..4, to_raw in 0u8..4) {
            let from = state_from(from_raw);
            let to = state_from(to_raw);
            if from == LinkState::Idle && to == LinkState::Connected {
                prop_assert!(!from.can_transition(to));
            }
            if from == LinkState::Connected && to == LinkState::Listening {
                prop_assert!(!from.can_transition(to));
            }
        }
    }

    fn state_from(raw: u8) -> LinkState {
        match raw {
            1 => LinkState::Listening,
            2 => LinkState::Connecting,
            3 => LinkState::Connected,
            _ => LinkState::Idle,
        }
    }
}

// ============================================================================
// Model-Based Link Properties
// ============================================================================

/// One externally driven operation on a link.
#[derive(Debug, Clone)]
enum Op {
    /// `start()`.
    Start,
    /// `connect` to a peer that is listening.
    DialLive,
    /// `connect` to a peer that does not exist.
    DialDead,
    /// A remote endpoint dials us (an accept, if we are listening).
    InboundDial,
    /// `write` a payload (must never block, whatever the state).
    Write,
    /// `stop()`.
    Stop,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        Just(Op::DialLive),
        Just(Op::DialDead),
        Just(Op::InboundDial),
        Just(Op::Write),
        Just(Op::Stop),
    ]
}

async fn drive(ops: &[Op]) -> (Link, Vec<LinkEvent>) {
    let hub = MemoryHub::new();
    let config = LinkConfig {
        // Large enough that no control event is ever dropped; the emitted
        // StateChanged chain is validated below.
        event_capacity: 1024,
        ..LinkConfig::default()
    };
    let (link, mut events) = Link::new(Arc::new(hub.endpoint("self")), config.clone());

    // A live peer that accepts whatever arrives and holds the streams open.
    let live = hub.endpoint("live");
    let live_listener = live.listen(&config.service).await.unwrap();
    let accept_task = tokio::spawn(async move {
        let mut streams = Vec::new();
        while let Ok((stream, _peer)) = live_listener.accept().await {
            streams.push(stream);
        }
    });

    for op in ops {
        match op {
            Op::Start => link.start().await,
            Op::DialLive => link.connect(PeerAddr::new("live")).await,
            Op::DialDead => link.connect(PeerAddr::new("dead")).await,
            Op::InboundDial => {
                let _ = live.dial(&PeerAddr::new("self"), &config.service).await;
            }
            Op::Write => {
                // Write must never block, whatever state we are in.
                tokio::time::timeout(Duration::from_millis(500), link.write(b"probe"))
                    .await
                    .expect("write blocked");
            }
            Op::Stop => link.stop().await,
        }
        // Let spawned roles make progress before the next operation.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Let in-flight transitions settle, then collect the event trace.
    tokio::time::sleep(Duration::from_millis(30)).await;
    accept_task.abort();

    let mut trace = Vec::new();
    while let Ok(event) = events.try_recv() {
        trace.push(event);
    }
    (link, trace)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        ..ProptestConfig::default()
    })]

    /// Every state edge the link reports is a valid transition, no matter
    /// what sequence of operations drives it.
    #[test]
    fn reported_transitions_are_valid(ops in prop::collection::vec(op_strategy(), 1..10)) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (_link, trace) = rt.block_on(drive(&ops));

        let mut previous = LinkState::Idle;
        for event in &trace {
            if let LinkEvent::StateChanged(next) = event {
                prop_assert!(
                    previous.can_transition(*next),
                    "invalid edge {previous} -> {next} in trace {trace:?}"
                );
                previous = *next;
            }
        }
    }

    /// `stop` always lands in Idle, whatever happened before.
    #[test]
    fn stop_always_reaches_idle(ops in prop::collection::vec(op_strategy(), 0..8)) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let state = rt.block_on(async {
            let (link, _trace) = drive(&ops).await;
            link.stop().await;
            link.state()
        });
        prop_assert_eq!(state, LinkState::Idle);
    }
}
