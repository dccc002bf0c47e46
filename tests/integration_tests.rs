//! Integration tests for cross-crate interactions.
//!
//! Drives pairs of links against each other over the in-memory transport
//! (and once over real TCP), verifying session establishment, data exchange,
//! recovery after loss, and the no-queuing write contract.

use std::sync::Arc;
use std::time::Duration;
use tether_core::{Link, LinkConfig, LinkEvent, LinkState};
use tether_transport::{MemoryHub, PeerAddr, TcpTransport};
use tokio::sync::mpsc;

fn link_on(hub: &MemoryHub, name: &str) -> (Link, mpsc::Receiver<LinkEvent>) {
    Link::new(Arc::new(hub.endpoint(name)), LinkConfig::default())
}

async fn wait_for_state(link: &Link, state: LinkState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while link.state() != state {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {state}, still {}", link.state()));
}

async fn next_inbound(events: &mut mpsc::Receiver<LinkEvent>) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(LinkEvent::Inbound(payload)) => break payload,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("no inbound payload arrived")
}

// ============================================================================
// Session Establishment and Data Exchange
// ============================================================================

#[tokio::test]
async fn test_two_links_chat() {
    let hub = MemoryHub::new();
    let (alice, mut alice_events) = link_on(&hub, "alice");
    let (bob, mut bob_events) = link_on(&hub, "bob");

    alice.start().await;
    bob.start().await;
    bob.connect(PeerAddr::new("alice")).await;

    wait_for_state(&alice, LinkState::Connected).await;
    wait_for_state(&bob, LinkState::Connected).await;
    assert_eq!(alice.peer().await, Some(PeerAddr::new("bob")));
    assert_eq!(bob.peer().await, Some(PeerAddr::new("alice")));

    bob.write(b"hello alice").await;
    assert_eq!(next_inbound(&mut alice_events).await, b"hello alice");

    alice.write(b"hello bob").await;
    assert_eq!(next_inbound(&mut bob_events).await, b"hello bob");
}

#[tokio::test]
async fn test_peer_teardown_recovers_to_listening() {
    let hub = MemoryHub::new();
    let (alice, _alice_events) = link_on(&hub, "alice");
    let (bob, mut bob_events) = link_on(&hub, "bob");

    alice.start().await;
    bob.start().await;
    bob.connect(PeerAddr::new("alice")).await;
    wait_for_state(&alice, LinkState::Connected).await;
    wait_for_state(&bob, LinkState::Connected).await;

    // Bob goes away; Alice's session dies and she falls back to listening.
    bob.stop().await;
    assert_eq!(bob.state(), LinkState::Idle);
    wait_for_state(&alice, LinkState::Listening).await;

    // Bob comes back and reconnects.
    bob.start().await;
    bob.connect(PeerAddr::new("alice")).await;
    wait_for_state(&alice, LinkState::Connected).await;
    wait_for_state(&bob, LinkState::Connected).await;

    alice.write(b"welcome back").await;
    assert_eq!(next_inbound(&mut bob_events).await, b"welcome back");
}

#[tokio::test]
async fn test_repeated_connect_drop_cycles() {
    let hub = MemoryHub::new();
    let (alice, mut alice_events) = link_on(&hub, "alice");
    let (bob, _bob_events) = link_on(&hub, "bob");

    alice.start().await;
    bob.start().await;

    for round in 0u8..3 {
        bob.connect(PeerAddr::new("alice")).await;
        wait_for_state(&alice, LinkState::Connected).await;
        wait_for_state(&bob, LinkState::Connected).await;

        bob.write(&[round]).await;
        assert_eq!(next_inbound(&mut alice_events).await, vec![round]);

        bob.stop().await;
        wait_for_state(&alice, LinkState::Listening).await;
        bob.start().await;
    }
}

// ============================================================================
// Write Contract
// ============================================================================

#[tokio::test]
async fn test_write_while_disconnected_is_dropped() {
    let hub = MemoryHub::new();
    let (alice, mut alice_events) = link_on(&hub, "alice");
    let (bob, _bob_events) = link_on(&hub, "bob");

    alice.start().await;

    // No session yet: this payload is lost by design, not queued.
    bob.write(b"lost").await;

    bob.connect(PeerAddr::new("alice")).await;
    wait_for_state(&bob, LinkState::Connected).await;
    bob.write(b"kept").await;

    assert_eq!(next_inbound(&mut alice_events).await, b"kept");
}

// ============================================================================
// Failure Recovery
// ============================================================================

#[tokio::test]
async fn test_dial_failure_then_inbound_accept() {
    let hub = MemoryHub::new();
    let (alice, mut alice_events) = link_on(&hub, "alice");
    let (bob, _bob_events) = link_on(&hub, "bob");

    // Nobody is listening at the target: the attempt fails and the link
    // falls back to listening.
    alice.connect(PeerAddr::new("ghost")).await;
    wait_for_state(&alice, LinkState::Listening).await;

    let mut saw_dial_failed = false;
    while let Ok(event) = alice_events.try_recv() {
        if matches!(event, LinkEvent::DialFailed { .. }) {
            saw_dial_failed = true;
        }
    }
    assert!(saw_dial_failed);

    // The fallback listener is live: an inbound session now succeeds.
    bob.start().await;
    bob.connect(PeerAddr::new("alice")).await;
    wait_for_state(&alice, LinkState::Connected).await;
    wait_for_state(&bob, LinkState::Connected).await;
}

#[tokio::test]
async fn test_both_sides_cycle_back_after_churn() {
    let hub = MemoryHub::new();
    let (alice, _alice_events) = link_on(&hub, "alice");
    let (bob, _bob_events) = link_on(&hub, "bob");

    alice.start().await;
    bob.start().await;
    bob.connect(PeerAddr::new("alice")).await;
    wait_for_state(&alice, LinkState::Connected).await;
    wait_for_state(&bob, LinkState::Connected).await;

    // Alice dials out while connected: her session is cancelled and the
    // attempt fails (nobody listens at the target). Both sides must end up
    // listening again.
    alice.connect(PeerAddr::new("ghost")).await;
    wait_for_state(&alice, LinkState::Listening).await;
    wait_for_state(&bob, LinkState::Listening).await;

    // The machine has no terminal state: connecting again just works.
    bob.connect(PeerAddr::new("alice")).await;
    wait_for_state(&alice, LinkState::Connected).await;
    wait_for_state(&bob, LinkState::Connected).await;
}

// ============================================================================
// TCP End-to-End
// ============================================================================

#[tokio::test]
async fn test_tcp_end_to_end() {
    let (alice, mut alice_events) = Link::new(
        Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap())),
        LinkConfig::default(),
    );
    let (bob, mut bob_events) = Link::new(
        Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap())),
        LinkConfig::default(),
    );

    alice.start().await;
    let alice_addr = alice.listener_addr().await.expect("alice not listening");

    bob.start().await;
    bob.connect(alice_addr).await;

    wait_for_state(&alice, LinkState::Connected).await;
    wait_for_state(&bob, LinkState::Connected).await;

    bob.write(b"over tcp").await;
    assert_eq!(next_inbound(&mut alice_events).await, b"over tcp");

    alice.write(b"ack").await;
    assert_eq!(next_inbound(&mut bob_events).await, b"ack");

    bob.stop().await;
    wait_for_state(&alice, LinkState::Listening).await;
}
