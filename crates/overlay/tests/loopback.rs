//! End-to-end scenarios over loopback TCP: two in-process nodes in offline
//! simulation, full handshake, padded messaging in both directions.

use std::sync::Arc;
use std::time::Duration;

use cwtch_core::{ConnectionState, CoreConfig, Dialer, Identity, PeerEvent, PeerManager};
use overlay::OverlayService;

fn node_config(virtual_port: u16) -> CoreConfig {
    CoreConfig {
        listen_port: 0,
        virtual_port,
        offline: true,
        traffic_scramble: false,
        handshake_timeout_secs: 5,
        connect_timeout_secs: 5,
        ..CoreConfig::default()
    }
}

async fn recv_event(
    events: &mut tokio::sync::mpsc::Receiver<PeerEvent>,
) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event queue closed")
}

#[tokio::test]
async fn test_handshake_and_echo_between_nodes() {
    // Bob listens on an ephemeral port.
    let bob_overlay = OverlayService::new(node_config(0));
    bob_overlay.start().await.unwrap();
    let bob_port = bob_overlay.local_port().await;

    let (bob, mut bob_events) = PeerManager::new(
        Identity::generate(),
        bob_overlay.clone() as Arc<dyn Dialer>,
        node_config(0),
    );
    bob.attach_incoming(bob_overlay.take_incoming().unwrap());

    // Alice's offline dials route to Bob's listener.
    let alice_overlay = OverlayService::new(node_config(bob_port));
    alice_overlay.start().await.unwrap();
    let (alice, mut alice_events) = PeerManager::new(
        Identity::generate(),
        alice_overlay.clone() as Arc<dyn Dialer>,
        node_config(bob_port),
    );

    alice.connect("bob").await.unwrap();
    assert_eq!(
        alice.peer_state("bob").await,
        Some(ConnectionState::Connected)
    );
    assert_eq!(
        recv_event(&mut alice_events).await,
        PeerEvent::ConnectionStatus {
            address: "bob.onion".into(),
            connected: true,
        }
    );

    // Initiator sends; responder's receiver delivers exactly the text.
    assert!(alice.send("bob", "hello").await);

    let alice_addr_at_bob = match recv_event(&mut bob_events).await {
        PeerEvent::ConnectionStatus { address, connected } => {
            assert!(connected);
            address
        }
        other => panic!("unexpected event {:?}", other),
    };
    assert_eq!(
        recv_event(&mut bob_events).await,
        PeerEvent::Message {
            address: alice_addr_at_bob.clone(),
            text: "hello".into(),
        }
    );

    // Responder echoes; initiator delivers it.
    assert!(bob.send(&alice_addr_at_bob, "hello").await);
    assert_eq!(
        recv_event(&mut alice_events).await,
        PeerEvent::Message {
            address: "bob.onion".into(),
            text: "hello".into(),
        }
    );

    alice.shutdown().await;
    bob.shutdown().await;
    alice_overlay.stop().await;
    bob_overlay.stop().await;
}

#[tokio::test]
async fn test_disconnect_propagates_to_peer() {
    let bob_overlay = OverlayService::new(node_config(0));
    bob_overlay.start().await.unwrap();
    let bob_port = bob_overlay.local_port().await;

    let (bob, mut bob_events) = PeerManager::new(
        Identity::generate(),
        bob_overlay.clone() as Arc<dyn Dialer>,
        node_config(0),
    );
    bob.attach_incoming(bob_overlay.take_incoming().unwrap());

    let alice_overlay = OverlayService::new(node_config(bob_port));
    alice_overlay.start().await.unwrap();
    let (alice, mut alice_events) = PeerManager::new(
        Identity::generate(),
        alice_overlay.clone() as Arc<dyn Dialer>,
        node_config(bob_port),
    );

    alice.connect("bob").await.unwrap();
    assert!(matches!(
        recv_event(&mut alice_events).await,
        PeerEvent::ConnectionStatus { connected: true, .. }
    ));
    let alice_addr_at_bob = match recv_event(&mut bob_events).await {
        PeerEvent::ConnectionStatus { address, connected } => {
            assert!(connected);
            address
        }
        other => panic!("unexpected event {:?}", other),
    };

    alice.disconnect("bob").await;

    // Bob's receiver observes the close and reports the drop.
    assert_eq!(
        recv_event(&mut bob_events).await,
        PeerEvent::ConnectionStatus {
            address: alice_addr_at_bob.clone(),
            connected: false,
        }
    );
    assert_eq!(
        bob.peer_state(&alice_addr_at_bob).await,
        Some(ConnectionState::Disconnected)
    );

    alice_overlay.stop().await;
    bob_overlay.stop().await;
}

#[tokio::test]
async fn test_fabricated_addresses_are_plausible() {
    let overlay = OverlayService::new(node_config(0));
    overlay.start().await.unwrap();

    let address = overlay.onion_address().expect("offline address missing");
    let label = address.strip_suffix(".onion").unwrap();
    assert_eq!(label.len(), 56);
    assert!(label
        .chars()
        .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));

    overlay.stop().await;
}
