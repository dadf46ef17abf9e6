//! Peer roster and per-peer connection lifecycle.
//!
//! The manager owns the normalized-address → [`Peer`] table, dials through
//! whatever [`Dialer`] it was given, runs the handshake on both directions,
//! and pumps received frames into a bounded event queue the host drains.
//! Transport failures on a peer are translated into a disconnect event and
//! swallowed; they never poison the manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

use crate::channel::PeerChannel;
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::framing::{FRAME_MSG, FRAME_PAD};
use crate::handshake::{self, Established};
use crate::identity::Identity;
use crate::peer::{address_from_identity, normalize_address, ConnectionState, Peer};
use crate::transport::{Dialer, DynStream};

pub const EVENT_QUEUE_DEPTH: usize = 64;

/// Events the host application drains from the queue returned by
/// [`PeerManager::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Message { address: String, text: String },
    ConnectionStatus { address: String, connected: bool },
}

/// Read-only view of a roster entry.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub address: String,
    pub name: Option<String>,
    pub state: ConnectionState,
    pub identity: Option<[u8; 32]>,
}

pub struct PeerManager {
    identity: Arc<Identity>,
    config: CoreConfig,
    dialer: Arc<dyn Dialer>,
    peers: Arc<RwLock<HashMap<String, Peer>>>,
    events: mpsc::Sender<PeerEvent>,
}

impl PeerManager {
    pub fn new(
        identity: Identity,
        dialer: Arc<dyn Dialer>,
        config: CoreConfig,
    ) -> (Arc<Self>, mpsc::Receiver<PeerEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let manager = Arc::new(Self {
            identity: Arc::new(identity),
            config,
            dialer,
            peers: Arc::new(RwLock::new(HashMap::new())),
            events,
        });
        (manager, events_rx)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Insert (or update the name of) a roster entry. Returns the canonical
    /// address key.
    pub async fn add(&self, address: &str, name: Option<String>) -> String {
        let key = normalize_address(address);
        let mut peers = self.peers.write().await;
        let peer = peers
            .entry(key.clone())
            .or_insert_with(|| Peer::new(key.clone(), None));
        if name.is_some() {
            peer.name = name;
        }
        key
    }

    pub async fn snapshot(&self) -> Vec<PeerSnapshot> {
        let peers = self.peers.read().await;
        peers
            .values()
            .map(|p| PeerSnapshot {
                address: p.address.clone(),
                name: p.name.clone(),
                state: p.state,
                identity: p.identity,
            })
            .collect()
    }

    pub async fn peer_state(&self, address: &str) -> Option<ConnectionState> {
        let key = normalize_address(address);
        self.peers.read().await.get(&key).map(|p| p.state)
    }

    /// Dial through the overlay and run the initiator handshake. A peer that
    /// is already connected or mid-handshake is left alone.
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<()> {
        let key = self.add(address, None).await;

        {
            let mut peers = self.peers.write().await;
            let peer = peers.get_mut(&key).expect("just added");
            match peer.state {
                ConnectionState::Connected | ConnectionState::Handshaking => return Ok(()),
                _ => peer.state = ConnectionState::Handshaking,
            }
        }

        match self.dial_and_handshake(&key).await {
            Ok(established) => {
                self.install_channel(&key, established).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("connect to {} failed: {}", key, e);
                {
                    let mut peers = self.peers.write().await;
                    if let Some(peer) = peers.get_mut(&key) {
                        peer.state = ConnectionState::Failed;
                    }
                }
                self.emit(PeerEvent::ConnectionStatus {
                    address: key,
                    connected: false,
                })
                .await;
                Err(e)
            }
        }
    }

    /// Responder path for a socket the overlay accepted. Attaches to the
    /// roster entry with a matching identity key, or creates one keyed by a
    /// best-effort address derived from that key.
    pub async fn on_incoming(self: Arc<Self>, stream: DynStream) {
        let deadline = Duration::from_secs(self.config.handshake_timeout_secs);
        let established = match tokio::time::timeout(
            deadline,
            handshake::respond(&self.identity, stream, self.config.sign_transcript),
        )
        .await
        {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => {
                tracing::warn!("inbound handshake failed: {}", e);
                return;
            }
            Err(_) => {
                tracing::warn!("inbound handshake timed out");
                return;
            }
        };

        let key = {
            let peers = self.peers.read().await;
            peers
                .values()
                .find(|p| p.identity == Some(established.peer_identity))
                .map(|p| p.address.clone())
        }
        .unwrap_or_else(|| address_from_identity(&established.peer_identity));

        tracing::info!("inbound connection from {}", key);
        self.install_channel(&key, established).await;
    }

    /// Pad, jitter, and transmit one text message. Returns false when the
    /// peer is not connected or the write fails.
    pub async fn send(self: &Arc<Self>, address: &str, text: &str) -> bool {
        let key = normalize_address(address);
        let channel = {
            let peers = self.peers.read().await;
            peers
                .get(&key)
                .filter(|p| p.state == ConnectionState::Connected)
                .and_then(|p| p.channel.clone())
        };
        let Some(channel) = channel else {
            return false;
        };

        let payload = if self.config.padding_on() {
            privacy::pad(text)
        } else {
            text.to_string()
        };
        let delay = privacy::random_delay(self.config.scramble_on());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match channel.send(FRAME_MSG, payload.as_bytes()).await {
            Ok(()) => {
                let mut peers = self.peers.write().await;
                if let Some(peer) = peers.get_mut(&key) {
                    peer.last_seen = Some(Instant::now());
                }
                true
            }
            Err(e) => {
                tracing::warn!("send to {} failed: {}", key, e);
                channel.close().await;
                self.drop_channel(&key, &channel).await;
                false
            }
        }
    }

    /// Transmit a cover-traffic frame. Receivers drop it silently.
    pub async fn send_cover(self: &Arc<Self>, address: &str) -> bool {
        let key = normalize_address(address);
        let channel = {
            let peers = self.peers.read().await;
            peers
                .get(&key)
                .filter(|p| p.state == ConnectionState::Connected)
                .and_then(|p| p.channel.clone())
        };
        let Some(channel) = channel else {
            return false;
        };
        match channel.send(FRAME_PAD, &privacy::decoy::cover_traffic()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("cover frame to {} failed: {}", key, e);
                channel.close().await;
                self.drop_channel(&key, &channel).await;
                false
            }
        }
    }

    pub async fn disconnect(&self, address: &str) {
        let key = normalize_address(address);
        let channel = {
            let mut peers = self.peers.write().await;
            match peers.get_mut(&key) {
                Some(peer) => {
                    peer.state = ConnectionState::Disconnected;
                    peer.channel.take()
                }
                None => None,
            }
        };
        if let Some(channel) = channel {
            channel.close().await;
            self.emit(PeerEvent::ConnectionStatus {
                address: key,
                connected: false,
            })
            .await;
        }
    }

    pub async fn remove(&self, address: &str) {
        self.disconnect(address).await;
        let key = normalize_address(address);
        self.peers.write().await.remove(&key);
    }

    /// There is no in-band rekey: tear the channel down and negotiate a fresh
    /// ephemeral on a new connection.
    pub async fn rekey(self: &Arc<Self>, address: &str) -> Result<()> {
        self.disconnect(address).await;
        self.connect(address).await
    }

    pub async fn shutdown(&self) {
        let channels: Vec<_> = {
            let mut peers = self.peers.write().await;
            peers
                .values_mut()
                .filter_map(|p| {
                    p.state = ConnectionState::Disconnected;
                    p.channel.take()
                })
                .collect()
        };
        for channel in channels {
            channel.close().await;
        }
        tracing::info!("peer manager shut down");
    }

    /// Drain accepted sockets from the overlay into responder handshakes.
    pub fn attach_incoming(self: &Arc<Self>, mut incoming: mpsc::Receiver<DynStream>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(stream) = incoming.recv().await {
                tokio::spawn(manager.clone().on_incoming(stream));
            }
        });
    }

    async fn dial_and_handshake(self: &Arc<Self>, key: &str) -> Result<Established> {
        let stream = self.dialer.dial(key).await?;
        let deadline = Duration::from_secs(self.config.handshake_timeout_secs);
        tokio::time::timeout(
            deadline,
            handshake::initiate(&self.identity, stream, self.config.sign_transcript),
        )
        .await
        .map_err(|_| Error::Timeout)?
    }

    async fn install_channel(self: &Arc<Self>, key: &str, established: Established) {
        let channel = Arc::new(established.channel);
        let previous = {
            let mut peers = self.peers.write().await;
            let peer = peers
                .entry(key.to_string())
                .or_insert_with(|| Peer::new(key.to_string(), None));
            let previous = peer.channel.take();
            peer.channel = Some(channel.clone());
            peer.state = ConnectionState::Connected;
            peer.identity = Some(established.peer_identity);
            peer.last_seen = Some(Instant::now());
            previous
        };
        if let Some(old) = previous {
            old.close().await;
        }

        self.spawn_receiver(key.to_string(), channel);
        self.emit(PeerEvent::ConnectionStatus {
            address: key.to_string(),
            connected: true,
        })
        .await;
    }

    fn spawn_receiver(self: &Arc<Self>, address: String, channel: Arc<PeerChannel>) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match channel.receive().await {
                    Ok(frame) => match frame.frame_type.as_str() {
                        FRAME_MSG => {
                            let text = match String::from_utf8(frame.payload) {
                                Ok(text) => privacy::unpad(&text),
                                Err(_) => {
                                    tracing::warn!("non-UTF-8 message from {}", address);
                                    continue;
                                }
                            };
                            {
                                let mut peers = manager.peers.write().await;
                                if let Some(peer) = peers.get_mut(&address) {
                                    peer.last_seen = Some(Instant::now());
                                }
                            }
                            manager
                                .emit(PeerEvent::Message {
                                    address: address.clone(),
                                    text,
                                })
                                .await;
                        }
                        other => {
                            tracing::debug!("ignoring {} frame from {}", other, address);
                        }
                    },
                    Err(Error::EndOfStream) => {
                        tracing::info!("{} closed the connection", address);
                        break;
                    }
                    Err(Error::Closed) => break,
                    Err(e) => {
                        tracing::warn!("receive from {} failed: {}", address, e);
                        break;
                    }
                }
            }
            channel.close().await;
            manager.drop_channel(&address, &channel).await;
        });
    }

    /// Detach `channel` from its peer if it is still the current one; a
    /// replacement installed in the meantime is left untouched.
    async fn drop_channel(&self, address: &str, channel: &Arc<PeerChannel>) {
        let was_current = {
            let mut peers = self.peers.write().await;
            match peers.get_mut(address) {
                Some(peer)
                    if peer
                        .channel
                        .as_ref()
                        .map(|c| Arc::ptr_eq(c, channel))
                        .unwrap_or(false) =>
                {
                    peer.channel = None;
                    peer.state = ConnectionState::Disconnected;
                    true
                }
                _ => false,
            }
        };
        if was_current {
            self.emit(PeerEvent::ConnectionStatus {
                address: address.to_string(),
                connected: false,
            })
            .await;
        }
    }

    async fn emit(&self, event: PeerEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Hands out pre-built duplex ends instead of dialing anything.
    struct PipeDialer {
        streams: Mutex<Vec<DynStream>>,
    }

    impl PipeDialer {
        fn with(stream: DynStream) -> Arc<Self> {
            Arc::new(Self {
                streams: Mutex::new(vec![stream]),
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                streams: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Dialer for PipeDialer {
        async fn dial(&self, _address: &str) -> Result<DynStream> {
            self.streams.lock().await.pop().ok_or(Error::Timeout)
        }
    }

    fn test_config() -> CoreConfig {
        CoreConfig {
            traffic_scramble: false,
            handshake_timeout_secs: 5,
            ..CoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_send_and_echo() {
        let (a_stream, b_stream) = tokio::io::duplex(64 * 1024);

        let (alice, mut alice_events) = PeerManager::new(
            Identity::generate(),
            PipeDialer::with(Box::pin(a_stream)),
            test_config(),
        );
        let (bob, mut bob_events) =
            PeerManager::new(Identity::generate(), PipeDialer::empty(), test_config());

        tokio::spawn(bob.clone().on_incoming(Box::pin(b_stream)));

        alice.connect("bobaddr").await.unwrap();
        assert_eq!(
            alice.peer_state("bobaddr").await,
            Some(ConnectionState::Connected)
        );
        assert_eq!(
            alice_events.recv().await,
            Some(PeerEvent::ConnectionStatus {
                address: "bobaddr.onion".into(),
                connected: true,
            })
        );

        assert!(alice.send("bobaddr", "hello").await);

        // Bob sees the connection, then the message.
        let bob_addr_for_alice = match bob_events.recv().await.unwrap() {
            PeerEvent::ConnectionStatus { address, connected } => {
                assert!(connected);
                address
            }
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(
            bob_events.recv().await,
            Some(PeerEvent::Message {
                address: bob_addr_for_alice.clone(),
                text: "hello".into(),
            })
        );

        // Echo back.
        assert!(bob.send(&bob_addr_for_alice, "hello").await);
        assert_eq!(
            alice_events.recv().await,
            Some(PeerEvent::Message {
                address: "bobaddr.onion".into(),
                text: "hello".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_is_false() {
        let (manager, _events) =
            PeerManager::new(Identity::generate(), PipeDialer::empty(), test_config());
        assert!(!manager.send("nobody", "hi").await);
    }

    #[tokio::test]
    async fn test_connect_failure_marks_failed() {
        let (manager, mut events) =
            PeerManager::new(Identity::generate(), PipeDialer::empty(), test_config());

        assert!(manager.connect("ghost").await.is_err());
        assert_eq!(
            manager.peer_state("ghost").await,
            Some(ConnectionState::Failed)
        );
        assert_eq!(
            events.recv().await,
            Some(PeerEvent::ConnectionStatus {
                address: "ghost.onion".into(),
                connected: false,
            })
        );
    }

    #[tokio::test]
    async fn test_address_normalization_shares_entry() {
        let (manager, _events) =
            PeerManager::new(Identity::generate(), PipeDialer::empty(), test_config());

        let a = manager.add("ABC.ONION", None).await;
        let b = manager.add(" abc.onion ", Some("friend".into())).await;
        let c = manager.add("abc", None).await;

        assert_eq!(a, "abc.onion");
        assert_eq!(a, b);
        assert_eq!(b, c);
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name.as_deref(), Some("friend"));
    }

    #[tokio::test]
    async fn test_disconnect_emits_status() {
        let (a_stream, b_stream) = tokio::io::duplex(64 * 1024);
        let (alice, mut alice_events) = PeerManager::new(
            Identity::generate(),
            PipeDialer::with(Box::pin(a_stream)),
            test_config(),
        );
        let (bob, _bob_events) =
            PeerManager::new(Identity::generate(), PipeDialer::empty(), test_config());
        tokio::spawn(bob.clone().on_incoming(Box::pin(b_stream)));

        alice.connect("bobaddr").await.unwrap();
        assert!(matches!(
            alice_events.recv().await,
            Some(PeerEvent::ConnectionStatus { connected: true, .. })
        ));

        alice.disconnect("bobaddr").await;
        assert_eq!(
            alice.peer_state("bobaddr").await,
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(
            alice_events.recv().await,
            Some(PeerEvent::ConnectionStatus {
                address: "bobaddr.onion".into(),
                connected: false,
            })
        );
        assert!(!alice.send("bobaddr", "too late").await);
    }

    #[tokio::test]
    async fn test_remove_drops_entry() {
        let (manager, _events) =
            PeerManager::new(Identity::generate(), PipeDialer::empty(), test_config());
        manager.add("abc", None).await;
        manager.remove("abc").await;
        assert!(manager.snapshot().await.is_empty());
    }
}
