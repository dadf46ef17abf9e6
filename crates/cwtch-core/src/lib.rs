//! Cwtch Core - Anonymous P2P Messenger Engine
//!
//! Metadata-resistant text messaging between parties identified by
//! self-generated onion addresses. This crate holds the session engine:
//! identity keys, the handshake state machine, authenticated framing, and the
//! peer roster with its connection lifecycle. Transport-level routing lives in
//! the overlay crate; traffic shaping and at-rest protection in the privacy
//! crate.

pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod identity;
pub mod manager;
pub mod peer;
pub mod transport;

// Re-export commonly used types
pub use channel::PeerChannel;
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use framing::Frame;
pub use identity::Identity;
pub use manager::{PeerEvent, PeerManager};
pub use peer::{normalize_address, ConnectionState, Peer};
pub use transport::{Dialer, DynStream};
