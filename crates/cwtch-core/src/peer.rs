//! Peer roster entries and overlay-address handling.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;

use crate::channel::PeerChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connected,
    Failed,
}

/// One entry in the peer table. Exclusively owns its channel while connected;
/// the address is always stored in normalized form.
pub struct Peer {
    pub address: String,
    pub name: Option<String>,
    pub state: ConnectionState,
    pub last_seen: Option<Instant>,
    /// Peer's long-lived identity key, learned during the handshake. Only
    /// fingerprint verification out-of-band makes it trustworthy.
    pub identity: Option<[u8; 32]>,
    pub(crate) channel: Option<Arc<PeerChannel>>,
}

impl Peer {
    pub fn new(address: String, name: Option<String>) -> Self {
        Self {
            address,
            name,
            state: ConnectionState::Disconnected,
            last_seen: None,
            identity: None,
            channel: None,
        }
    }
}

/// Canonical form of an overlay address: trimmed, lowercase, `.onion`
/// suffixed. Addresses are only ever compared after normalization.
pub fn normalize_address(addr: &str) -> String {
    let addr = addr.trim().to_ascii_lowercase();
    if addr.ends_with(".onion") {
        addr
    } else {
        format!("{}.onion", addr)
    }
}

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// RFC 4648 base-32, lowercase, no padding.
pub fn encode_base32(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    out
}

/// Best-effort table key for an unsolicited inbound peer, derived from its
/// identity key the way v3 onion addresses are built:
/// `base32(pubkey || checksum[..2] || version)` — 56 characters.
pub fn address_from_identity(pubkey: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b".onion checksum");
    hasher.update(pubkey);
    hasher.update([0x03]);
    let checksum = hasher.finalize();

    let mut raw = Vec::with_capacity(35);
    raw.extend_from_slice(pubkey);
    raw.extend_from_slice(&checksum[..2]);
    raw.push(0x03);

    format!("{}.onion", encode_base32(&raw))
}
