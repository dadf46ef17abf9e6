//! Human-auditable public-key fingerprints.
//!
//! Two forms over the same SHA-256 digest: a grouped hex string for careful
//! comparison and a six-word phrase for reading over a voice channel. Both
//! sides must compare fingerprints out-of-band before trusting a session; the
//! handshake alone does not authenticate the peer.

use sha2::{Digest, Sha256};

/// Fixed 32-word alphabet for the word fingerprint. Order is part of the
/// format; never reorder.
pub const WORD_ALPHABET: [&str; 32] = [
    "acid", "alpha", "amber", "aqua", "atlas", "bison", "blaze", "cedar",
    "comet", "coral", "delta", "ember", "fable", "flint", "gale", "hazel",
    "ivory", "jade", "karma", "lotus", "lunar", "maple", "night", "ocean",
    "onyx", "pearl", "quartz", "raven", "sage", "terra", "umber", "zephyr",
];

/// `XXXX-XXXX-XXXX-XXXX-XXXX` from the first 10 bytes of `SHA-256(pubkey)`.
pub fn hex_fingerprint(pubkey: &[u8]) -> String {
    let digest = Sha256::digest(pubkey);
    digest[..10]
        .chunks(2)
        .map(|pair| format!("{:02X}{:02X}", pair[0], pair[1]))
        .collect::<Vec<_>>()
        .join("-")
}

/// Six words from [`WORD_ALPHABET`], indexed by bytes 0..6 of
/// `SHA-256(pubkey)` modulo the alphabet size.
pub fn word_fingerprint(pubkey: &[u8]) -> String {
    let digest = Sha256::digest(pubkey);
    digest[..6]
        .iter()
        .map(|b| WORD_ALPHABET[(b % 32) as usize])
        .collect::<Vec<_>>()
        .join(" ")
}
