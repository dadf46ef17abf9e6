//! Session cryptography: X25519 agreement, HKDF-SHA256 key derivation, and
//! AES-256-GCM sealing of every frame.
//!
//! Nonce discipline: a frame nonce is a 4-byte direction tag concatenated
//! with an 8-byte big-endian counter. Each side seals under its own tag and
//! opens under the peer's, so the two directions never share a nonce and a
//! replayed or reordered frame fails authentication instead of decrypting.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// HKDF inputs fixed by the wire protocol.
pub const SESSION_INFO: &[u8] = b"cwtch-session";
pub const HANDSHAKE_SALT: &[u8] = b"handshake-salt";

/// Direction tags. The initiator seals under `DIR_INITIATOR`; the responder
/// under `DIR_RESPONDER`.
pub const DIR_INITIATOR: [u8; 4] = *b"init";
pub const DIR_RESPONDER: [u8; 4] = *b"resp";

/// 32-byte symmetric session key. Single-use per connection; zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Fresh ephemeral X25519 pair for one handshake.
pub fn generate_ephemeral() -> (EphemeralSecret, PublicKey) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// X25519 scalar multiplication. An all-zero output means the peer sent a
/// low-order point; the handshake must fail rather than derive from it.
pub fn agree(secret: EphemeralSecret, peer: &PublicKey) -> Result<SharedSecret> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(Error::Protocol("non-contributory key agreement".into()));
    }
    Ok(shared)
}

/// HKDF-SHA256 over the shared secret.
pub fn derive_session_key(shared: &SharedSecret, info: &[u8], salt: &[u8]) -> Result<SessionKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| Error::Crypto("HKDF expand failed".into()))?;
    Ok(SessionKey(okm))
}

/// AES-256-GCM seal: returns `ciphertext || tag`.
pub fn seal(key: &SessionKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| Error::Crypto("AEAD seal failed".into()))
}

/// AES-256-GCM open. Any mismatch in key, nonce, ciphertext, or aad yields
/// [`Error::Auth`].
pub fn open(key: &SessionKey, nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| Error::Auth)
}

/// Monotonic per-direction nonce counter.
///
/// `next` returns the current nonce and advances. The counter never wraps:
/// exhaustion surfaces as [`Error::NonceExhausted`] and forces channel
/// termination.
pub struct FrameNonce {
    tag: [u8; 4],
    counter: u64,
}

impl FrameNonce {
    pub fn new(tag: [u8; 4]) -> Self {
        Self { tag, counter: 0 }
    }

    pub fn next(&mut self) -> Result<[u8; NONCE_LEN]> {
        if self.counter == u64::MAX {
            return Err(Error::NonceExhausted);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..4].copy_from_slice(&self.tag);
        nonce[4..].copy_from_slice(&self.counter.to_be_bytes());
        self.counter += 1;
        Ok(nonce)
    }

    #[cfg(test)]
    pub(crate) fn with_counter(tag: [u8; 4], counter: u64) -> Self {
        Self { tag, counter }
    }
}
