//! Handshake implementation.
//!
//! - One newline-terminated ASCII hello in each direction carrying a fresh
//!   X25519 ephemeral key and the long-lived identity key.
//! - Derives a 32-byte session key via HKDF-SHA256 over the shared secret.
//! - Produces a [`PeerChannel`] sealed with AES-256-GCM for all later frames.
//!
//! The identity key in the hello does not sign the ephemeral unless the
//! transcript-signature toggle is on; without it, an active man-in-the-middle
//! is only detectable by comparing fingerprints out-of-band.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::Signature;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use x25519_dalek::PublicKey;

use crate::channel::{PeerChannel, Role};
use crate::crypto::{self, SessionKey, HANDSHAKE_SALT, SESSION_INFO};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::transport::DynStream;

pub const HELLO_PREFIX: &str = "CWTCH_HELLO";
const MAX_HELLO_LEN: usize = 512;

/// Protocol states. `Failed` never yields a channel; the socket is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    SentHello,
    AwaitingHello,
    DerivedKey,
    Handshaken,
    Failed,
}

/// Result of a completed handshake: the keyed channel plus the peer's
/// identity key for fingerprinting.
pub struct Established {
    pub channel: PeerChannel,
    pub peer_identity: [u8; 32],
}

struct Hello {
    ephemeral: PublicKey,
    identity: [u8; 32],
}

fn build_hello(identity: &Identity, ephemeral: &PublicKey, sign: bool) -> String {
    let mut line = format!(
        "{}:{}:{}",
        HELLO_PREFIX,
        STANDARD.encode(ephemeral.as_bytes()),
        identity.public_b64(),
    );
    if sign {
        let sig = identity.sign(ephemeral.as_bytes());
        line.push(':');
        line.push_str(&STANDARD.encode(sig.to_bytes()));
    }
    line
}

fn decode_key(field: &str) -> Result<[u8; 32]> {
    let bytes = STANDARD
        .decode(field)
        .map_err(|_| Error::Protocol("hello field is not base64".into()))?;
    bytes
        .try_into()
        .map_err(|_| Error::Protocol("hello key has wrong length".into()))
}

/// Validate a peer hello line. A present signature is always verified; a
/// missing one is only an error when `require_sig` is set.
fn parse_hello(line: &str, require_sig: bool) -> Result<Hello> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(Error::Protocol(format!(
            "hello has {} fields, expected 3 or 4",
            parts.len()
        )));
    }
    if parts[0] != HELLO_PREFIX {
        return Err(Error::Protocol("bad hello prefix".into()));
    }

    let ephemeral_bytes = decode_key(parts[1])?;
    let identity_bytes = decode_key(parts[2])?;

    match parts.get(3) {
        Some(sig_field) => {
            let sig_bytes: [u8; 64] = STANDARD
                .decode(sig_field)
                .map_err(|_| Error::Protocol("signature is not base64".into()))?
                .try_into()
                .map_err(|_| Error::Protocol("signature has wrong length".into()))?;
            let sig = Signature::from_bytes(&sig_bytes);
            Identity::verify_with_pubkey(&identity_bytes, &ephemeral_bytes, &sig)?;
        }
        None if require_sig => {
            return Err(Error::Protocol("peer did not sign the transcript".into()));
        }
        None => {}
    }

    Ok(Hello {
        ephemeral: PublicKey::from(ephemeral_bytes),
        identity: identity_bytes,
    })
}

async fn write_hello(stream: &mut DynStream, line: &str) -> Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn read_hello(stream: &mut DynStream) -> Result<String> {
    let mut line = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        if let Err(e) = stream.read_exact(&mut byte).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(Error::Protocol("peer closed during handshake".into()));
            }
            return Err(e.into());
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_HELLO_LEN {
            return Err(Error::Protocol("hello line too long".into()));
        }
    }
    String::from_utf8(line)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| Error::Protocol("hello is not ASCII".into()))
}

/// Initiator side: send our hello, read the peer's, derive the session key.
/// On any failure the machine ends in `Failed`, the socket is dropped, and
/// no channel is returned.
pub async fn initiate(
    identity: &Identity,
    mut stream: DynStream,
    sign_transcript: bool,
) -> Result<Established> {
    let mut state = HandshakeState::Start;
    tracing::trace!(?state, "starting handshake");

    match initiate_inner(identity, &mut stream, sign_transcript, &mut state).await {
        Ok((key, peer_identity)) => {
            state = HandshakeState::Handshaken;
            tracing::debug!(?state, "session established");
            Ok(Established {
                channel: PeerChannel::from_parts(stream, key, Role::Initiator),
                peer_identity,
            })
        }
        Err(e) => {
            state = HandshakeState::Failed;
            tracing::debug!(?state, "handshake failed: {}", e);
            Err(e)
        }
    }
}

async fn initiate_inner(
    identity: &Identity,
    stream: &mut DynStream,
    sign_transcript: bool,
    state: &mut HandshakeState,
) -> Result<(SessionKey, [u8; 32])> {
    let (eph_secret, eph_pub) = crypto::generate_ephemeral();

    write_hello(stream, &build_hello(identity, &eph_pub, sign_transcript)).await?;
    *state = HandshakeState::SentHello;
    tracing::trace!(state = ?*state, "hello sent");

    let line = read_hello(stream).await?;
    let hello = parse_hello(&line, sign_transcript)?;

    let shared = crypto::agree(eph_secret, &hello.ephemeral)?;
    let key = crypto::derive_session_key(&shared, SESSION_INFO, HANDSHAKE_SALT)?;
    *state = HandshakeState::DerivedKey;
    tracing::trace!(state = ?*state, "session key derived");

    Ok((key, hello.identity))
}

/// Responder side: read the peer's hello first, answer with our own.
pub async fn respond(
    identity: &Identity,
    mut stream: DynStream,
    sign_transcript: bool,
) -> Result<Established> {
    let mut state = HandshakeState::AwaitingHello;
    tracing::trace!(?state, "awaiting hello");

    match respond_inner(identity, &mut stream, sign_transcript, &mut state).await {
        Ok((key, peer_identity)) => {
            state = HandshakeState::Handshaken;
            tracing::debug!(?state, "session established");
            Ok(Established {
                channel: PeerChannel::from_parts(stream, key, Role::Responder),
                peer_identity,
            })
        }
        Err(e) => {
            state = HandshakeState::Failed;
            tracing::debug!(?state, "handshake failed: {}", e);
            Err(e)
        }
    }
}

async fn respond_inner(
    identity: &Identity,
    stream: &mut DynStream,
    sign_transcript: bool,
    state: &mut HandshakeState,
) -> Result<(SessionKey, [u8; 32])> {
    let line = read_hello(stream).await?;
    let hello = parse_hello(&line, sign_transcript)?;

    let (eph_secret, eph_pub) = crypto::generate_ephemeral();
    write_hello(stream, &build_hello(identity, &eph_pub, sign_transcript)).await?;
    *state = HandshakeState::SentHello;
    tracing::trace!(state = ?*state, "hello answered");

    let shared = crypto::agree(eph_secret, &hello.ephemeral)?;
    let key = crypto::derive_session_key(&shared, SESSION_INFO, HANDSHAKE_SALT)?;
    *state = HandshakeState::DerivedKey;
    tracing::trace!(state = ?*state, "session key derived");

    Ok((key, hello.identity))
}
