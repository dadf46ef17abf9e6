//! Keyed, framed channel over one bidirectional transport.
//!
//! A `PeerChannel` owns exactly one transport and one session key. No
//! plaintext ever touches the transport: every frame is sealed under the next
//! send nonce and opened under the expected receive nonce, so gaps and
//! replays fail authentication. After `close()` the key is zero in memory and
//! every operation returns `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};

use crate::crypto::{self, FrameNonce, SessionKey, DIR_INITIATOR, DIR_RESPONDER};
use crate::error::{Error, Result};
use crate::framing::{self, Frame};
use crate::transport::DynStream;

/// Which side of the handshake this channel came from. Decides the nonce
/// direction tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

struct SendHalf {
    io: WriteHalf<DynStream>,
    nonce: FrameNonce,
}

struct RecvHalf {
    io: ReadHalf<DynStream>,
    nonce: FrameNonce,
}

pub struct PeerChannel {
    send: Mutex<SendHalf>,
    recv: Mutex<RecvHalf>,
    key: std::sync::Mutex<Option<SessionKey>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl PeerChannel {
    pub fn from_parts(stream: DynStream, key: SessionKey, role: Role) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (send_tag, recv_tag) = match role {
            Role::Initiator => (DIR_INITIATOR, DIR_RESPONDER),
            Role::Responder => (DIR_RESPONDER, DIR_INITIATOR),
        };
        let (shutdown, _) = watch::channel(false);
        Self {
            send: Mutex::new(SendHalf {
                io: writer,
                nonce: FrameNonce::new(send_tag),
            }),
            recv: Mutex::new(RecvHalf {
                io: reader,
                nonce: FrameNonce::new(recv_tag),
            }),
            key: std::sync::Mutex::new(Some(key)),
            closed: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Seal and write exactly one frame.
    pub async fn send(&self, frame_type: &str, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let inner = framing::encode_inner(frame_type, payload)?;

        let mut half = self.send.lock().await;
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let nonce = half.nonce.next()?;
        let record = {
            let guard = self.key.lock().unwrap();
            let key = guard.as_ref().ok_or(Error::Closed)?;
            crypto::seal(key, &nonce, &inner, b"")?
        };
        framing::write_frame(&mut half.io, &record).await
    }

    /// Read, authenticate, and decode the next frame. A blocked read observes
    /// `close()` within one wakeup.
    pub async fn receive(&self) -> Result<Frame> {
        let mut shutdown = self.shutdown.subscribe();
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut half = self.recv.lock().await;
        let record = tokio::select! {
            _ = shutdown.changed() => return Err(Error::Closed),
            record = framing::read_frame(&mut half.io) => record?,
        };

        let nonce = half.nonce.next()?;
        let inner = {
            let guard = self.key.lock().unwrap();
            let key = guard.as_ref().ok_or(Error::Closed)?;
            crypto::open(key, &nonce, &record, b"")?
        };
        framing::decode_inner(&inner)
    }

    /// Zeroize the session key and shut the transport down. Idempotent. The
    /// key is gone from memory before this returns.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.key.lock().unwrap().take();
        let _ = self.shutdown.send(true);

        let mut half = self.send.lock().await;
        if let Err(e) = half.io.shutdown().await {
            tracing::debug!("transport shutdown: {}", e);
        }
    }
}
