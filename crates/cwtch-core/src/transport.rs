//! Transport abstraction shared by the session engine and the overlay.
//!
//! The engine only needs a bidirectional byte stream; whether it arrived via
//! the hidden-service listener, a SOCKS-proxied dial, or an in-memory duplex
//! in tests is the caller's business.

use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Umbrella trait for the streams handed around as trait objects. A `dyn`
/// type can name only one non-auto trait, so reading and writing are folded
/// into a single trait together with the `Unpin + Send` bounds the channel's
/// split halves and spawned receiver tasks require.
pub trait StreamTrait: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> StreamTrait for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed bidirectional byte stream: a live TCP socket, a SOCKS-proxied dial,
/// or an in-memory duplex in tests.
pub type DynStream = Pin<Box<dyn StreamTrait>>;

/// Outbound connector. Implemented by the overlay service (SOCKS5 through the
/// anonymizing proxy, or loopback TCP in offline simulation).
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to a peer's overlay address. Implementations own the connect
    /// deadline and return [`crate::Error::Timeout`] when it elapses.
    async fn dial(&self, address: &str) -> Result<DynStream>;
}
