use thiserror::Error;

/// Error taxonomy for the session engine.
///
/// I/O and protocol errors on a peer are caught by the receiver/sender tasks
/// and translated into a disconnect event; they never poison the manager.
/// `Crypto` covers residual failures inside the crypto layer (KDF expand,
/// AEAD seal) and closes the affected channel like a protocol error. An OS
/// RNG failure never surfaces as a value: key generation aborts the process
/// through `getrandom` when the entropy source fails.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("authentication failed")]
    Auth,

    #[error("channel closed")]
    Closed,

    #[error("end of stream")]
    EndOfStream,

    #[error("nonce space exhausted")]
    NonceExhausted,

    #[error("operation timed out")]
    Timeout,

    #[error("crypto failure: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, Error>;
