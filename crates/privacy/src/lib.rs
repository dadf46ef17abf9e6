//! Privacy guard: traffic shaping and at-rest protection for the messenger core.
//!
//! Message-length padding, send-time jitter, a passphrase-derived encrypted
//! store, secure wiping (including panic destruction of the storage root),
//! and public-key fingerprints for manual verification.

pub mod decoy;
pub mod fingerprint;
pub mod jitter;
pub mod pad;
pub mod store;
pub mod wipe;

// Re-export commonly used items
pub use fingerprint::{hex_fingerprint, word_fingerprint};
pub use jitter::random_delay;
pub use pad::{pad, unpad};
pub use store::{EncryptedStore, StoreError};
