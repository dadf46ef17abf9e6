use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::error::{Error, Result};

/// Long-lived Ed25519 identity keypair.
///
/// The private scalar never leaves process memory unencrypted: persistence
/// goes through the encrypted store, and the key material is zeroized on drop
/// (dalek's `zeroize` feature). An OS RNG failure aborts the process rather
/// than continuing with a weak identity.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Sample a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct an identity from its 32 secret bytes, e.g. after loading
    /// them from the encrypted store. The caller owns wiping its copy.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let secret: &[u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto(format!("identity key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(secret),
        })
    }

    /// Secret bytes for placement in the encrypted store.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_b64(&self) -> String {
        STANDARD.encode(self.public_bytes())
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }

    /// Verify a signature against a peer's public key bytes.
    pub fn verify_with_pubkey(pubkey: &[u8; 32], msg: &[u8], sig: &Signature) -> Result<()> {
        let pk = VerifyingKey::from_bytes(pubkey).map_err(|_| Error::Auth)?;
        pk.verify(msg, sig).map_err(|_| Error::Auth)
    }
}
