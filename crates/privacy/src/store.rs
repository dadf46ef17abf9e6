//! Encrypted at-rest store.
//!
//! Files are written as `iv(12) || ciphertext || tag(16)` under AES-256-GCM
//! with a key derived from the user's passphrase. A hidden `.salt` sibling
//! (32 random bytes) parameterizes the derivation: PBKDF2-HMAC-SHA-256 with
//! 100,000 iterations. The store holds the derived key in memory until
//! [`EncryptedStore::panic`] or process exit.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::wipe;

pub const SALT_FILE: &str = ".salt";
pub const PBKDF2_ROUNDS: u32 = 100_000;

const SALT_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is locked")]
    NotUnlocked,
    #[error("authentication failed")]
    Auth,
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("crypto failure: {0}")]
    Crypto(String),
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct StorageKey([u8; 32]);

/// Passphrase-protected file store rooted at a single directory.
pub struct EncryptedStore {
    root: PathBuf,
    key: Mutex<Option<StorageKey>>,
}

impl EncryptedStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            key: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.lock().unwrap().is_some()
    }

    /// Derive the storage key from `passphrase` and hold it until [`panic`]
    /// or drop. The passphrase buffer is wiped before this returns, success
    /// or failure. Creates the storage root and `.salt` on first use.
    ///
    /// [`panic`]: EncryptedStore::panic
    pub async fn unlock(&self, passphrase: &mut Vec<char>) -> Result<(), StoreError> {
        let mut pass_bytes = passphrase.iter().collect::<String>().into_bytes();
        wipe::wipe_chars(passphrase);
        passphrase.clear();

        tokio::fs::create_dir_all(&self.root).await?;
        let salt = match self.read_or_create_salt().await {
            Ok(salt) => salt,
            Err(e) => {
                pass_bytes.zeroize();
                return Err(e);
            }
        };

        // PBKDF2 is deliberately slow; keep it off the async workers.
        let key = tokio::task::spawn_blocking(move || {
            let mut out = [0u8; 32];
            pbkdf2_hmac::<Sha256>(&pass_bytes, &salt, PBKDF2_ROUNDS, &mut out);
            pass_bytes.zeroize();
            StorageKey(out)
        })
        .await
        .map_err(|e| StoreError::Crypto(format!("key derivation task failed: {e}")))?;

        *self.key.lock().unwrap() = Some(key);
        tracing::debug!("storage unlocked at {:?}", self.root);
        Ok(())
    }

    /// Encrypt `data` under a fresh random IV and persist it as `name`.
    pub async fn save(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let cipher = self.cipher()?;

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), data)
            .map_err(|_| StoreError::Crypto("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);

        tokio::fs::write(self.root.join(name), &blob).await?;
        tracing::debug!("saved {} ({} bytes)", name, data.len());
        Ok(())
    }

    /// Load and decrypt `name`. Missing file yields `Ok(None)`; a bad tag or
    /// truncated blob yields [`StoreError::Auth`] without corrupting state.
    pub async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cipher = self.cipher()?;

        let path = self.root.join(name);
        let blob = match tokio::fs::read(&path).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if blob.len() < IV_LEN + TAG_LEN {
            return Err(StoreError::Auth);
        }

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&blob[..IV_LEN]), &blob[IV_LEN..])
            .map_err(|_| StoreError::Auth)?;
        Ok(Some(plaintext))
    }

    /// Shred and unlink a single stored file. Missing files are not an error.
    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(());
        }
        tokio::task::spawn_blocking(move || wipe::shred_file(&path))
            .await
            .map_err(|e| StoreError::Crypto(format!("shred task failed: {e}")))??;
        Ok(())
    }

    /// Best-effort destruction: zeroize the storage key, then shred every
    /// regular file under the root and remove the directories. The store is
    /// locked again afterwards.
    pub async fn panic(&self) {
        self.key.lock().unwrap().take();

        let root = self.root.clone();
        let result = tokio::task::spawn_blocking(move || wipe::shred_dir(&root)).await;
        if let Err(e) = result {
            tracing::warn!("panic wipe task failed: {}", e);
        }
        tracing::info!("storage root destroyed, store locked");
    }

    fn cipher(&self) -> Result<Aes256Gcm, StoreError> {
        let guard = self.key.lock().unwrap();
        let key = guard.as_ref().ok_or(StoreError::NotUnlocked)?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)))
    }

    async fn read_or_create_salt(&self) -> Result<[u8; SALT_LEN], StoreError> {
        let path = self.root.join(SALT_FILE);
        match tokio::fs::read(&path).await {
            Ok(data) if data.len() == SALT_LEN => {
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&data);
                Ok(salt)
            }
            Ok(_) => Err(StoreError::Crypto("malformed salt file".into())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_LEN];
                rand::rngs::OsRng.fill_bytes(&mut salt);
                tokio::fs::write(&path, salt).await?;
                Ok(salt)
            }
            Err(e) => Err(e.into()),
        }
    }
}
