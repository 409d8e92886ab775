//! Master key sealing and unsealing.
//!
//! The process master key is a random 256-bit value that never touches disk
//! in the clear. It is persisted once per deployment as a [`MasterKeyBlob`],
//! wrapped by a key derived from the operator password:
//!
//! ```text
//! wrapping_key = PBKDF2-HMAC-SHA256(password, salt, iterations)
//! blob         = salt(16) ‖ nonce(12) ‖ AES-256-GCM(wrapping_key, master_key) ‖ tag(16)
//! ```
//!
//! Unsealing is deterministic for a given `(blob, password)` pair. Any
//! modified byte in the blob, or any other password, fails tag verification
//! and surfaces as [`VaultError::Authentication`].

use std::num::NonZeroU32;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{self, KEY_LEN, NONCE_LEN_BYTES, SALT_LEN, TAG_LEN};
use crate::error::{Result, VaultError};
use crate::keyblob::KeyBlobStore;

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// The unsealed process master key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Result<Self> {
        crypto::random_array().map(Self)
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([redacted])")
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// A password-sealed master key as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKeyBlob {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN_BYTES],
    /// Ciphertext with the GCM tag appended.
    sealed: Vec<u8>,
}

impl MasterKeyBlob {
    /// Smallest byte length that can hold a salt, a nonce and a tag.
    pub const MIN_LEN: usize = SALT_LEN + NONCE_LEN_BYTES + TAG_LEN;

    /// Serialize as `salt ‖ nonce ‖ ciphertext ‖ tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN_BYTES + self.sealed.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.sealed);
        out
    }

    /// Parse the persisted layout.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Authentication`] if `data` is too short to be a
    /// blob; such a blob is treated as corrupted.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LEN {
            return Err(VaultError::Authentication {
                reason: format!(
                    "master key blob is {} bytes, expected at least {}",
                    data.len(),
                    Self::MIN_LEN
                ),
            });
        }

        let (salt_bytes, rest) = data.split_at(SALT_LEN);
        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN_BYTES);

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(salt_bytes);
        let mut nonce = [0u8; NONCE_LEN_BYTES];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self {
            salt,
            nonce,
            sealed: sealed.to_vec(),
        })
    }

    /// The PBKDF2 salt embedded in this blob.
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Seals and unseals the master key with a password-derived wrapping key.
#[derive(Debug, Clone, Copy)]
pub struct MasterKeyManager {
    iterations: NonZeroU32,
}

impl Default for MasterKeyManager {
    fn default() -> Self {
        Self {
            iterations: NonZeroU32::new(crypto::MIN_PBKDF2_ITERATIONS)
                .unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl MasterKeyManager {
    /// Manager using the minimum accepted PBKDF2 iteration count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with an explicit PBKDF2 iteration count.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] below the 100,000 floor.
    pub fn with_iterations(iterations: u32) -> Result<Self> {
        Ok(Self {
            iterations: crypto::checked_iterations(iterations)?,
        })
    }

    /// The PBKDF2 iteration count used for wrapping keys.
    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }

    /// Generate a new random master key and seal it under `password`.
    pub fn generate_and_seal(&self, password: &[u8]) -> Result<(MasterKey, MasterKeyBlob)> {
        let master_key = MasterKey::generate()?;
        let blob = self.seal(&master_key, password)?;
        tracing::info!("generated and sealed new master key");
        Ok((master_key, blob))
    }

    /// Seal an existing master key under `password` with a fresh salt and nonce.
    pub fn seal(&self, master_key: &MasterKey, password: &[u8]) -> Result<MasterKeyBlob> {
        let salt: [u8; SALT_LEN] =
            crypto::random_array().map_err(|_| VaultError::KeyDerivationFailed {
                reason: "failed to generate random salt".into(),
            })?;

        let wrapping_key = self.wrapping_key(password, &salt);
        let (nonce, sealed) = crypto::encrypt(master_key.as_bytes(), wrapping_key.as_slice())?;

        Ok(MasterKeyBlob {
            salt,
            nonce,
            sealed,
        })
    }

    /// Recover the master key from `blob` using `password`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Authentication`] on a wrong password or a
    /// modified blob. Nothing derived from the failed attempt is returned.
    pub fn unseal(&self, blob: &MasterKeyBlob, password: &[u8]) -> Result<MasterKey> {
        let wrapping_key = self.wrapping_key(password, &blob.salt);

        let plaintext = crypto::decrypt(&blob.nonce, &blob.sealed, wrapping_key.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| VaultError::Authentication {
                reason: "wrong password or corrupted master key blob".into(),
            })?;

        if plaintext.len() != KEY_LEN {
            return Err(VaultError::Authentication {
                reason: format!(
                    "unsealed master key is {} bytes, expected {KEY_LEN}",
                    plaintext.len()
                ),
            });
        }

        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&plaintext);

        tracing::debug!("unsealed master key");
        Ok(MasterKey(bytes))
    }

    /// Unseal the blob held by `store`, or create and persist one if the
    /// store is empty.
    ///
    /// PBKDF2 runs exactly once per call, so this belongs at process start.
    pub fn load_or_initialize(&self, store: &dyn KeyBlobStore, password: &[u8]) -> Result<MasterKey> {
        match store.load()? {
            Some(blob) => self.unseal(&blob, password),
            None => {
                tracing::info!("no master key blob found, generating a new one");
                let (master_key, blob) = self.generate_and_seal(password)?;
                store.save(&blob)?;
                Ok(master_key)
            }
        }
    }

    fn wrapping_key(&self, password: &[u8], salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        crypto::derive_key_with_salt(password, salt, self.iterations, &mut *key);
        key
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
