//! Payload encryption under a key derived from the master key.
//!
//! The [`DataEncryptionEngine`] never uses the master key as a cipher key.
//! It derives a dedicated content key once, at construction:
//!
//! ```text
//! content_key = HKDF-SHA256(ikm = master_key,
//!                           salt = "credvault/credential-encryption",
//!                           info = "credential-encryption")
//! ```
//!
//! Other consumers of the same master key must use a different `info` label
//! and therefore get an unrelated key.
//!
//! Each [`encrypt`](DataEncryptionEngine::encrypt) serializes the payload to
//! compact JSON, seals it with a fresh random nonce, and returns
//! `base64(nonce(12) ‖ ciphertext ‖ tag(16))` as an [`EncryptedPayload`].
//! The engine holds no mutable state, so one instance can be shared across
//! threads behind an `Arc`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{self, KEY_LEN, NONCE_LEN_BYTES, TAG_LEN};
use crate::error::{Result, VaultError};
use crate::master_key::MasterKey;

/// HKDF salt for the credential content key.
pub const CONTENT_KEY_SALT: &[u8] = b"credvault/credential-encryption";

/// HKDF info label for the credential content key.
pub const CONTENT_KEY_INFO: &[u8] = b"credential-encryption";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The derived 256-bit content key. Never persisted; wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; KEY_LEN]);

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey([redacted])")
    }
}

/// An encrypted, base64-encoded payload as stored in a text column.
///
/// Opaque to the storage layer. Callers outside the vault never receive one
/// from the lifecycle API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedPayload(String);

impl EncryptedPayload {
    /// Wrap a value read back from storage. No validation happens until
    /// the payload is decrypted.
    pub fn from_stored(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The base64 text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the base64 text.
    pub fn into_string(self) -> String {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Authenticated encryption of structured credential payloads.
#[derive(Debug)]
pub struct DataEncryptionEngine {
    key: ContentKey,
}

impl DataEncryptionEngine {
    /// Build an engine from the unsealed master key.
    pub fn new(master_key: &MasterKey) -> Result<Self> {
        Ok(Self::from_content_key(Self::derive_content_key(master_key)?))
    }

    /// Build an engine around an already derived content key.
    pub fn from_content_key(key: ContentKey) -> Self {
        Self { key }
    }

    /// Derive the credential content key from `master_key`.
    pub fn derive_content_key(master_key: &MasterKey) -> Result<ContentKey> {
        let okm = crypto::hkdf_sha256(master_key.as_bytes(), CONTENT_KEY_SALT, CONTENT_KEY_INFO)?;
        tracing::debug!("derived credential content key");
        Ok(ContentKey(okm))
    }

    /// Serialize and encrypt `payload`.
    ///
    /// Every call draws a new nonce, so encrypting the same value twice
    /// yields two different payloads.
    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> Result<EncryptedPayload> {
        let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
        let (nonce, ciphertext) = crypto::encrypt(&plaintext, &self.key.0)?;

        let mut blob = Vec::with_capacity(NONCE_LEN_BYTES + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(EncryptedPayload(STANDARD.encode(blob)))
    }

    /// Decrypt and deserialize `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Integrity`] for invalid base64, a truncated
    /// blob, or a tag that does not verify under this engine's key, and
    /// [`VaultError::PayloadShape`] when the plaintext is not a `T`. Neither
    /// carries any of the decrypted contents.
    pub fn decrypt<T: DeserializeOwned>(&self, payload: &EncryptedPayload) -> Result<T> {
        let plaintext = self.open(payload)?;
        serde_json::from_slice(&plaintext).map_err(|e| VaultError::PayloadShape {
            reason: format!("{:?} error at line {} column {}", e.classify(), e.line(), e.column()),
        })
    }

    /// [`encrypt`](Self::encrypt) specialised to a JSON value.
    pub fn encrypt_value(&self, value: &serde_json::Value) -> Result<EncryptedPayload> {
        self.encrypt(value)
    }

    /// [`decrypt`](Self::decrypt) specialised to a JSON value.
    pub fn decrypt_value(&self, payload: &EncryptedPayload) -> Result<serde_json::Value> {
        self.decrypt(payload)
    }

    /// Check that `payload` authenticates under this engine's key, discarding
    /// the plaintext.
    pub fn verify(&self, payload: &EncryptedPayload) -> Result<()> {
        self.open(payload).map(|_| ())
    }

    fn open(&self, payload: &EncryptedPayload) -> Result<Zeroizing<Vec<u8>>> {
        let blob = STANDARD
            .decode(payload.as_str())
            .map_err(|_| VaultError::Integrity {
                reason: "payload is not valid base64".into(),
            })?;

        if blob.len() < NONCE_LEN_BYTES + TAG_LEN {
            return Err(VaultError::Integrity {
                reason: format!(
                    "payload is {} bytes, expected at least {}",
                    blob.len(),
                    NONCE_LEN_BYTES + TAG_LEN
                ),
            });
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN_BYTES);
        let mut nonce = [0u8; NONCE_LEN_BYTES];
        nonce.copy_from_slice(nonce_bytes);

        crypto::decrypt(&nonce, ciphertext, &self.key.0).map(Zeroizing::new)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
