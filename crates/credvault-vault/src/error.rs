//! Vault error types.
//!
//! Every public API in this crate returns [`VaultError`]. The three
//! security-relevant outcomes have their own variants so callers can react
//! to them without matching on strings:
//!
//! - [`VaultError::Configuration`]: no password or key source. Fatal at boot.
//! - [`VaultError::Authentication`]: the master key blob did not unseal.
//!   Fatal for the process; the blob on disk is left untouched.
//! - [`VaultError::Integrity`]: a stored payload failed AEAD verification.
//!   Only the affected credential becomes unavailable.
//!
//! None of the variants ever carry plaintext or partially decrypted bytes.

/// Unified error type for the credvault storage layer.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Boot errors --------------------------------------------------------
    /// The encryption password or key location is missing or invalid.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The master key blob could not be unsealed (wrong password or a
    /// corrupted blob).
    #[error("master key authentication failed: {reason}")]
    Authentication { reason: String },

    /// A master key blob already exists at the target location.
    #[error("master key blob already exists at {path}")]
    KeyBlobExists { path: String },

    // -- Crypto errors ------------------------------------------------------
    /// An encrypted payload failed authentication (tampering, truncation or
    /// a different content key).
    #[error("integrity check failed: {reason}")]
    Integrity { reason: String },

    /// A payload authenticated but its contents do not match the requested
    /// type. The reason names only the error category and position.
    #[error("decrypted payload has unexpected shape: {reason}")]
    PayloadShape { reason: String },

    /// Encryption failed inside `ring` (key setup or CSPRNG failure).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Key derivation failed (HKDF expansion or salt generation).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    // -- Store errors -------------------------------------------------------
    /// No record exists with the given id.
    #[error("credential record not found: id={id}")]
    RecordNotFound { id: String },

    /// Another active record already exists for this owner and integration.
    #[error("active credential already exists: owner={owner_id}, integration={integration_type}")]
    ActiveRecordConflict {
        owner_id: String,
        integration_type: String,
    },

    /// Database schema migration failed.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem (key blob reads and writes).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors such as a poisoned lock.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether this error means a stored payload failed authentication.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_integrity() {
        let err = VaultError::Integrity {
            reason: "tag mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "integrity check failed: tag mismatch");
        assert!(err.is_integrity());
    }

    #[test]
    fn error_display_active_conflict() {
        let err = VaultError::ActiveRecordConflict {
            owner_id: "user_1".to_string(),
            integration_type: "google_workspace".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "active credential already exists: owner=user_1, integration=google_workspace"
        );
        assert!(!err.is_integrity());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VaultError>();
    }
}
