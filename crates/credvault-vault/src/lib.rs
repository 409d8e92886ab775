//! Envelope-encrypted credential storage for credvault.
//!
//! This crate holds third-party OAuth credentials for many owners in a
//! shared SQLite database without ever writing a token in the clear. A
//! random master key is sealed under an operator password; a content key
//! derived from it encrypts every auth-token and config payload with
//! AES-256-GCM.
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM, PBKDF2 and HKDF primitives over `ring`.
//! - [`master_key`]: seal/unseal of the process master key.
//! - [`keyblob`]: where the sealed master key blob lives.
//! - [`engine`]: payload encryption under the derived content key.
//! - [`record`]: the persisted credential record and its token model.
//! - [`store`]: SQLite-backed record persistence.
//! - [`config`]: file and environment configuration.
//! - [`service`]: the process-wide service built at boot.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use credvault_vault::{AuthTokens, CredentialRecord, VaultConfig, VaultService};
//!
//! # fn example() -> credvault_vault::Result<()> {
//! let password = VaultConfig::password_from_env()?;
//! let service = VaultService::bootstrap(VaultConfig::default(), password.as_bytes())?;
//!
//! let tokens = AuthTokens::new("ya29.a0", ["calendar"]).with_refresh_token("1//0g");
//! let record = CredentialRecord::from_grant(
//!     service.engine(),
//!     "user_1",
//!     "google_workspace",
//!     "google",
//!     &tokens,
//!     None,
//! )?;
//! service.store().insert(&record)?;
//!
//! let stored = service.store().find_active("user_1", "google_workspace")?;
//! assert!(stored.is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod keyblob;
pub mod master_key;
pub mod record;
pub mod service;
pub mod store;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::VaultConfig;
pub use engine::{DataEncryptionEngine, EncryptedPayload};
pub use error::{Result, VaultError};
pub use keyblob::{FileKeyBlobStore, KeyBlobStore, MemoryKeyBlobStore};
pub use master_key::{MasterKey, MasterKeyBlob, MasterKeyManager};
pub use record::{AuthTokens, CredentialRecord};
pub use service::VaultService;
pub use store::CredentialStore;
