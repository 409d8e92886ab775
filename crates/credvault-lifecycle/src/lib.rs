//! Credential lifecycle management for credvault.
//!
//! This crate sits between application code and the encrypted store. It
//! decides whether a stored OAuth grant is usable for a request, refreshes
//! it through the owning provider when it has expired, and disconnects it
//! on demand.
//!
//! # Architecture
//!
//! ```text
//! CredentialLifecycleManager
//! ├── DataEncryptionEngine  (credvault-vault: encrypt/decrypt payloads)
//! ├── CredentialStore       (credvault-vault: SQLite records)
//! └── ProviderRegistry
//!     └── dyn ProviderClient (refresh / revoke, e.g. OAuthProviderClient)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use credvault_lifecycle::{
//!     CredentialLifecycleManager, FetchOutcome, NewCredential, OAuthProviderClient,
//!     OAuthProviderConfig, ProviderRegistry,
//! };
//! use credvault_vault::{AuthTokens, VaultConfig, VaultService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let password = VaultConfig::password_from_env()?;
//! let vault = VaultService::bootstrap(VaultConfig::default(), password.as_bytes())?;
//!
//! let google = OAuthProviderClient::new(OAuthProviderConfig::google("client-id", "secret"))?;
//! let providers = ProviderRegistry::new().with("google", Arc::new(google));
//! let manager = CredentialLifecycleManager::new(&vault, providers);
//!
//! let tokens = AuthTokens::new("ya29.a0", ["https://www.googleapis.com/auth/calendar"])
//!     .with_refresh_token("1//0g");
//! manager
//!     .store("user_1", "google_workspace", "google", NewCredential::new(tokens, None))
//!     .await?;
//!
//! match manager
//!     .fetch_valid("user_1", "google_workspace", &["https://www.googleapis.com/auth/calendar"])
//!     .await?
//! {
//!     FetchOutcome::Connected(credential) => println!("token for {}", credential.owner_id),
//!     FetchOutcome::NotConnected(reason) => println!("please reconnect: {reason:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod credential;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod provider;

// Re-export key types at the crate root for convenience.
pub use credential::{
    ConnectionStatus, Credential, FetchOutcome, IntegrityReport, NewCredential, NotConnectedReason,
};
pub use error::{LifecycleError, ProviderError, Result};
pub use manager::CredentialLifecycleManager;
pub use oauth::{OAuthProviderClient, OAuthProviderConfig};
pub use provider::{ProviderClient, ProviderRegistry, RefreshRequest, TokenGrant};
