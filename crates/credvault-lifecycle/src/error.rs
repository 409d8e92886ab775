//! Error types for the lifecycle crate.
//!
//! [`LifecycleError`] is returned by the typed operations of the
//! [`CredentialLifecycleManager`](crate::CredentialLifecycleManager).
//! [`fetch_valid`](crate::CredentialLifecycleManager::fetch_valid) folds
//! refresh failures into a `NotConnected` outcome instead; only vault
//! errors (integrity, database) escape it.

use std::time::Duration;

use credvault_vault::VaultError;

/// Errors reported by a [`ProviderClient`](crate::ProviderClient).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The token endpoint could not be reached or returned an unreadable
    /// response. The grant may still be valid.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider rejected the refresh token (`invalid_grant`). The grant
    /// is gone and the user must reconnect.
    #[error("invalid grant: {reason}")]
    InvalidGrant { reason: String },

    /// Any other non-success response from the provider.
    #[error("provider rejected request: {reason}")]
    Rejected { reason: String },
}

impl ProviderError {
    /// Whether the failure means the stored grant can never be refreshed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidGrant { .. })
    }
}

/// Unified error type for credential lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// An error propagated from the vault crate.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// The provider refresh or revoke call failed.
    #[error("provider {provider}: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// The provider refresh call did not complete in time.
    #[error("refresh for provider {provider} timed out after {timeout:?}")]
    RefreshTimeout { provider: String, timeout: Duration },

    /// A refresh was requested but the stored grant has no refresh token.
    #[error("no refresh token stored for {owner_id}/{integration_type}")]
    NoRefreshToken {
        owner_id: String,
        integration_type: String,
    },

    /// No active credential exists for the pair.
    #[error("not connected: {owner_id}/{integration_type}")]
    NotConnected {
        owner_id: String,
        integration_type: String,
    },

    /// No [`ProviderClient`](crate::ProviderClient) is registered under the
    /// record's provider name.
    #[error("provider not registered: {provider}")]
    ProviderNotRegistered { provider: String },
}

impl LifecycleError {
    /// Whether a stored payload failed authentication.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Vault(e) if e.is_integrity())
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, LifecycleError>;
