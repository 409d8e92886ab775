//! Plaintext views handed to callers.
//!
//! These types live only in memory. Nothing here is ever written to the
//! store; the record keeps ciphertext and the manager decrypts on demand.

use chrono::{DateTime, Utc};
use serde::Serialize;

use credvault_vault::AuthTokens;

/// Input to [`store`](crate::CredentialLifecycleManager::store): the plaintext
/// result of an OAuth exchange.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub tokens: AuthTokens,
    pub expires_at: Option<DateTime<Utc>>,
    /// Integration settings encrypted separately from the tokens. `None`
    /// keeps whatever config the pair already has.
    pub config: Option<serde_json::Value>,
}

impl NewCredential {
    pub fn new(tokens: AuthTokens, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            tokens,
            expires_at,
            config: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// A decrypted, currently valid credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub record_id: String,
    pub owner_id: String,
    pub integration_type: String,
    pub provider: String,
    pub tokens: AuthTokens,
    pub config: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// The access token.
    pub fn access_token(&self) -> &str {
        &self.tokens.token
    }
}

/// Why [`fetch_valid`](crate::CredentialLifecycleManager::fetch_valid) did
/// not return a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotConnectedReason {
    /// No active record for the pair.
    NoRecord,
    /// The active record holds no auth-token blob.
    MissingTokens,
    /// The grant does not cover every required scope. No refresh was tried.
    InsufficientScopes { missing: Vec<String> },
    /// The token expired and there is no refresh token.
    ExpiredWithoutRefreshToken,
    /// The provider refused or failed the refresh.
    RefreshFailed,
    /// The provider did not answer within the refresh timeout.
    RefreshTimedOut,
}

/// Result of a fetch. `NotConnected` is a normal outcome, not an error.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Connected(Credential),
    NotConnected(NotConnectedReason),
}

impl FetchOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::Connected(credential) => Some(credential),
            Self::NotConnected(_) => None,
        }
    }

    pub fn into_credential(self) -> Option<Credential> {
        match self {
            Self::Connected(credential) => Some(credential),
            Self::NotConnected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&NotConnectedReason> {
        match self {
            Self::Connected(_) => None,
            Self::NotConnected(reason) => Some(reason),
        }
    }
}

/// Token-free summary of a pair's connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// Active and either unexpired or refreshable.
    pub connected: bool,
    pub provider: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub scopes: Vec<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Outcome of decrypting every stored blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub records: usize,
    pub ok: usize,
    /// Ids of records with at least one blob that failed verification.
    pub failed: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
