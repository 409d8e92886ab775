//! The provider collaborator seam.
//!
//! The lifecycle manager never talks HTTP itself. Refresh and revoke go
//! through a [`ProviderClient`], looked up by the record's provider name in
//! a [`ProviderRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;

/// Everything a provider needs to mint a new access token.
///
/// Client credentials are taken from the stored grant when it carries them
/// and otherwise from the provider's own configuration.
#[derive(Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub token_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for RefreshRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshRequest")
            .field("refresh_token", &"[redacted]")
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// A freshly issued access token.
#[derive(Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Set only when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Scopes reported with the new token. Empty means unchanged.
    pub scopes: Vec<String>,
    pub id_token: Option<String>,
}

impl TokenGrant {
    /// A grant carrying only an access token and its expiry.
    pub fn new(access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at,
            scopes: Vec::new(),
            id_token: None,
        }
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// Provider-specific refresh and revocation.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, request: &RefreshRequest) -> Result<TokenGrant, ProviderError>;

    /// Revoke `token` at the provider.
    async fn revoke(&self, token: &str) -> Result<(), ProviderError>;
}

/// Provider clients keyed by provider name (e.g. `google`).
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under `provider`, replacing any earlier entry.
    pub fn register(&mut self, provider: impl Into<String>, client: Arc<dyn ProviderClient>) {
        let provider = provider.into();
        tracing::debug!(provider = %provider, "registered provider client");
        self.clients.insert(provider, client);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, provider: impl Into<String>, client: Arc<dyn ProviderClient>) -> Self {
        self.register(provider, client);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(provider).cloned()
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
