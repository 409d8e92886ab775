//! The persisted credential record and its decrypted token model.
//!
//! A [`CredentialRecord`] holds only ciphertext in its sensitive columns.
//! The encryption boundary is crossed through explicit accessors that take
//! the engine as an argument:
//!
//! | accessor | direction |
//! |----------|-----------|
//! | [`CredentialRecord::get_auth_tokens`] | decrypt `encrypted_auth_tokens` |
//! | [`CredentialRecord::apply_grant`] | encrypt new tokens, set expiry, activate |
//! | [`CredentialRecord::get_config_data`] | decrypt `encrypted_config_data` |
//! | [`CredentialRecord::set_config_data`] | encrypt config independently of tokens |
//!
//! The active flag cannot be set directly. A record only becomes active
//! together with a fresh grant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{DataEncryptionEngine, EncryptedPayload};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Decrypted token map
// ---------------------------------------------------------------------------

/// The decrypted auth-token map of an OAuth grant.
///
/// Well-known keys are typed fields. Anything else the provider returned is
/// kept in `extra` so it survives a decrypt/re-encrypt cycle.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// The access token.
    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Scopes granted to `token`.
    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Account email reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthTokens {
    /// Tokens with just an access token and its scopes.
    pub fn new(token: impl Into<String>, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            token: token.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Builder-style setter for the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Required scopes that this grant does not cover.
    pub fn missing_scopes(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|scope| !self.scopes.iter().any(|granted| granted == *scope))
            .map(|scope| (*scope).to_string())
            .collect()
    }
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("scopes", &self.scopes)
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[redacted]"))
            .field("email", &self.email)
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One integration grant for one owner, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    /// Record id (UUID v7).
    pub id: String,
    /// Tenant that owns the grant.
    pub owner_id: String,
    /// Integration kind, e.g. `google_workspace`.
    pub integration_type: String,
    /// Provider that issued the grant, e.g. `google`.
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last successful store or refresh.
    pub last_sync_at: Option<DateTime<Utc>>,

    encrypted_auth_tokens: Option<EncryptedPayload>,
    encrypted_config_data: Option<EncryptedPayload>,
    is_active: bool,
    token_expires_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Create an active record from a fresh grant.
    pub fn from_grant(
        engine: &DataEncryptionEngine,
        owner_id: impl Into<String>,
        integration_type: impl Into<String>,
        provider: impl Into<String>,
        tokens: &AuthTokens,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let now = Utc::now();
        let mut record = Self {
            id: uuid::Uuid::now_v7().to_string(),
            owner_id: owner_id.into(),
            integration_type: integration_type.into(),
            provider: provider.into(),
            created_at: now,
            updated_at: now,
            last_sync_at: None,
            encrypted_auth_tokens: None,
            encrypted_config_data: None,
            is_active: false,
            token_expires_at: None,
        };
        record.apply_grant(engine, tokens, token_expires_at)?;
        Ok(record)
    }

    /// Rebuild a record from its stored columns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_columns(
        id: String,
        owner_id: String,
        integration_type: String,
        provider: String,
        encrypted_auth_tokens: Option<String>,
        encrypted_config_data: Option<String>,
        is_active: bool,
        token_expires_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            owner_id,
            integration_type,
            provider,
            created_at,
            updated_at,
            last_sync_at,
            encrypted_auth_tokens: encrypted_auth_tokens.map(EncryptedPayload::from_stored),
            encrypted_config_data: encrypted_config_data.map(EncryptedPayload::from_stored),
            is_active,
            token_expires_at,
        }
    }

    // -- Encryption boundary ------------------------------------------------

    /// Decrypt the auth-token map, if one is stored.
    pub fn get_auth_tokens(&self, engine: &DataEncryptionEngine) -> Result<Option<AuthTokens>> {
        self.encrypted_auth_tokens
            .as_ref()
            .map(|payload| engine.decrypt(payload))
            .transpose()
    }

    /// Encrypt `tokens` as the record's new grant and mark it active.
    ///
    /// Used for both first stores and refreshes. The config blob is left
    /// untouched.
    pub fn apply_grant(
        &mut self,
        engine: &DataEncryptionEngine,
        tokens: &AuthTokens,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let encrypted = engine.encrypt(tokens)?;
        let now = Utc::now();

        self.encrypted_auth_tokens = Some(encrypted);
        self.token_expires_at = token_expires_at;
        self.is_active = true;
        self.updated_at = now;
        self.last_sync_at = Some(now);
        Ok(())
    }

    /// Decrypt the config map, if one is stored.
    pub fn get_config_data(
        &self,
        engine: &DataEncryptionEngine,
    ) -> Result<Option<serde_json::Value>> {
        self.encrypted_config_data
            .as_ref()
            .map(|payload| engine.decrypt_value(payload))
            .transpose()
    }

    /// Replace (or clear) the config map without touching the tokens.
    pub fn set_config_data(
        &mut self,
        engine: &DataEncryptionEngine,
        config: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.encrypted_config_data = config.map(|c| engine.encrypt_value(c)).transpose()?;
        self.updated_at = Utc::now();
        Ok(())
    }

    // -- State --------------------------------------------------------------

    /// Soft-deactivate the record. Ciphertext stays in place.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.token_expires_at
    }

    /// Whether the access token has expired at `now`. A record without an
    /// expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at.is_some_and(|at| at <= now)
    }

    /// The stored ciphertext of the auth tokens.
    pub fn encrypted_auth_tokens(&self) -> Option<&EncryptedPayload> {
        self.encrypted_auth_tokens.as_ref()
    }

    /// The stored ciphertext of the config map.
    pub fn encrypted_config_data(&self) -> Option<&EncryptedPayload> {
        self.encrypted_config_data.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
