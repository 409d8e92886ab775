//! Credential lifecycle orchestration.
//!
//! The [`CredentialLifecycleManager`] is the only entry point application
//! code needs. It stores fresh grants, hands out valid plaintext
//! credentials, refreshes expired ones through the provider collaborator
//! and disconnects pairs.
//!
//! Per `(owner_id, integration_type)` a record moves through:
//!
//! ```text
//! NotConnected ──store──▶ Active ──refresh ok──▶ Active
//!                           │
//!                           ├──invalid_grant──▶ Disconnected
//!                           └──disconnect─────▶ Disconnected ──store──▶ Active
//! ```
//!
//! There is no per-record refresh lock. Two concurrent refreshes of the
//! same pair both write; the last one wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use credvault_vault::{
    AuthTokens, CredentialRecord, CredentialStore, DataEncryptionEngine, VaultService,
};

use crate::credential::{
    ConnectionStatus, Credential, FetchOutcome, IntegrityReport, NewCredential, NotConnectedReason,
};
use crate::error::{LifecycleError, Result};
use crate::provider::{ProviderRegistry, RefreshRequest, TokenGrant};

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Stores, validates, refreshes and disconnects OAuth credentials.
///
/// Cheap to share: the engine and store sit behind `Arc`s and no method
/// takes `&mut self`.
pub struct CredentialLifecycleManager {
    engine: Arc<DataEncryptionEngine>,
    store: Arc<CredentialStore>,
    providers: ProviderRegistry,
    refresh_timeout: Duration,
}

impl CredentialLifecycleManager {
    /// Build a manager over a bootstrapped vault service.
    pub fn new(vault: &VaultService, providers: ProviderRegistry) -> Self {
        Self::from_parts(
            Arc::clone(vault.engine()),
            Arc::clone(vault.store()),
            providers,
            vault.config().refresh_timeout(),
        )
    }

    pub fn from_parts(
        engine: Arc<DataEncryptionEngine>,
        store: Arc<CredentialStore>,
        providers: ProviderRegistry,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            providers,
            refresh_timeout,
        }
    }

    /// Override the bound on provider calls.
    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }

    // -- Store --------------------------------------------------------------

    /// Persist a fresh grant for `(owner_id, integration_type)`.
    ///
    /// The pair's active record is updated in place. If the pair was
    /// disconnected, its most recent record is reactivated with the new
    /// grant. Otherwise a new record is created.
    pub async fn store(
        &self,
        owner_id: &str,
        integration_type: &str,
        provider: &str,
        credential: NewCredential,
    ) -> Result<CredentialRecord> {
        let existing = self.store.find_latest(owner_id, integration_type)?;

        let record = match existing {
            Some(mut record) => {
                let reactivated = !record.is_active();
                record.provider = provider.to_string();
                record.apply_grant(&self.engine, &credential.tokens, credential.expires_at)?;
                if let Some(config) = &credential.config {
                    record.set_config_data(&self.engine, Some(config))?;
                }
                self.store.update(&record)?;

                tracing::info!(
                    owner_id,
                    integration_type,
                    provider,
                    reactivated,
                    "updated stored credential"
                );
                record
            }
            None => {
                let mut record = CredentialRecord::from_grant(
                    &self.engine,
                    owner_id,
                    integration_type,
                    provider,
                    &credential.tokens,
                    credential.expires_at,
                )?;
                if let Some(config) = &credential.config {
                    record.set_config_data(&self.engine, Some(config))?;
                }
                self.store.insert(&record)?;

                tracing::info!(owner_id, integration_type, provider, "stored new credential");
                record
            }
        };

        Ok(record)
    }

    // -- Fetch --------------------------------------------------------------

    /// Return a valid credential for the pair, refreshing it if expired.
    ///
    /// Missing records, missing scopes and failed refreshes come back as
    /// [`FetchOutcome::NotConnected`]. Only vault errors are returned as
    /// `Err`; a blob failing its integrity check is one of them.
    pub async fn fetch_valid(
        &self,
        owner_id: &str,
        integration_type: &str,
        required_scopes: &[&str],
    ) -> Result<FetchOutcome> {
        let Some(record) = self.store.find_active(owner_id, integration_type)? else {
            tracing::debug!(owner_id, integration_type, "no active credential");
            return Ok(FetchOutcome::NotConnected(NotConnectedReason::NoRecord));
        };

        let Some(tokens) = self.decrypt_tokens(&record)? else {
            tracing::warn!(record_id = %record.id, "active credential has no auth tokens");
            return Ok(FetchOutcome::NotConnected(NotConnectedReason::MissingTokens));
        };

        let missing = tokens.missing_scopes(required_scopes);
        if !missing.is_empty() {
            tracing::info!(
                owner_id,
                integration_type,
                missing = ?missing,
                "credential lacks required scopes"
            );
            return Ok(FetchOutcome::NotConnected(
                NotConnectedReason::InsufficientScopes { missing },
            ));
        }

        if !record.is_expired_at(Utc::now()) {
            return Ok(FetchOutcome::Connected(self.credential(&record, tokens)?));
        }

        if tokens.refresh_token.is_none() {
            tracing::info!(owner_id, integration_type, "token expired and no refresh token");
            return Ok(FetchOutcome::NotConnected(
                NotConnectedReason::ExpiredWithoutRefreshToken,
            ));
        }

        tracing::debug!(
            owner_id,
            integration_type,
            provider = %record.provider,
            "access token expired, attempting refresh"
        );

        match self.refresh_record(record, tokens).await {
            Ok((record, tokens)) => {
                // The provider may have narrowed the grant.
                let missing = tokens.missing_scopes(required_scopes);
                if !missing.is_empty() {
                    tracing::info!(
                        owner_id,
                        integration_type,
                        missing = ?missing,
                        "refreshed credential lacks required scopes"
                    );
                    return Ok(FetchOutcome::NotConnected(
                        NotConnectedReason::InsufficientScopes { missing },
                    ));
                }
                Ok(FetchOutcome::Connected(self.credential(&record, tokens)?))
            }
            Err(LifecycleError::RefreshTimeout { .. }) => Ok(FetchOutcome::NotConnected(
                NotConnectedReason::RefreshTimedOut,
            )),
            Err(LifecycleError::NotConnected { .. }) => {
                Ok(FetchOutcome::NotConnected(NotConnectedReason::NoRecord))
            }
            Err(err @ LifecycleError::Vault(_)) => Err(err),
            Err(err) => {
                tracing::warn!(owner_id, integration_type, error = %err, "token refresh failed");
                Ok(FetchOutcome::NotConnected(NotConnectedReason::RefreshFailed))
            }
        }
    }

    /// Refresh the pair's token now, whether or not it has expired.
    ///
    /// # Errors
    ///
    /// Unlike [`fetch_valid`](Self::fetch_valid), every failure is returned
    /// as a typed error: [`LifecycleError::NotConnected`],
    /// [`LifecycleError::NoRefreshToken`], [`LifecycleError::RefreshTimeout`]
    /// or [`LifecycleError::Provider`].
    pub async fn force_refresh(&self, owner_id: &str, integration_type: &str) -> Result<Credential> {
        let not_connected = || LifecycleError::NotConnected {
            owner_id: owner_id.to_string(),
            integration_type: integration_type.to_string(),
        };

        let record = self
            .store
            .find_active(owner_id, integration_type)?
            .ok_or_else(not_connected)?;
        let tokens = self.decrypt_tokens(&record)?.ok_or_else(not_connected)?;

        let (record, tokens) = self.refresh_record(record, tokens).await?;
        self.credential(&record, tokens)
    }

    // -- Disconnect ---------------------------------------------------------

    /// Soft-deactivate the pair, then revoke the token at the provider.
    ///
    /// Revocation is best-effort and bounded by the refresh timeout; its
    /// failure is logged and does not undo the deactivation. Returns `false`
    /// if the pair had no active record.
    pub async fn disconnect(&self, owner_id: &str, integration_type: &str) -> Result<bool> {
        let Some(record) = self.store.find_active(owner_id, integration_type)? else {
            tracing::debug!(owner_id, integration_type, "nothing to disconnect");
            return Ok(false);
        };

        // A blob that cannot be decrypted must not block the disconnect.
        let access_token = match record.get_auth_tokens(&self.engine) {
            Ok(tokens) => tokens.map(|t| t.token),
            Err(err) => {
                tracing::warn!(record_id = %record.id, error = %err, "skipping revoke");
                None
            }
        };

        if !self.store.deactivate(&record.id)? {
            return Ok(false);
        }
        tracing::info!(owner_id, integration_type, provider = %record.provider, "credential disconnected");

        if let (Some(token), Some(client)) = (access_token, self.providers.get(&record.provider)) {
            match tokio::time::timeout(self.refresh_timeout, client.revoke(&token)).await {
                Ok(Ok(())) => {
                    tracing::debug!(provider = %record.provider, "token revoked at provider");
                }
                Ok(Err(err)) => {
                    tracing::warn!(provider = %record.provider, error = %err, "token revocation failed");
                }
                Err(_) => {
                    tracing::warn!(provider = %record.provider, "token revocation timed out");
                }
            }
        }

        Ok(true)
    }

    // -- Status and maintenance ---------------------------------------------

    /// Token-free connection summary for the pair.
    pub fn status(&self, owner_id: &str, integration_type: &str) -> Result<ConnectionStatus> {
        let Some(record) = self.store.find_active(owner_id, integration_type)? else {
            return Ok(ConnectionStatus::default());
        };
        let tokens = self.decrypt_tokens(&record)?.unwrap_or_default();

        let refreshable = tokens.refresh_token.is_some();
        let connected =
            !tokens.token.is_empty() && (!record.is_expired_at(Utc::now()) || refreshable);

        Ok(ConnectionStatus {
            connected,
            provider: Some(record.provider.clone()),
            email: tokens.email,
            name: tokens.name,
            scopes: tokens.scopes,
            connected_at: Some(record.created_at),
            expires_at: record.token_expires_at(),
            last_sync_at: record.last_sync_at,
        })
    }

    /// Replace the pair's config map, leaving its token blob untouched.
    pub fn update_config(
        &self,
        owner_id: &str,
        integration_type: &str,
        config: Option<&serde_json::Value>,
    ) -> Result<()> {
        let not_connected = || LifecycleError::NotConnected {
            owner_id: owner_id.to_string(),
            integration_type: integration_type.to_string(),
        };

        let mut record = self
            .store
            .find_active(owner_id, integration_type)?
            .ok_or_else(not_connected)?;
        record.set_config_data(&self.engine, config)?;

        if !self.store.update_active_config(&record)? {
            return Err(not_connected());
        }
        tracing::info!(owner_id, integration_type, "updated credential config");
        Ok(())
    }

    /// Verify every stored blob under the current content key.
    pub fn verify_all(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();

        for record in self.store.list_encrypted()? {
            report.records += 1;

            let mut healthy = true;
            let payloads = [record.encrypted_auth_tokens(), record.encrypted_config_data()];
            for payload in payloads.into_iter().flatten() {
                match self.engine.verify(payload) {
                    Ok(()) => {}
                    Err(err) if err.is_integrity() => healthy = false,
                    Err(err) => return Err(err.into()),
                }
            }

            if healthy {
                report.ok += 1;
            } else {
                tracing::warn!(record_id = %record.id, "stored credential failed integrity check");
                report.failed.push(record.id);
            }
        }

        tracing::info!(
            records = report.records,
            ok = report.ok,
            failed = report.failed.len(),
            "verified stored credentials"
        );
        Ok(report)
    }

    // -- Internal helpers ---------------------------------------------------

    fn decrypt_tokens(&self, record: &CredentialRecord) -> Result<Option<AuthTokens>> {
        record.get_auth_tokens(&self.engine).map_err(|err| {
            if err.is_integrity() {
                tracing::error!(
                    record_id = %record.id,
                    owner_id = %record.owner_id,
                    integration_type = %record.integration_type,
                    "stored auth tokens failed integrity check"
                );
            }
            err.into()
        })
    }

    fn credential(&self, record: &CredentialRecord, tokens: AuthTokens) -> Result<Credential> {
        Ok(Credential {
            record_id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            integration_type: record.integration_type.clone(),
            provider: record.provider.clone(),
            config: record.get_config_data(&self.engine)?,
            expires_at: record.token_expires_at(),
            tokens,
        })
    }

    /// Run one provider refresh under the timeout and persist the result.
    ///
    /// A permanent provider rejection deactivates the record. The new grant
    /// is only written while the record is still active, so a disconnect
    /// that lands mid-refresh wins.
    async fn refresh_record(
        &self,
        mut record: CredentialRecord,
        tokens: AuthTokens,
    ) -> Result<(CredentialRecord, AuthTokens)> {
        let refresh_token =
            tokens
                .refresh_token
                .clone()
                .ok_or_else(|| LifecycleError::NoRefreshToken {
                    owner_id: record.owner_id.clone(),
                    integration_type: record.integration_type.clone(),
                })?;

        let client = self.providers.get(&record.provider).ok_or_else(|| {
            LifecycleError::ProviderNotRegistered {
                provider: record.provider.clone(),
            }
        })?;

        let request = RefreshRequest {
            refresh_token,
            token_uri: tokens.token_uri.clone(),
            client_id: tokens.client_id.clone(),
            client_secret: tokens.client_secret.clone(),
            scopes: tokens.scopes.clone(),
        };

        let grant = match tokio::time::timeout(self.refresh_timeout, client.refresh(&request)).await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(source)) => {
                if source.is_permanent() {
                    self.store.deactivate(&record.id)?;
                    tracing::warn!(
                        owner_id = %record.owner_id,
                        integration_type = %record.integration_type,
                        provider = %record.provider,
                        "provider rejected refresh token, credential disconnected"
                    );
                }
                return Err(LifecycleError::Provider {
                    provider: record.provider.clone(),
                    source,
                });
            }
            Err(_) => {
                tracing::warn!(
                    provider = %record.provider,
                    timeout = ?self.refresh_timeout,
                    "token refresh timed out"
                );
                return Err(LifecycleError::RefreshTimeout {
                    provider: record.provider.clone(),
                    timeout: self.refresh_timeout,
                });
            }
        };

        let expires_at = grant.expires_at;
        let refreshed = merge_grant(tokens, grant);
        record.apply_grant(&self.engine, &refreshed, expires_at)?;

        if !self.store.update_active_tokens(&record)? {
            tracing::warn!(record_id = %record.id, "credential disconnected during refresh, discarding new token");
            return Err(LifecycleError::NotConnected {
                owner_id: record.owner_id.clone(),
                integration_type: record.integration_type.clone(),
            });
        }

        tracing::info!(
            owner_id = %record.owner_id,
            integration_type = %record.integration_type,
            provider = %record.provider,
            "token refreshed successfully"
        );
        Ok((record, refreshed))
    }
}

/// Expiry timestamp some token maps carry alongside `token_expires_at`.
const EXPIRY_FIELD: &str = "expiry";

/// Fold a refresh grant into the stored token map.
///
/// The old refresh token and scopes survive unless the provider sent new
/// ones. Unknown extra fields are kept, except that an `expiry` field is
/// rewritten to the new expiry (or dropped when the grant has none).
fn merge_grant(mut tokens: AuthTokens, grant: TokenGrant) -> AuthTokens {
    match grant.expires_at {
        Some(at) if tokens.extra.contains_key(EXPIRY_FIELD) => {
            tokens
                .extra
                .insert(EXPIRY_FIELD.to_string(), serde_json::Value::String(at.to_rfc3339()));
        }
        _ => {
            tokens.extra.remove(EXPIRY_FIELD);
        }
    }
    tokens.token = grant.access_token;
    if let Some(refresh_token) = grant.refresh_token {
        tokens.refresh_token = Some(refresh_token);
    }
    if !grant.scopes.is_empty() {
        tokens.scopes = grant.scopes;
    }
    if let Some(id_token) = grant.id_token {
        tokens.id_token = Some(id_token);
    }
    tokens
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_tokens() -> AuthTokens {
        let mut tokens = AuthTokens::new("t1", ["cal"]).with_refresh_token("r1");
        tokens.email = Some("user@example.com".to_string());
        tokens
            .extra
            .insert("expiry".to_string(), serde_json::json!("2024-01-01T00:00:00Z"));
        tokens
    }

    #[test]
    fn merge_keeps_refresh_token_and_scopes_when_absent() {
        let merged = merge_grant(stored_tokens(), TokenGrant::new("t2", None));

        assert_eq!(merged.token, "t2");
        assert_eq!(merged.refresh_token.as_deref(), Some("r1"));
        assert_eq!(merged.scopes, vec!["cal".to_string()]);
        assert_eq!(merged.email.as_deref(), Some("user@example.com"));
        assert!(!merged.extra.contains_key("expiry"));
    }

    #[test]
    fn merge_rewrites_stale_expiry_field() {
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        let mut stored = stored_tokens();
        stored
            .extra
            .insert("token_type".to_string(), serde_json::json!("Bearer"));

        let merged = merge_grant(stored, TokenGrant::new("t2", Some(expires_at)));

        assert_eq!(merged.extra["expiry"], serde_json::json!(expires_at.to_rfc3339()));
        assert_eq!(merged.extra["token_type"], serde_json::json!("Bearer"));
    }

    #[test]
    fn merge_does_not_invent_expiry_field() {
        let merged = merge_grant(
            AuthTokens::new("t1", ["cal"]),
            TokenGrant::new("t2", Some(Utc::now())),
        );
        assert!(!merged.extra.contains_key("expiry"));
    }

    #[test]
    fn merge_takes_rotated_values() {
        let grant = TokenGrant {
            access_token: "t2".to_string(),
            refresh_token: Some("r2".to_string()),
            expires_at: None,
            scopes: vec!["cal".to_string(), "mail".to_string()],
            id_token: Some("jwt".to_string()),
        };
        let merged = merge_grant(stored_tokens(), grant);

        assert_eq!(merged.refresh_token.as_deref(), Some("r2"));
        assert_eq!(merged.scopes.len(), 2);
        assert_eq!(merged.id_token.as_deref(), Some("jwt"));
    }

    #[test]
    fn manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CredentialLifecycleManager>();
    }
}
