//! HTTP OAuth 2.0 provider client.
//!
//! Implements the two provider calls the lifecycle needs over plain
//! RFC 6749 / RFC 7009 endpoints:
//!
//! - refresh: form POST `grant_type=refresh_token` to the token endpoint.
//! - revoke: form POST `token=<access token>` to the revocation endpoint.
//!
//! Client credentials stored with the grant take precedence over the
//! configured ones, so grants issued to different OAuth clients can share
//! one provider entry.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProviderError;
use crate::provider::{ProviderClient, RefreshRequest, TokenGrant};

/// Google's token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google's revocation endpoint.
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Endpoints and client credentials for one OAuth provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    /// The token endpoint URL.
    pub token_url: String,

    /// The revocation endpoint URL. Without one, revoke is a no-op.
    #[serde(default)]
    pub revoke_url: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,
}

impl OAuthProviderConfig {
    /// Google endpoints with the given client credentials.
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            token_url: GOOGLE_TOKEN_URL.to_string(),
            revoke_url: Some(GOOGLE_REVOKE_URL.to_string()),
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
        }
    }
}

impl std::fmt::Debug for OAuthProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProviderConfig")
            .field("token_url", &self.token_url)
            .field("revoke_url", &self.revoke_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Raw token response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    id_token: Option<String>,
}

impl TokenResponse {
    /// Convert into a [`TokenGrant`], computing `expires_at` from `expires_in`.
    fn into_grant(self) -> Result<TokenGrant, ProviderError> {
        let expires_at = match self.expires_in {
            Some(secs) => Some(
                chrono::Duration::try_seconds(secs)
                    .and_then(|lifetime| chrono::Utc::now().checked_add_signed(lifetime))
                    .ok_or_else(|| ProviderError::Rejected {
                        reason: "expires_in out of range".to_string(),
                    })?,
            ),
            None => None,
        };

        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        Ok(TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            scopes,
            id_token: self.id_token,
        })
    }
}

/// Raw error response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// [`ProviderClient`] over standard OAuth 2.0 HTTP endpoints.
pub struct OAuthProviderClient {
    token_url: Url,
    revoke_url: Option<Url>,
    client_id: Option<String>,
    client_secret: Option<String>,
    client: reqwest::Client,
}

impl OAuthProviderClient {
    /// Build a client, validating the configured endpoint URLs.
    pub fn new(config: OAuthProviderConfig) -> Result<Self, url::ParseError> {
        let token_url = Url::parse(&config.token_url)?;
        let revoke_url = config.revoke_url.as_deref().map(Url::parse).transpose()?;

        Ok(Self {
            token_url,
            revoke_url,
            client_id: config.client_id,
            client_secret: config.client_secret,
            client: reqwest::Client::new(),
        })
    }

    fn token_endpoint(&self, request: &RefreshRequest) -> Result<Url, ProviderError> {
        match request.token_uri.as_deref() {
            Some(uri) => Url::parse(uri).map_err(|e| ProviderError::Rejected {
                reason: format!("stored token_uri is not a valid URL: {e}"),
            }),
            None => Ok(self.token_url.clone()),
        }
    }
}

#[async_trait]
impl ProviderClient for OAuthProviderClient {
    async fn refresh(&self, request: &RefreshRequest) -> Result<TokenGrant, ProviderError> {
        let endpoint = self.token_endpoint(request)?;

        let client_id = request
            .client_id
            .as_deref()
            .or(self.client_id.as_deref())
            .ok_or_else(|| ProviderError::Rejected {
                reason: "no client_id for refresh".to_string(),
            })?;

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", request.refresh_token.as_str()),
            ("client_id", client_id),
        ];
        if let Some(secret) = request
            .client_secret
            .as_deref()
            .or(self.client_secret.as_deref())
        {
            params.push(("client_secret", secret));
        }

        tracing::debug!(token_url = %endpoint, "refreshing access token");

        let response = self.client.post(endpoint).form(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        parse_token_response(status, &body)
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderError> {
        let Some(endpoint) = self.revoke_url.clone() else {
            tracing::debug!("no revocation endpoint configured, skipping revoke");
            return Ok(());
        };

        let response = self
            .client
            .post(endpoint)
            .form(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("token revoked");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_error(status, &body))
        }
    }
}

/// Parse the body of a token endpoint response.
fn parse_token_response(status: StatusCode, body: &str) -> Result<TokenGrant, ProviderError> {
    if !status.is_success() {
        return Err(classify_error(status, body));
    }

    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Rejected {
            reason: format!("malformed token response ({:?})", e.classify()),
        })?;
    let grant = response.into_grant()?;
    tracing::debug!("token refresh successful");
    Ok(grant)
}

/// Map an error response to a [`ProviderError`]. Only `invalid_grant` is
/// treated as a dead grant.
fn classify_error(status: StatusCode, body: &str) -> ProviderError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(error_response) => {
            let reason = error_response
                .error_description
                .unwrap_or_else(|| error_response.error.clone());
            if error_response.error == "invalid_grant" {
                ProviderError::InvalidGrant { reason }
            } else {
                ProviderError::Rejected {
                    reason: format!("{}: {reason}", error_response.error),
                }
            }
        }
        Err(_) => ProviderError::Rejected {
            reason: format!("HTTP {status}"),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RefreshRequest {
        RefreshRequest {
            refresh_token: "1//0g".to_string(),
            token_uri: None,
            client_id: None,
            client_secret: None,
            scopes: vec![],
        }
    }

    #[test]
    fn success_body_becomes_grant() {
        let body = r#"{
            "access_token": "ya29.new",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/calendar openid",
            "token_type": "Bearer"
        }"#;

        let before = chrono::Utc::now();
        let grant = parse_token_response(StatusCode::OK, body).unwrap();

        assert_eq!(grant.access_token, "ya29.new");
        assert!(grant.refresh_token.is_none());
        assert_eq!(grant.scopes.len(), 2);
        let expires_at = grant.expires_at.unwrap();
        assert!(expires_at > before + chrono::Duration::seconds(3500));
    }

    #[test]
    fn invalid_grant_is_permanent() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#;
        let err = parse_token_response(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::InvalidGrant { ref reason } if reason == "Token has been expired or revoked."
        ));
    }

    #[test]
    fn other_oauth_errors_are_rejections() {
        let body = r#"{"error":"invalid_client"}"#;
        let err = parse_token_response(StatusCode::UNAUTHORIZED, body).unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert!(!err.is_permanent());
    }

    #[test]
    fn non_json_error_body_does_not_echo() {
        let err = parse_token_response(StatusCode::BAD_GATEWAY, "<html>upstream</html>").unwrap_err();
        assert_eq!(err.to_string(), "provider rejected request: HTTP 502 Bad Gateway");
    }

    #[test]
    fn malformed_success_body_is_rejection() {
        let err = parse_token_response(StatusCode::OK, r#"{"token":"x"}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
    }

    #[test]
    fn huge_expires_in_is_rejection() {
        for secs in ["10000000000000", "9223372036854775807", "-9223372036854775808"] {
            let body = format!(r#"{{"access_token":"ya29.new","expires_in":{secs}}}"#);
            let err = parse_token_response(StatusCode::OK, &body).unwrap_err();
            assert_eq!(
                err.to_string(),
                "provider rejected request: expires_in out of range"
            );
        }
    }

    #[test]
    fn malformed_body_does_not_echo_token() {
        let body = r#"{"access_token":"ya29.leaked","scope":["not","a","string"]}"#;
        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert!(!err.to_string().contains("ya29.leaked"));
    }

    #[test]
    fn stored_token_uri_wins() {
        let client = OAuthProviderClient::new(OAuthProviderConfig::google("id", "secret")).unwrap();
        assert_eq!(client.token_endpoint(&request()).unwrap().as_str(), GOOGLE_TOKEN_URL);

        let mut custom = request();
        custom.token_uri = Some("https://login.example.com/oauth/token".to_string());
        assert_eq!(
            client.token_endpoint(&custom).unwrap().as_str(),
            "https://login.example.com/oauth/token"
        );

        custom.token_uri = Some("not a url".to_string());
        assert!(client.token_endpoint(&custom).is_err());
    }

    #[test]
    fn invalid_config_url_rejected() {
        let config = OAuthProviderConfig {
            token_url: "::".to_string(),
            revoke_url: None,
            client_id: None,
            client_secret: None,
        };
        assert!(OAuthProviderClient::new(config).is_err());
    }

    #[tokio::test]
    async fn revoke_without_endpoint_is_noop() {
        let client = OAuthProviderClient::new(OAuthProviderConfig {
            token_url: GOOGLE_TOKEN_URL.to_string(),
            revoke_url: None,
            client_id: None,
            client_secret: None,
        })
        .unwrap();
        client.revoke("ya29.a0").await.unwrap();
    }

    #[test]
    fn config_debug_is_redacted() {
        let config = OAuthProviderConfig::google("id", "top-secret");
        assert!(!format!("{config:?}").contains("top-secret"));
    }
}
