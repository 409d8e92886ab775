//! Operator configuration file.
//!
//! ```toml
//! [vault]
//! database_path = "/var/lib/credvault/credvault.db"
//! key_blob_path = "/var/lib/credvault/encryption_key.key"
//!
//! [providers.google]
//! token_url = "https://oauth2.googleapis.com/token"
//! revoke_url = "https://oauth2.googleapis.com/revoke"
//! client_id = "..."
//! client_secret = "..."
//! ```
//!
//! When no `google` provider is configured, one is built from
//! `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` if both are set.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use credvault_lifecycle::{OAuthProviderClient, OAuthProviderConfig, ProviderRegistry};
use credvault_vault::VaultConfig;

#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, OAuthProviderConfig>,
}

impl CliConfig {
    /// Load the file at `path` (or defaults), then apply environment
    /// overrides resolved through `lookup`.
    pub fn load(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::parse(&content)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.vault = config.vault.with_overrides(&lookup)?;

        if !config.providers.contains_key("google") {
            if let (Some(id), Some(secret)) = (lookup("GOOGLE_CLIENT_ID"), lookup("GOOGLE_CLIENT_SECRET")) {
                config
                    .providers
                    .insert("google".to_string(), OAuthProviderConfig::google(id, secret));
            }
        }

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.vault.validate()?;
        Ok(config)
    }

    /// Build a client for every configured provider.
    pub fn provider_registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for (name, provider) in &self.providers {
            let client = OAuthProviderClient::new(provider.clone())
                .with_context(|| format!("invalid endpoint URL for provider {name}"))?;
            registry.register(name.clone(), Arc::new(client));
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parses_vault_and_providers() {
        let config = CliConfig::parse(
            r#"
            [vault]
            database_path = "/srv/vault.db"
            refresh_timeout_secs = 4

            [providers.github]
            token_url = "https://github.com/login/oauth/access_token"
            client_id = "gh-client"
            "#,
        )
        .unwrap();

        assert_eq!(config.vault.database_path, Path::new("/srv/vault.db"));
        assert_eq!(config.vault.refresh_timeout_secs, 4);
        assert!(config.providers["github"].revoke_url.is_none());

        let registry = config.provider_registry().unwrap();
        assert_eq!(registry.providers(), vec!["github"]);
    }

    #[test]
    fn google_from_environment() {
        let env = |key: &str| match key {
            "GOOGLE_CLIENT_ID" => Some("id".to_string()),
            "GOOGLE_CLIENT_SECRET" => Some("secret".to_string()),
            _ => None,
        };
        let config = CliConfig::load(None, env).unwrap();
        assert_eq!(
            config.providers["google"].token_url,
            "https://oauth2.googleapis.com/token"
        );

        let config = CliConfig::load(None, no_env).unwrap();
        assert!(config.providers.is_empty());
    }

    #[test]
    fn invalid_vault_section_rejected() {
        assert!(CliConfig::parse("[vault]\npbkdf2_iterations = 10\n").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("credvault-no-such-config.toml");
        assert!(CliConfig::load(Some(&path), no_env).is_err());
    }
}
