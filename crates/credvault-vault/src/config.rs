//! Vault configuration.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. Built-in defaults.
//! 2. The `[vault]` section of an optional TOML file.
//! 3. `CREDVAULT_*` environment variables.
//!
//! The encryption password is never part of the file. It is read from
//! [`PASSWORD_ENV`] at boot, and its absence is a fatal
//! [`VaultError::Configuration`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{Result, VaultError};

/// Environment variable holding the master key password.
pub const PASSWORD_ENV: &str = "CREDVAULT_ENCRYPTION_PASSWORD";

const DATABASE_ENV: &str = "CREDVAULT_DATABASE";
const KEY_FILE_ENV: &str = "CREDVAULT_KEY_FILE";
const ITERATIONS_ENV: &str = "CREDVAULT_PBKDF2_ITERATIONS";
const REFRESH_TIMEOUT_ENV: &str = "CREDVAULT_REFRESH_TIMEOUT_SECS";

/// Runtime settings for the vault service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// SQLite database holding the credential records.
    pub database_path: PathBuf,
    /// Location of the sealed master key blob.
    pub key_blob_path: PathBuf,
    /// PBKDF2 iteration count for the wrapping key. Fixed per deployment,
    /// since the blob does not record it.
    pub pbkdf2_iterations: u32,
    /// Upper bound on a single provider refresh call.
    pub refresh_timeout_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/credvault.db"),
            key_blob_path: PathBuf::from("data/encryption_key.key"),
            pbkdf2_iterations: crypto::MIN_PBKDF2_ITERATIONS,
            refresh_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    vault: VaultConfig,
}

impl VaultConfig {
    /// Parse the `[vault]` section of a TOML document. A document without
    /// the section yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| VaultError::Configuration {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        file.vault.validate()?;
        Ok(file.vault)
    }

    /// Load from `path` if given, otherwise return the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|e| VaultError::Configuration {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;

        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "loaded vault configuration");
        Ok(config)
    }

    /// Apply `CREDVAULT_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `CREDVAULT_*` overrides resolved through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(DATABASE_ENV) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(KEY_FILE_ENV) {
            self.key_blob_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ITERATIONS_ENV) {
            self.pbkdf2_iterations = parse_number(ITERATIONS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(REFRESH_TIMEOUT_ENV) {
            self.refresh_timeout_secs = parse_number(REFRESH_TIMEOUT_ENV, &raw)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings the vault cannot run with.
    pub fn validate(&self) -> Result<()> {
        crypto::checked_iterations(self.pbkdf2_iterations)?;

        if self.refresh_timeout_secs == 0 {
            return Err(VaultError::Configuration {
                reason: "refresh_timeout_secs must be greater than zero".into(),
            });
        }
        if self.database_path.as_os_str().is_empty() || self.key_blob_path.as_os_str().is_empty() {
            return Err(VaultError::Configuration {
                reason: "database_path and key_blob_path must be set".into(),
            });
        }
        Ok(())
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Read the encryption password from the process environment.
    pub fn password_from_env() -> Result<Zeroizing<String>> {
        Self::password_from(|key| std::env::var(key).ok())
    }

    /// Read the encryption password through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] if [`PASSWORD_ENV`] is unset or
    /// empty. There is no fallback.
    pub fn password_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Zeroizing<String>> {
        match lookup(PASSWORD_ENV) {
            Some(password) if !password.is_empty() => Ok(Zeroizing::new(password)),
            _ => Err(VaultError::Configuration {
                reason: format!("{PASSWORD_ENV} is not set"),
            }),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| VaultError::Configuration {
        reason: format!("{key} must be a non-negative integer, got {raw:?}"),
    })
}
