//! The process-wide vault service.
//!
//! [`VaultService::bootstrap`] runs once at startup: it unseals (or creates)
//! the master key, derives the content key and opens the record store. The
//! resulting service is handed to callers by `Arc`; nothing in this crate
//! keeps it in a global.

use std::sync::Arc;

use crate::config::VaultConfig;
use crate::engine::DataEncryptionEngine;
use crate::error::Result;
use crate::keyblob::{FileKeyBlobStore, KeyBlobStore};
use crate::master_key::MasterKeyManager;
use crate::store::CredentialStore;

/// Unsealed encryption engine plus the record store it protects.
pub struct VaultService {
    engine: Arc<DataEncryptionEngine>,
    store: Arc<CredentialStore>,
    config: VaultConfig,
}

impl VaultService {
    /// Build the service from a config and the operator password, using the
    /// file blob store at `config.key_blob_path`.
    pub fn bootstrap(config: VaultConfig, password: &[u8]) -> Result<Self> {
        let blobs = FileKeyBlobStore::new(&config.key_blob_path);
        let store = CredentialStore::open(&config.database_path)?;
        Self::bootstrap_with(config, &blobs, store, password)
    }

    /// Build the service from explicit blob and record stores.
    pub fn bootstrap_with(
        config: VaultConfig,
        blobs: &dyn KeyBlobStore,
        store: CredentialStore,
        password: &[u8],
    ) -> Result<Self> {
        config.validate()?;

        let manager = MasterKeyManager::with_iterations(config.pbkdf2_iterations)?;
        let master_key = manager.load_or_initialize(blobs, password)?;
        let engine = DataEncryptionEngine::new(&master_key)?;

        tracing::info!(
            database = %config.database_path.display(),
            iterations = manager.iterations(),
            "vault service ready"
        );

        Ok(Self {
            engine: Arc::new(engine),
            store: Arc::new(store),
            config,
        })
    }

    /// Assemble a service from parts that were built elsewhere.
    pub fn from_parts(
        engine: Arc<DataEncryptionEngine>,
        store: Arc<CredentialStore>,
        config: VaultConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<DataEncryptionEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }
}
