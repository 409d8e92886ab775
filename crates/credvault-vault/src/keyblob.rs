//! Persistent locations for the sealed master key blob.
//!
//! The blob is written exactly once per deployment. [`KeyBlobStore`]
//! abstracts over where it lives so a file, a secret-manager entry or an
//! in-memory slot can back it:
//!
//! - [`FileKeyBlobStore`]: raw bytes at a fixed path, mode 0600 on Unix.
//! - [`MemoryKeyBlobStore`]: process-local, for tests and embedders that
//!   fetch the blob from elsewhere.
//!
//! Only sealed bytes pass through this layer. Nothing here sees the
//! password or the unsealed master key.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, VaultError};
use crate::master_key::MasterKeyBlob;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over where the sealed master key blob is persisted.
///
/// Implementations must be `Send + Sync` so the service can be built on
/// any thread.
pub trait KeyBlobStore: Send + Sync {
    /// Read the blob, or `None` if none has been written yet.
    fn load(&self) -> Result<Option<MasterKeyBlob>>;

    /// Persist the blob.
    ///
    /// Returns [`VaultError::KeyBlobExists`] if a blob is already present;
    /// a deployment's blob is never silently replaced.
    fn save(&self, blob: &MasterKeyBlob) -> Result<()>;

    /// Check whether a blob has been written.
    fn exists(&self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// File-based store
// ---------------------------------------------------------------------------

/// File-backed blob store.
///
/// The file holds exactly the bytes of [`MasterKeyBlob::to_bytes`]:
/// ```text
/// [16 bytes: PBKDF2 salt]
/// [12 bytes: AES-256-GCM nonce]
/// [remaining: AES-256-GCM ciphertext + 16-byte tag]
/// ```
pub struct FileKeyBlobStore {
    key_file: PathBuf,
}

impl FileKeyBlobStore {
    /// Create a store that keeps the blob at `key_file`.
    ///
    /// Missing parent directories are created on [`save`](KeyBlobStore::save).
    pub fn new(key_file: impl Into<PathBuf>) -> Self {
        Self {
            key_file: key_file.into(),
        }
    }

    /// Default blob location: `<data_dir>/encryption_key.key`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("encryption_key.key")
    }

    /// Path of the blob file.
    pub fn path(&self) -> &Path {
        &self.key_file
    }
}

impl KeyBlobStore for FileKeyBlobStore {
    fn load(&self) -> Result<Option<MasterKeyBlob>> {
        if !self.key_file.exists() {
            return Ok(None);
        }

        let data = std::fs::read(&self.key_file)?;
        let blob = MasterKeyBlob::from_bytes(&data)?;

        tracing::debug!(path = %self.key_file.display(), "read master key blob");
        Ok(Some(blob))
    }

    fn save(&self, blob: &MasterKeyBlob) -> Result<()> {
        if let Some(parent) = self.key_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);

        // Owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.key_file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                VaultError::KeyBlobExists {
                    path: self.key_file.display().to_string(),
                }
            } else {
                VaultError::Io(e)
            }
        })?;

        file.write_all(&blob.to_bytes())?;
        file.sync_all()?;

        tracing::info!(path = %self.key_file.display(), "stored master key blob");
        Ok(())
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.key_file.exists())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local blob store.
#[derive(Default)]
pub struct MemoryKeyBlobStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryKeyBlobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with raw blob bytes (e.g. fetched from a secret
    /// manager).
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            blob: Mutex::new(Some(bytes)),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Vec<u8>>>> {
        self.blob
            .lock()
            .map_err(|e| VaultError::Internal(format!("key blob lock poisoned: {e}")))
    }
}

impl KeyBlobStore for MemoryKeyBlobStore {
    fn load(&self) -> Result<Option<MasterKeyBlob>> {
        self.slot()?
            .as_deref()
            .map(MasterKeyBlob::from_bytes)
            .transpose()
    }

    fn save(&self, blob: &MasterKeyBlob) -> Result<()> {
        let mut slot = self.slot()?;
        if slot.is_some() {
            return Err(VaultError::KeyBlobExists {
                path: "<memory>".into(),
            });
        }
        *slot = Some(blob.to_bytes());
        Ok(())
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.slot()?.is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master_key::{MasterKey, MasterKeyManager};

    fn sealed_blob(password: &[u8]) -> (MasterKey, MasterKeyBlob) {
        MasterKeyManager::new().generate_and_seal(password).unwrap()
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyBlobStore::new(FileKeyBlobStore::default_path(dir.path()));
        let (_key, blob) = sealed_blob(b"pw");

        assert!(!store.exists().unwrap());
        assert!(store.load().unwrap().is_none());

        store.save(&blob).unwrap();
        assert!(store.exists().unwrap());
        assert_eq!(store.load().unwrap(), Some(blob));
    }

    #[test]
    fn file_store_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyBlobStore::new(dir.path().join("nested").join("master.key"));
        let (_k1, first) = sealed_blob(b"pw");
        let (_k2, second) = sealed_blob(b"pw");

        store.save(&first).unwrap();
        let result = store.save(&second);
        assert!(matches!(result, Err(VaultError::KeyBlobExists { .. })));
        assert_eq!(store.load().unwrap(), Some(first));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyBlobStore::new(dir.path().join("master.key"));
        let (_key, blob) = sealed_blob(b"pw");
        store.save(&blob).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupted_file_is_authentication_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let store = FileKeyBlobStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(VaultError::Authentication { .. })
        ));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryKeyBlobStore::new();
        let (_key, blob) = sealed_blob(b"pw");

        store.save(&blob).unwrap();
        assert_eq!(store.load().unwrap(), Some(blob.clone()));
        assert!(store.save(&blob).is_err());

        let preloaded = MemoryKeyBlobStore::with_bytes(blob.to_bytes());
        assert_eq!(preloaded.load().unwrap(), Some(blob));
    }
}
