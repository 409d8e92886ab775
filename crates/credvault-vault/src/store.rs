//! SQLite-backed persistence for [`CredentialRecord`]s.
//!
//! The store only ever sees ciphertext: the two sensitive columns hold
//! [`EncryptedPayload`](crate::engine::EncryptedPayload) strings produced by
//! the engine, never a token.
//!
//! # Schema
//!
//! ```text
//! integrations(
//!     id                    TEXT PRIMARY KEY,
//!     owner_id              TEXT NOT NULL,
//!     integration_type      TEXT NOT NULL,
//!     provider              TEXT NOT NULL,
//!     encrypted_auth_tokens TEXT,      -- base64 AEAD blob or NULL
//!     encrypted_config_data TEXT,      -- base64 AEAD blob or NULL
//!     is_active             INTEGER NOT NULL,
//!     token_expires_at      INTEGER,   -- unix seconds, UTC
//!     created_at            INTEGER NOT NULL,
//!     updated_at            INTEGER NOT NULL,
//!     last_sync_at          INTEGER
//! )
//! ```
//!
//! A partial unique index on `(owner_id, integration_type) WHERE is_active = 1`
//! makes a second active record for the same pair a constraint violation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Result, VaultError};
use crate::record::CredentialRecord;

const SELECT_COLUMNS: &str = "SELECT id, owner_id, integration_type, provider,
        encrypted_auth_tokens, encrypted_config_data, is_active,
        token_expires_at, created_at, updated_at, last_sync_at
 FROM integrations";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Credential record store backed by SQLite.
///
/// The connection sits behind a `Mutex`; each operation holds the lock for a
/// single statement, so the store can be shared across tasks via `Arc`.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening credential database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        tracing::debug!("running credential schema migrations");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS integrations (
                id                    TEXT PRIMARY KEY,
                owner_id              TEXT NOT NULL,
                integration_type      TEXT NOT NULL,
                provider              TEXT NOT NULL,
                encrypted_auth_tokens TEXT,
                encrypted_config_data TEXT,
                is_active             INTEGER NOT NULL DEFAULT 1,
                token_expires_at      INTEGER,
                created_at            INTEGER NOT NULL,
                updated_at            INTEGER NOT NULL,
                last_sync_at          INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_integrations_one_active
                ON integrations(owner_id, integration_type) WHERE is_active = 1;
            CREATE INDEX IF NOT EXISTS idx_integrations_owner
                ON integrations(owner_id, integration_type);",
        )
        .map_err(|e| VaultError::MigrationFailed {
            reason: e.to_string(),
        })?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VaultError::Internal(format!("connection lock poisoned: {e}")))
    }

    // -- Queries ------------------------------------------------------------

    /// The active record for `(owner_id, integration_type)`, if any.
    pub fn find_active(
        &self,
        owner_id: &str,
        integration_type: &str,
    ) -> Result<Option<CredentialRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE owner_id = ?1 AND integration_type = ?2 AND is_active = 1"),
                params![owner_id, integration_type],
                RecordRow::from_row,
            )
            .optional()?;
        Ok(row.map(RecordRow::into_record))
    }

    /// The most recently updated record for the pair, active or not.
    pub fn find_latest(
        &self,
        owner_id: &str,
        integration_type: &str,
    ) -> Result<Option<CredentialRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE owner_id = ?1 AND integration_type = ?2
                     ORDER BY is_active DESC, updated_at DESC, id DESC LIMIT 1"
                ),
                params![owner_id, integration_type],
                RecordRow::from_row,
            )
            .optional()?;
        Ok(row.map(RecordRow::into_record))
    }

    /// Fetch a record by id.
    pub fn get(&self, id: &str) -> Result<CredentialRecord> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record)
            .ok_or_else(|| VaultError::RecordNotFound { id: id.to_string() })
    }

    /// Every record holding at least one encrypted column, oldest first.
    pub fn list_encrypted(&self) -> Result<Vec<CredentialRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE encrypted_auth_tokens IS NOT NULL OR encrypted_config_data IS NOT NULL
             ORDER BY created_at, id"
        ))?;

        let rows = stmt.query_map([], RecordRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record());
        }

        tracing::debug!(count = records.len(), "listed encrypted records");
        Ok(records)
    }

    // -- Writes -------------------------------------------------------------

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ActiveRecordConflict`] if the record is active
    /// and another active record exists for the same pair.
    pub fn insert(&self, record: &CredentialRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO integrations (id, owner_id, integration_type, provider,
                encrypted_auth_tokens, encrypted_config_data, is_active,
                token_expires_at, created_at, updated_at, last_sync_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.owner_id,
                record.integration_type,
                record.provider,
                record.encrypted_auth_tokens().map(|p| p.as_str()),
                record.encrypted_config_data().map(|p| p.as_str()),
                record.is_active(),
                record.token_expires_at().map(|t| t.timestamp()),
                record.created_at.timestamp(),
                record.updated_at.timestamp(),
                record.last_sync_at.map(|t| t.timestamp()),
            ],
        )
        .map_err(|e| conflict_or(e, record))?;

        tracing::debug!(record_id = %record.id, "inserted credential record");
        Ok(())
    }

    /// Overwrite every mutable column of an existing record.
    pub fn update(&self, record: &CredentialRecord) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE integrations SET provider = ?1, encrypted_auth_tokens = ?2,
                    encrypted_config_data = ?3, is_active = ?4, token_expires_at = ?5,
                    updated_at = ?6, last_sync_at = ?7
                 WHERE id = ?8",
                params![
                    record.provider,
                    record.encrypted_auth_tokens().map(|p| p.as_str()),
                    record.encrypted_config_data().map(|p| p.as_str()),
                    record.is_active(),
                    record.token_expires_at().map(|t| t.timestamp()),
                    record.updated_at.timestamp(),
                    record.last_sync_at.map(|t| t.timestamp()),
                    record.id,
                ],
            )
            .map_err(|e| conflict_or(e, record))?;

        if rows == 0 {
            return Err(VaultError::RecordNotFound {
                id: record.id.clone(),
            });
        }
        Ok(())
    }

    /// Write refreshed tokens and expiry, but only while the record is still
    /// active.
    ///
    /// Returns `false` if the record was deactivated in the meantime; the
    /// refreshed grant is then discarded rather than reviving the record.
    pub fn update_active_tokens(&self, record: &CredentialRecord) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE integrations SET encrypted_auth_tokens = ?1, token_expires_at = ?2,
                updated_at = ?3, last_sync_at = ?4
             WHERE id = ?5 AND is_active = 1",
            params![
                record.encrypted_auth_tokens().map(|p| p.as_str()),
                record.token_expires_at().map(|t| t.timestamp()),
                record.updated_at.timestamp(),
                record.last_sync_at.map(|t| t.timestamp()),
                record.id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Write the config blob of an active record. Returns `false` if the
    /// record is no longer active.
    pub fn update_active_config(&self, record: &CredentialRecord) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE integrations SET encrypted_config_data = ?1, updated_at = ?2
             WHERE id = ?3 AND is_active = 1",
            params![
                record.encrypted_config_data().map(|p| p.as_str()),
                record.updated_at.timestamp(),
                record.id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Soft-deactivate a record. Returns `false` if it was not active.
    pub fn deactivate(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE integrations SET is_active = 0, updated_at = ?1
             WHERE id = ?2 AND is_active = 1",
            params![Utc::now().timestamp(), id],
        )?;

        if rows > 0 {
            tracing::debug!(record_id = id, "deactivated credential record");
        }
        Ok(rows > 0)
    }
}

/// Map a unique-index violation to [`VaultError::ActiveRecordConflict`].
fn conflict_or(err: rusqlite::Error, record: &CredentialRecord) -> VaultError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            VaultError::ActiveRecordConflict {
                owner_id: record.owner_id.clone(),
                integration_type: record.integration_type.clone(),
            }
        }
        _ => VaultError::Database(err),
    }
}

// ---------------------------------------------------------------------------
// Internal row type (avoid leaking rusqlite details)
// ---------------------------------------------------------------------------

struct RecordRow {
    id: String,
    owner_id: String,
    integration_type: String,
    provider: String,
    encrypted_auth_tokens: Option<String>,
    encrypted_config_data: Option<String>,
    is_active: bool,
    token_expires_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    last_sync_at: Option<i64>,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            integration_type: row.get(2)?,
            provider: row.get(3)?,
            encrypted_auth_tokens: row.get(4)?,
            encrypted_config_data: row.get(5)?,
            is_active: row.get(6)?,
            token_expires_at: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            last_sync_at: row.get(10)?,
        })
    }

    fn into_record(self) -> CredentialRecord {
        CredentialRecord::from_columns(
            self.id,
            self.owner_id,
            self.integration_type,
            self.provider,
            self.encrypted_auth_tokens,
            self.encrypted_config_data,
            self.is_active,
            self.token_expires_at.and_then(from_unix),
            from_unix(self.created_at).unwrap_or_default(),
            from_unix(self.updated_at).unwrap_or_default(),
            self.last_sync_at.and_then(from_unix),
        )
    }
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DataEncryptionEngine;
    use crate::master_key::MasterKey;
    use crate::record::AuthTokens;

    fn engine() -> DataEncryptionEngine {
        DataEncryptionEngine::new(&MasterKey::generate().unwrap()).unwrap()
    }

    fn record(engine: &DataEncryptionEngine, owner: &str) -> CredentialRecord {
        CredentialRecord::from_grant(
            engine,
            owner,
            "google_workspace",
            "google",
            &AuthTokens::new("t1", ["cal"]).with_refresh_token("r1"),
            Some(Utc::now() + chrono::Duration::hours(1)),
        )
        .unwrap()
    }

    #[test]
    fn insert_and_find_active() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        let rec = record(&engine, "u1");
        store.insert(&rec).unwrap();

        let found = store.find_active("u1", "google_workspace").unwrap().unwrap();
        assert_eq!(found.id, rec.id);
        assert_eq!(found.encrypted_auth_tokens(), rec.encrypted_auth_tokens());
        assert_eq!(
            found.token_expires_at().map(|t| t.timestamp()),
            rec.token_expires_at().map(|t| t.timestamp())
        );
        assert_eq!(
            found.get_auth_tokens(&engine).unwrap().unwrap().token,
            "t1"
        );

        assert!(store.find_active("u2", "google_workspace").unwrap().is_none());
    }

    #[test]
    fn second_active_record_conflicts() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        store.insert(&record(&engine, "u1")).unwrap();

        let result = store.insert(&record(&engine, "u1"));
        assert!(matches!(
            result,
            Err(VaultError::ActiveRecordConflict { .. })
        ));
    }

    #[test]
    fn inactive_records_do_not_conflict() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        let first = record(&engine, "u1");
        store.insert(&first).unwrap();
        assert!(store.deactivate(&first.id).unwrap());
        assert!(!store.deactivate(&first.id).unwrap());

        store.insert(&record(&engine, "u1")).unwrap();
        assert!(store.find_active("u1", "google_workspace").unwrap().is_some());
    }

    #[test]
    fn update_active_tokens_skips_inactive() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        let mut rec = record(&engine, "u1");
        store.insert(&rec).unwrap();
        store.deactivate(&rec.id).unwrap();

        rec.apply_grant(&engine, &AuthTokens::new("t2", ["cal"]), None)
            .unwrap();
        assert!(!store.update_active_tokens(&rec).unwrap());

        let stored = store.get(&rec.id).unwrap();
        assert!(!stored.is_active());
        assert_eq!(
            stored.get_auth_tokens(&engine).unwrap().unwrap().token,
            "t1"
        );
    }

    #[test]
    fn find_latest_returns_inactive_record() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        let rec = record(&engine, "u1");
        store.insert(&rec).unwrap();
        store.deactivate(&rec.id).unwrap();

        assert!(store.find_active("u1", "google_workspace").unwrap().is_none());
        let latest = store.find_latest("u1", "google_workspace").unwrap().unwrap();
        assert_eq!(latest.id, rec.id);
        assert!(!latest.is_active());
    }

    #[test]
    fn update_missing_record_errors() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        let result = store.update(&record(&engine, "u1"));
        assert!(matches!(result, Err(VaultError::RecordNotFound { .. })));
    }

    #[test]
    fn list_encrypted_returns_all_rows() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        store.insert(&record(&engine, "u1")).unwrap();
        store.insert(&record(&engine, "u2")).unwrap();

        assert_eq!(store.list_encrypted().unwrap().len(), 2);
    }

    #[test]
    fn sensitive_columns_hold_no_plaintext() {
        let store = CredentialStore::open_in_memory().unwrap();
        let engine = engine();
        let tokens = AuthTokens::new("ya29.access-token", ["https://www.googleapis.com/auth/calendar"])
            .with_refresh_token("1//refresh-token");
        let rec = CredentialRecord::from_grant(&engine, "u1", "google_workspace", "google", &tokens, None)
            .unwrap();
        store.insert(&rec).unwrap();

        let conn = store.lock().unwrap();
        let stored: String = conn
            .query_row("SELECT encrypted_auth_tokens FROM integrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(!stored.contains("ya29.access-token"));
        assert!(!stored.contains("1//refresh-token"));
        assert!(!stored.contains("googleapis"));
        assert!(!stored.contains('"'));
    }
}
