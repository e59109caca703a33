//! Generic keyed blob storage.
//!
//! One logical namespace per record family, opaque BLOB values. The
//! create/set split exists so that "already exists" is detected exactly once
//! by the engine's primary-key constraint, never re-checked by callers.

use chrono::Utc;
use rusqlite::OptionalExtension;

use vmclone_shared::{VmcloneError, VmcloneResult};

use super::{Database, db_err};

/// Keyed blob store over [`Database`].
#[derive(Clone)]
pub struct KvStore {
    db: Database,
}

impl KvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a record with this (namespace, key) is present;
    /// the collision is reported by the engine's primary-key constraint.
    pub fn create(&self, namespace: &str, key: &str, value: &[u8]) -> VmcloneResult<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        let result = conn.execute(
            "INSERT INTO kv (namespace, key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![namespace, key, value, now],
        );

        match result {
            Ok(_) => {
                tracing::debug!(namespace = namespace, key = key, "created record");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(VmcloneError::AlreadyExists(format!(
                    "{}/{}",
                    namespace, key
                )))
            }
            Err(e) => Err(VmcloneError::Database(e.to_string())),
        }
    }

    /// Insert or overwrite a record.
    pub fn set(&self, namespace: &str, key: &str, value: &[u8]) -> VmcloneResult<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        db_err!(conn.execute(
            "INSERT INTO kv (namespace, key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (namespace, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![namespace, key, value, now],
        ))?;

        tracing::debug!(namespace = namespace, key = key, "set record");
        Ok(())
    }

    /// Fetch a record's value.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists for this (namespace, key).
    pub fn get(&self, namespace: &str, key: &str) -> VmcloneResult<Vec<u8>> {
        let conn = self.db.conn();

        let value: Option<Vec<u8>> = db_err!(
            conn.query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
                |row| row.get(0),
            )
            .optional()
        )?;

        value.ok_or_else(|| VmcloneError::NotFound(format!("{}/{}", namespace, key)))
    }

    /// Delete a record.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists; callers that want idempotent removal
    /// branch on the kind explicitly.
    pub fn remove(&self, namespace: &str, key: &str) -> VmcloneResult<()> {
        let conn = self.db.conn();

        let deleted = db_err!(conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            rusqlite::params![namespace, key],
        ))?;

        if deleted == 0 {
            return Err(VmcloneError::NotFound(format!("{}/{}", namespace, key)));
        }

        tracing::debug!(namespace = namespace, key = key, "removed record");
        Ok(())
    }
}
