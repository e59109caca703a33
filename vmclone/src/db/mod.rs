//! Database layer for vmclone.
//!
//! Provides SQLite-backed durable storage for template configs:
//! - Generic keyed blob table addressed by (namespace, key)
//! - Create vs set split so "already exists" is enforced by the engine
//!
//! Uses a BLOB value column: the payload is opaque to this layer.

mod kv;
mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use vmclone_shared::{VmcloneError, VmcloneResult};

pub use kv::KvStore;

/// Helper macro to convert rusqlite errors to VmcloneError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| VmcloneError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Domain-specific stores wrap this to
/// provide their APIs (e.g., [`KvStore`]).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> VmcloneResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // SQLite configuration:
        // - WAL mode: better concurrent read performance
        // - FULL sync: fsync after each transaction, maximum durability
        // - Busy timeout: template saves can race host management tools
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=100000;
            "
        ))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Close the database.
    ///
    /// If other handles are still alive the connection closes with the last
    /// of them instead.
    pub fn close(self) -> VmcloneResult<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => mutex
                .into_inner()
                .close()
                .map_err(|(_, e)| VmcloneError::Database(e.to_string())),
            Err(_) => Ok(()),
        }
    }

    fn init_schema(conn: &Connection) -> VmcloneResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                let now = Utc::now().to_rfc3339();
                db_err!(conn.execute(
                    "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![schema::SCHEMA_VERSION, now],
                ))?;
                tracing::info!(
                    "Initialized database schema version {}",
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v < schema::SCHEMA_VERSION => {
                tracing::warn!(
                    "Database schema version {} is older than current {}. Migrations not yet implemented.",
                    v,
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(VmcloneError::Database(format!(
                    "Database schema version {} is newer than supported {}. Please upgrade vmclone.",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}
