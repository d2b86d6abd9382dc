//! SQLite persistence for sponsors, contracts, patients, jobs and audit
//! events. Every repository function takes a shared [`Database`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod contract_repo;
pub mod error;
pub mod event_repo;
pub mod job_repo;
pub mod migrations;
pub mod output_repo;
pub mod patient_repo;

pub use error::DatabaseError;

/// Shared connection to the export database. Worker threads, the polling
/// loop and the shutdown hook all go through the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the export database at `path`, creating its directory, and
    /// brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::Directory {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        // Readers (status polls) must not block the workers' writes.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self::migrated(conn)?;

        log::info!("Export database ready at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        f(&self.conn.lock())
    }

    /// Runs `f` in an exclusive transaction, committed only if `f` succeeds.
    /// Status compare-and-set goes through here.
    pub fn with_exclusive_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Returns the canonical database path: `~/.claims-export/data/claims-export.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| {
        h.join(".claims-export")
            .join("data")
            .join("claims-export.db")
    })
}

pub(crate) fn decode<T, E>(column: &'static str, value: &str, parsed: Result<T, E>) -> Result<T, DatabaseError> {
    parsed.map_err(|_| DatabaseError::Decode {
        column,
        value: value.to_string(),
    })
}
