//! SQLite persistence layer for the migration target.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and typed insert/query helpers for every table the migration
//! steps write.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, trace};

use crate::errors::DatabaseError;

/// Main database handle wrapping a SQLite connection.
///
/// The connection is opened in WAL mode and uses `PRAGMA foreign_keys = ON`.
/// The inner connection is wrapped in a `Mutex` so that `Database` is
/// `Send + Sync`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the target database.
    ///
    /// Accepts a `sqlite://<path>` URI or a plain path. When `dblog` is set,
    /// every executed statement is traced.
    pub fn open(uri: &str, dblog: bool) -> Result<Self, DatabaseError> {
        let path = uri.strip_prefix("sqlite://").unwrap_or(uri);
        Self::new_inner(Connection::open(Path::new(path))?, dblog)
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn new_inner(mut conn: Connection, dblog: bool) -> Result<Self, DatabaseError> {
        info!("opening target database");
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        if dblog {
            fn trace_sql(sql: &str) {
                trace!(target: "confmigrate::db", "{}", sql);
            }
            conn.trace(Some(trace_sql));
        }

        debug!("target database opened with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing target schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("target schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    ///
    /// Migration steps run as one transaction each: a failed step leaves no
    /// partial rows behind, so a resumed run can safely repeat it.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        self.transaction_with(f)
    }

    /// Like [`transaction`](Self::transaction), for closures with a custom
    /// error type.
    pub fn transaction_with<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(result)
    }

    /// Whether the target already contains migrated data.
    ///
    /// A fresh (non-resumed) run must start against an empty database.
    pub fn has_data(&self) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        for table in ["users", "groups", "categories", "events", "rooms", "reservations"] {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table),
                [],
                |row| row.get(0),
            )?;
            if count > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// After bulk inserts with preserved legacy ids, bump `sqlite_sequence`
    /// so future AUTOINCREMENT ids continue past the migrated maximum.
    pub fn fix_sequences(&self, tables: &[&str]) -> Result<(), DatabaseError> {
        let conn = self.conn();
        for table in tables {
            let max_id: Option<i64> = conn.query_row(
                &format!("SELECT MAX(id) FROM {}", table),
                [],
                |row| row.get(0),
            )?;
            if let Some(max_id) = max_id {
                let updated = conn.execute(
                    "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2 AND seq < ?1",
                    rusqlite::params![max_id, table],
                )?;
                if updated == 0 {
                    conn.execute(
                        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                        rusqlite::params![table, max_id],
                    )?;
                }
                debug!(table, max_id, "sequence adjusted");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database_with_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.db");
        let uri = format!("sqlite://{}", path.display());
        let db = Database::open(&uri, false).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_has_data() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        assert!(!db.has_data().unwrap());

        db.conn()
            .execute(
                "INSERT INTO users (id, first_name, last_name, email) VALUES (1, 'A', 'B', 'a@b.cc')",
                [],
            )
            .unwrap();
        assert!(db.has_data().unwrap());
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO news (title, content, created_at) VALUES ('t', 'c', '2025-01-01')",
                [],
            )?;
            Err(DatabaseError::NotEmpty)
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM news", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_fix_sequences() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.conn()
            .execute(
                "INSERT INTO users (id, first_name, last_name, email) VALUES (500, 'A', 'B', 'a@b.cc')",
                [],
            )
            .unwrap();
        db.fix_sequences(&["users"]).unwrap();

        let seq: i64 = db
            .conn()
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'users'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(seq >= 500);
    }
}
