//! Credential storage.
//!
//! The `users` table maps a unique username to its password digest. Digests
//! are only ever replaced whole; a failed write leaves the previous digest in
//! place.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Where password digests live. Implementations must make `upsert_digest`
/// atomic per username.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored digest, or `None` for an unknown username.
    fn lookup_digest(&self, username: &str) -> Result<Option<String>, StoreError>;

    /// Replaces the digest for `username`, creating the row if needed.
    /// Returns the number of rows written.
    fn upsert_digest(&self, username: &str, digest: &str) -> Result<usize, StoreError>;
}

/// SQLite-backed credential store.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY NOT NULL,
                password TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn lookup_digest(&self, username: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let digest = conn
            .query_row(
                "SELECT password FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(digest)
    }

    fn upsert_digest(&self, username: &str, digest: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        // IMMEDIATE takes the write lock up front so two writers cannot both
        // see zero updated rows and race to insert.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut affected = tx.execute(
            "UPDATE users SET password = ?1 WHERE username = ?2",
            params![digest, username],
        )?;
        if affected == 0 {
            affected = tx.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                params![username, digest],
            )?;
        }
        tx.commit()?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::{CredentialStore, SqliteCredentialStore};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn unknown_user_has_no_digest() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        assert_eq!(store.lookup_digest("ghost").unwrap(), None);
    }

    #[test]
    fn upsert_inserts_then_replaces() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        assert_eq!(store.upsert_digest("alice", "digest-one").unwrap(), 1);
        assert_eq!(
            store.lookup_digest("alice").unwrap().as_deref(),
            Some("digest-one")
        );

        assert_eq!(store.upsert_digest("alice", "digest-two").unwrap(), 1);
        assert_eq!(
            store.lookup_digest("alice").unwrap().as_deref(),
            Some("digest-two")
        );
    }

    #[test]
    fn usernames_are_independent() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.upsert_digest("alice", "a").unwrap();
        store.upsert_digest("bob", "b").unwrap();
        assert_eq!(store.lookup_digest("alice").unwrap().as_deref(), Some("a"));
        assert_eq!(store.lookup_digest("bob").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn concurrent_upserts_across_connections_never_duplicate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.db");
        SqliteCredentialStore::open(&path).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                thread::spawn(move || {
                    let store = SqliteCredentialStore::open(&path).unwrap();
                    store
                        .upsert_digest("carol", &format!("digest-{i}"))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = 'carol'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn store_is_shareable_between_threads() {
        let store = Arc::new(SqliteCredentialStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.upsert_digest(&format!("user{i}"), "d").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..4 {
            assert!(store.lookup_digest(&format!("user{i}")).unwrap().is_some());
        }
    }
}
