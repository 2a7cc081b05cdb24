//! SQLite handle for one game session.
//!
//! A session has a single writer (the turn orchestrator) and occasional
//! readers from service commands. [`Database`] keeps one connection behind a
//! mutex and runs every closure on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Pragmas applied to every connection, in order.
const SESSION_PRAGMAS: &[(&str, &str)] = &[
    // Readers never wait on the writer.
    ("journal_mode", "WAL"),
    // With WAL this can drop the last commit on power loss but never
    // corrupts the file.
    ("synchronous", "NORMAL"),
    ("foreign_keys", "ON"),
    ("temp_store", "MEMORY"),
    // KiB when negative.
    ("cache_size", "-8000"),
    ("busy_timeout", "5000"),
];

/// Shared connection to a session file (or an in-memory session).
///
/// Calls are serialized by the mutex; a sequence of calls is not atomic.
/// Use [`Database::execute_mut`] with a transaction when it has to be.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the session file at `path`. Blocks on file I/O.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening session database");
        Self::configure(Connection::open(path)?, Some(path.to_path_buf()))
    }

    /// [`Database::open`] on the blocking pool.
    pub async fn open_async(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::open(&path)).await?
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory session database");
        Self::configure(Connection::open_in_memory()?, None)
    }

    /// Backing file; `None` for in-memory sessions.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with shared access to the connection.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await?
    }

    /// Run `f` with exclusive access, so it can open a transaction.
    /// Returning before `commit` rolls everything back.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await?
    }

    fn configure(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        for (name, value) in SESSION_PRAGMAS {
            conn.execute_batch(&format!("PRAGMA {name} = {value};"))?;
        }
        debug!(pragmas = SESSION_PRAGMAS.len(), "session pragmas applied");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::TaskJoin(format!("connection mutex poisoned: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pragma(db: &Database, name: &'static str) -> i64 {
        db.execute(move |conn| Ok(conn.query_row(&format!("PRAGMA {name}"), [], |r| r.get(0))?))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn in_memory_session_has_foreign_keys() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
        assert_eq!(pragma(&db, "foreign_keys").await, 1);
        assert_eq!(pragma(&db, "cache_size").await, -8000);
    }

    #[tokio::test]
    async fn file_session_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("memory.db");
        let db = Database::open_async(&file).await.unwrap();
        assert_eq!(db.path(), Some(file.as_path()));

        let mode: String = db
            .execute(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.execute(|conn| Ok(conn.execute_batch("CREATE TABLE turns (turn INTEGER PRIMARY KEY)")?))
            .await
            .unwrap();

        let result: StoreResult<()> = db
            .execute_mut(|conn| {
                let tx = conn.transaction()?;
                tx.execute("INSERT INTO turns (turn) VALUES (0)", [])?;
                Err(StoreError::InvalidArgument("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT count(*) FROM turns", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
