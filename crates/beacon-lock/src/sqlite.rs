use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::{LockError, Result};
use crate::service::LockService;

/// Lock store backed by a SQLite table.
///
/// Every process that opens the same database file takes part in the same
/// exclusion domain. Each call runs on the blocking pool so a slow disk never
/// stalls the scheduler's tick task.
#[derive(Clone)]
pub struct SqliteLockService {
    conn: Arc<Mutex<Connection>>,
    owner: String,
}

impl SqliteLockService {
    /// Open (or create) the lock database at `path`.
    pub fn open(path: impl AsRef<Path>, owner: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!(path = %path.as_ref().display(), "opened sqlite lock store");
        Self::new(conn, owner)
    }

    pub fn new(conn: Connection, owner: impl Into<String>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            owner: owner.into(),
        })
    }

    /// A handle on the same connection acting as a different owner.
    pub fn node(&self, owner: impl Into<String>) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            owner: owner.into(),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let owner = self.owner.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("lock store connection poisoned");
            f(&conn, &owner)
        })
        .await
        .map_err(|e| LockError::Join(e.to_string()))?
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl LockService for SqliteLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn, owner| {
            let now = now_ms();
            // Insert, or take over a row whose expiry has passed. A live row is
            // left untouched and reports zero changes.
            let n = conn.execute(
                "INSERT INTO schedule_locks (key, owner, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE
                   SET owner = excluded.owner, expires_at = excluded.expires_at
                   WHERE schedule_locks.expires_at <= ?4",
                rusqlite::params![key, owner, now.saturating_add(ttl_ms(ttl)), now],
            )?;
            debug!(%key, %owner, acquired = n == 1, "sqlite lock acquire");
            Ok(n == 1)
        })
        .await
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn, owner| {
            let now = now_ms();
            let n = conn.execute(
                "UPDATE schedule_locks SET expires_at = ?1
                 WHERE key = ?2 AND owner = ?3 AND expires_at > ?4",
                rusqlite::params![now.saturating_add(ttl_ms(ttl)), key, owner, now],
            )?;
            Ok(n == 1)
        })
        .await
    }

    async fn release(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn, owner| {
            conn.execute(
                "DELETE FROM schedule_locks WHERE key = ?1 AND owner = ?2",
                rusqlite::params![key, owner],
            )?;
            Ok(())
        })
        .await
    }
}
