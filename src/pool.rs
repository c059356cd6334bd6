use crate::{error::StorageError, sqlite::SqliteConfig};
use rusqlite::Connection;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Bounded pool of SQLite connections.
///
/// A permit is taken before a connection is handed out, so at most
/// `SqliteConfig::pool_size()` connections are ever open. Connections are
/// opened lazily after the first and go back to the idle list when the
/// [`PooledConnection`] guard drops.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: SqliteConfig,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    max_connections: usize,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionPool {
    /// Open the first connection, apply the schema and keep it idle.
    pub fn open(config: SqliteConfig) -> Result<Self, StorageError> {
        let first = config.open_connection()?;
        config.initialize_schema(&first)?;

        let max_connections = config.pool_size();
        info!(
            db_path = %config.db_path.display(),
            max_connections,
            "sqlite connection pool opened"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(vec![first]),
                permits: Arc::new(Semaphore::new(max_connections)),
                max_connections,
            }),
        })
    }

    /// Wait for a free slot and check out a connection.
    pub async fn acquire(&self) -> Result<PooledConnection, StorageError> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::PoolClosed)?;

        let reused = self.inner.idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!("opening additional sqlite connection");
                self.inner.config.open_connection()?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Stop handing out connections and drop the idle ones. Checked-out
    /// connections are closed when their guards drop.
    pub fn close(&self) {
        self.inner.permits.close();
        let drained = std::mem::take(&mut *self.inner.idle());
        info!(closed = drained.len(), "sqlite connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let in_use = self.inner.max_connections - self.inner.permits.available_permits();
        PoolStats {
            idle: self.inner.idle().len(),
            in_use: if self.is_closed() { 0 } else { in_use },
            max_connections: self.inner.max_connections,
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("db_path", &self.inner.config.db_path)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub max_connections: usize,
}

/// RAII guard for a checked-out connection
///
/// Returns the connection to the pool when dropped, unless the pool has been
/// closed in the meantime.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("connection already returned to pool")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("connection already returned to pool")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.pool.permits.is_closed() {
                self.pool.idle().push(conn);
            }
        }
    }
}
