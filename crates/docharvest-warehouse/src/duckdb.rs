//! `DuckDB` connection pool management.
//!
//! `DuckDB` holds a file lock for as long as a database instance is open, so several
//! worker processes sharing one database file must not keep connections idle. With
//! `max_idle == 0` every connection is closed when its guard drops, and opening retries
//! while another process holds the lock.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ::duckdb::{Config, Connection};

/// Access mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only access.
    ReadOnly,
    /// Read-write access.
    ReadWrite,
}

/// Pool sizing and lock-contention behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connections kept open between operations, per access mode.
    pub max_idle: usize,
    /// Extra open attempts made while another process holds the file lock.
    pub open_retries: u32,
    /// Pause between open attempts.
    pub open_retry_delay: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: 4,
            open_retries: 20,
            open_retry_delay: Duration::from_millis(250),
        }
    }
}

struct PoolState {
    read_only: Vec<Connection>,
    read_write: Vec<Connection>,
}

struct PoolInner {
    db_path: PathBuf,
    settings: PoolSettings,
    state: Mutex<PoolState>,
}

/// A connection pool manager for `DuckDB` connections.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                settings,
                state: Mutex::new(PoolState {
                    read_only: Vec::new(),
                    read_write: Vec::new(),
                }),
            }),
        }
    }

    /// Acquire a connection, reusing an idle one when available.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened within the retry budget.
    ///
    /// # Panics
    /// Panics if the connection pool mutex is poisoned.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        let idle = match mode {
            AccessMode::ReadOnly => state.read_only.pop(),
            AccessMode::ReadWrite => state.read_write.pop(),
        };
        drop(state);

        let connection = match idle {
            Some(connection) => connection,
            None => open_with_retry(self.inner.db_path.as_path(), mode, self.inner.settings)?,
        };

        Ok(PooledConnection {
            mode,
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }
}

/// A pooled connection that returns to the pool (or closes) when dropped.
pub struct PooledConnection {
    mode: AccessMode,
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let max_idle = self.pool.settings.max_idle;
        if max_idle == 0 {
            return;
        }

        let mut state = self
            .pool
            .state
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        let idle = match self.mode {
            AccessMode::ReadOnly => &mut state.read_only,
            AccessMode::ReadWrite => &mut state.read_write,
        };
        if idle.len() < max_idle {
            idle.push(connection);
        }
    }
}

fn open_with_retry(
    path: &Path,
    mode: AccessMode,
    settings: PoolSettings,
) -> Result<Connection, ::duckdb::Error> {
    let mut attempt = 0;
    loop {
        match open_connection(path, mode) {
            Ok(connection) => return Ok(connection),
            Err(error) if is_lock_contention(&error) && attempt < settings.open_retries => {
                attempt += 1;
                tracing::debug!(
                    path = %path.display(),
                    attempt,
                    "database file locked by another process; retrying open"
                );
                thread::sleep(settings.open_retry_delay);
            }
            Err(error) => return Err(error),
        }
    }
}

fn open_connection(path: &Path, mode: AccessMode) -> Result<Connection, ::duckdb::Error> {
    let connection = match mode {
        AccessMode::ReadWrite => Connection::open(path)?,
        AccessMode::ReadOnly => {
            let config = Config::default().access_mode(::duckdb::AccessMode::ReadOnly)?;
            Connection::open_with_flags(path, config)?
        }
    };
    connection.execute_batch("PRAGMA disable_progress_bar;")?;
    Ok(connection)
}

fn is_lock_contention(error: &::duckdb::Error) -> bool {
    let message = error.to_string();
    message.contains("Could not set lock") || message.contains("Conflicting lock")
}
