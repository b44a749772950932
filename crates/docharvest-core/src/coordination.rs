//! Advisory per-instance lock tokens.
//!
//! A token marks that a worker is running for an instance index. Tokens are hints for
//! operators, not a correctness mechanism: acquiring over an existing token logs the
//! previous holder and takes the slot anyway, and every coordination failure is
//! reported as a warning. Duplicate work is prevented by the dedup gate and the store.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::UtcDateTime;

/// Marker describing the worker holding an instance slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub instance_index: u32,
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: UtcDateTime,
}

impl LockToken {
    /// Token for the current process.
    pub fn for_current_process(instance_index: u32) -> Self {
        Self {
            instance_index,
            pid: std::process::id(),
            hostname: current_hostname(),
            acquired_at: UtcDateTime::now(),
        }
    }
}

/// A token found in place when acquiring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleLock {
    /// Previous holder, when the token could be read.
    pub holder: Option<LockToken>,
    /// Whether the previous holder's process still runs; `None` when it cannot be told.
    pub holder_alive: Option<bool>,
}

/// Result of acquiring an instance slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub token: LockToken,
    /// Set when a token already existed for the slot.
    pub previous: Option<StaleLock>,
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("lock file i/o failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock token serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pluggable coordination backend.
pub trait Coordinator: Send + Sync {
    /// Claim the slot for `instance_index`, overwriting any token already there.
    fn acquire(&self, instance_index: u32) -> Result<Acquisition, CoordinationError>;

    /// Remove `token` if it still owns its slot.
    fn release(&self, token: &LockToken) -> Result<(), CoordinationError>;
}

/// Lock tokens stored as JSON files, one per instance index, in a shared directory.
#[derive(Debug, Clone)]
pub struct FileCoordinator {
    dir: PathBuf,
}

impl FileCoordinator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn lock_path(&self, instance_index: u32) -> PathBuf {
        self.dir.join(format!("instance-{instance_index}.lock"))
    }

    fn read_token(path: &Path) -> Result<Option<Result<LockToken, serde_json::Error>>, CoordinationError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CoordinationError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl Coordinator for FileCoordinator {
    fn acquire(&self, instance_index: u32) -> Result<Acquisition, CoordinationError> {
        fs::create_dir_all(&self.dir).map_err(|source| CoordinationError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.lock_path(instance_index);
        let previous = Self::read_token(&path)?.map(|parsed| match parsed {
            Ok(holder) => {
                let holder_alive = process_alive(&holder);
                StaleLock {
                    holder: Some(holder),
                    holder_alive,
                }
            }
            Err(_) => StaleLock {
                holder: None,
                holder_alive: None,
            },
        });

        let token = LockToken::for_current_process(instance_index);
        let body = serde_json::to_string_pretty(&token)?;

        // Write then rename so a concurrent reader never sees a half-written token.
        let staging = path.with_extension(format!("lock.{}", token.pid));
        fs::write(&staging, body).map_err(|source| CoordinationError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| CoordinationError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Acquisition { token, previous })
    }

    fn release(&self, token: &LockToken) -> Result<(), CoordinationError> {
        let path = self.lock_path(token.instance_index);
        match Self::read_token(&path)? {
            Some(Ok(current)) if current != *token => {
                tracing::warn!(
                    instance = token.instance_index,
                    holder_pid = current.pid,
                    holder_host = %current.hostname,
                    "lock token was taken over by another worker; leaving it in place"
                );
                Ok(())
            }
            Some(_) => fs::remove_file(&path).map_err(|source| CoordinationError::Io {
                path: path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }
}

/// In-process coordinator with the same takeover semantics as [`FileCoordinator`].
#[derive(Debug, Default)]
pub struct MemoryCoordinator {
    tokens: Mutex<HashMap<u32, LockToken>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// Panics if the coordinator mutex is poisoned.
    pub fn holder(&self, instance_index: u32) -> Option<LockToken> {
        let tokens = self
            .tokens
            .lock()
            .expect("coordinator lock is not poisoned");
        tokens.get(&instance_index).cloned()
    }

    /// Plant a token as if a previous worker had crashed while holding it.
    ///
    /// # Panics
    /// Panics if the coordinator mutex is poisoned.
    pub fn plant(&self, token: LockToken) {
        let mut tokens = self
            .tokens
            .lock()
            .expect("coordinator lock is not poisoned");
        tokens.insert(token.instance_index, token);
    }
}

impl Coordinator for MemoryCoordinator {
    fn acquire(&self, instance_index: u32) -> Result<Acquisition, CoordinationError> {
        let mut tokens = self
            .tokens
            .lock()
            .expect("coordinator lock is not poisoned");
        let token = LockToken::for_current_process(instance_index);
        let previous = tokens
            .insert(instance_index, token.clone())
            .map(|holder| StaleLock {
                holder: Some(holder),
                holder_alive: None,
            });
        Ok(Acquisition { token, previous })
    }

    fn release(&self, token: &LockToken) -> Result<(), CoordinationError> {
        let mut tokens = self
            .tokens
            .lock()
            .expect("coordinator lock is not poisoned");
        if tokens.get(&token.instance_index) == Some(token) {
            tokens.remove(&token.instance_index);
        }
        Ok(())
    }
}

/// Holds an instance slot and releases it when dropped.
///
/// Coordination failures never stop the worker: they are logged and the guard simply
/// holds nothing.
pub struct LockGuard {
    coordinator: Arc<dyn Coordinator>,
    token: Option<LockToken>,
}

impl LockGuard {
    /// Acquire the slot for `instance_index`, logging stale tokens and failures.
    pub fn acquire(coordinator: Arc<dyn Coordinator>, instance_index: u32) -> Self {
        let token = match coordinator.acquire(instance_index) {
            Ok(acquisition) => {
                if let Some(previous) = acquisition.previous.as_ref() {
                    log_stale(instance_index, previous);
                }
                tracing::debug!(instance = instance_index, "instance slot acquired");
                Some(acquisition.token)
            }
            Err(error) => {
                tracing::warn!(
                    instance = instance_index,
                    error = %error,
                    "could not record instance lock; continuing without it"
                );
                None
            }
        };
        Self { coordinator, token }
    }

    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    /// Release now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        match self.coordinator.release(&token) {
            Ok(()) => tracing::debug!(instance = token.instance_index, "instance slot released"),
            Err(error) => tracing::warn!(
                instance = token.instance_index,
                error = %error,
                "could not release instance lock"
            ),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn log_stale(instance_index: u32, previous: &StaleLock) {
    match previous.holder.as_ref() {
        Some(holder) => tracing::warn!(
            instance = instance_index,
            holder_pid = holder.pid,
            holder_host = %holder.hostname,
            holder_since = %holder.acquired_at,
            holder_alive = ?previous.holder_alive,
            "instance slot already held; previous worker crashed or is still running, taking over"
        ),
        None => tracing::warn!(
            instance = instance_index,
            "unreadable lock token found for instance slot; overwriting"
        ),
    }
}

/// Liveness of a token's process, when it ran on this host and `/proc` is available.
fn process_alive(token: &LockToken) -> Option<bool> {
    if token.hostname != current_hostname() {
        return None;
    }
    let proc_root = Path::new("/proc");
    if !proc_root.is_dir() {
        return None;
    }
    Some(proc_root.join(token.pid.to_string()).exists())
}

fn current_hostname() -> String {
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_owned();
        }
    }
    fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| fs::read_to_string("/etc/hostname"))
        .map(|name| name.trim().to_owned())
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| String::from("unknown"))
}
