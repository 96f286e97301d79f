// ABOUTME: Per-environment attempt lock for mutual exclusion.
// ABOUTME: Atomic file creation with holder info in the state directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::Environment;

/// Information about who holds an attempt lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Environment being deployed.
    pub environment: Environment,
}

impl LockInfo {
    fn new(environment: Environment) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            environment,
        }
    }

    /// A lock older than an hour belongs to a dead attempt and may be broken.
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.started_at;
        age.num_hours() >= 1
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("held by {holder} (pid {pid}) since {started_at}")]
    Held {
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

/// A held per-environment lock. No attempt for the same environment may run
/// while another is rolling out, verifying, or rolling back; the lock spans
/// the whole attempt and is released on every exit path.
#[derive(Debug)]
pub struct AttemptLock {
    path: PathBuf,
    released: bool,
}

impl AttemptLock {
    pub fn path_for(state_dir: &Path, environment: Environment) -> PathBuf {
        state_dir.join(format!("{environment}.lock"))
    }

    /// Acquire the lock via atomic create-new. A stale lock (dead attempt)
    /// is broken with a warning and acquisition retried once.
    pub fn acquire(state_dir: &Path, environment: Environment) -> Result<Self, LockError> {
        std::fs::create_dir_all(state_dir)?;
        let path = Self::path_for(state_dir, environment);

        match Self::try_create(&path, environment)? {
            true => Ok(Self {
                path,
                released: false,
            }),
            false => {
                let existing = Self::read_info(&path);

                match existing {
                    Some(info) if !info.is_stale() => Err(LockError::Held {
                        holder: info.holder,
                        pid: info.pid,
                        started_at: info.started_at,
                    }),
                    Some(info) => {
                        tracing::warn!(
                            "breaking stale lock held by {} (pid {}) since {}",
                            info.holder,
                            info.pid,
                            info.started_at
                        );
                        Self::break_and_retry(&path, environment)
                    }
                    None => {
                        tracing::warn!("lock info unreadable, breaking lock");
                        Self::break_and_retry(&path, environment)
                    }
                }
            }
        }
    }

    fn break_and_retry(path: &Path, environment: Environment) -> Result<Self, LockError> {
        let _ = std::fs::remove_file(path);

        if Self::try_create(path, environment)? {
            Ok(Self {
                path: path.to_path_buf(),
                released: false,
            })
        } else {
            // Another process won the race during the break.
            match Self::read_info(path) {
                Some(info) => Err(LockError::Held {
                    holder: info.holder,
                    pid: info.pid,
                    started_at: info.started_at,
                }),
                None => Err(LockError::Io(std::io::Error::other(
                    "lock re-acquired by another process during break",
                ))),
            }
        }
    }

    /// Atomic create-if-not-exists. Returns false when the file already exists.
    fn try_create(path: &Path, environment: Environment) -> Result<bool, LockError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let info = LockInfo::new(environment);
                let json = serde_json::to_string(&info)
                    .map_err(|e| LockError::Io(std::io::Error::other(e)))?;
                file.write_all(json.as_bytes())?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    fn read_info(path: &Path) -> Option<LockInfo> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Release the lock explicitly. Drop also releases as a backstop for
    /// early-return and panic paths.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Drop for AttemptLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
