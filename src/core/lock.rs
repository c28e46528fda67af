//! Exclusive lock files guarding on-disk state between processes.
//!
//! A lock file holds `<pid> <token>`. A lock is taken over only when its holder
//! process is gone, or, where liveness cannot be checked, when the file has not
//! been touched for [`LOCK_TIMEOUT`].

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};

/// Locks older than this are considered abandoned when the holder cannot be checked.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Whether `pid` is running, `None` when that cannot be told.
#[cfg(target_os = "linux")]
fn holder_alive(pid: u32) -> Option<bool> {
    let proc_root = Path::new("/proc");
    if !proc_root.is_dir() {
        return None;
    }
    Some(proc_root.join(pid.to_string()).exists())
}

#[cfg(not(target_os = "linux"))]
fn holder_alive(_pid: u32) -> Option<bool> {
    None
}

fn holder_pid(content: &str) -> Option<u32> {
    content.split_whitespace().next()?.parse().ok()
}

fn is_stale(lock_path: &Path) -> Result<bool> {
    let content = std::fs::read_to_string(lock_path).unwrap_or_default();
    if let Some(alive) = holder_pid(&content).and_then(holder_alive) {
        return Ok(!alive);
    }

    let modified = lock_path.metadata()?.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Ok(age >= LOCK_TIMEOUT)
}

fn create_lock_file(lock_path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
}

/// Acquire an exclusive lock on a file.
pub fn acquire_lock(path: &Path) -> Result<LockHandle> {
    let lock_path = lock_path_for(path);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut lock_file = match create_lock_file(&lock_path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if !is_stale(&lock_path)? {
                return Err(Error::Lock(format!(
                    "Lock file is held: {}",
                    lock_path.display()
                )));
            }

            tracing::warn!("Removing stale lock: {}", lock_path.display());
            std::fs::remove_file(&lock_path).ok();
            create_lock_file(&lock_path).map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::Lock(format!(
                    "Lock file is held: {}",
                    lock_path.display()
                )),
                _ => e.into(),
            })?
        }
        Err(e) => return Err(e.into()),
    };

    let owner = format!(
        "{} {}\n",
        std::process::id(),
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    );
    lock_file.write_all(owner.as_bytes())?;
    lock_file.sync_all()?;

    tracing::debug!("Acquired lock: {}", lock_path.display());

    Ok(LockHandle { lock_path, owner })
}

/// Lock handle - releases lock when dropped.
#[derive(Debug)]
pub struct LockHandle {
    lock_path: PathBuf,
    owner: String,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.lock_path) {
            Ok(content) if content == self.owner => {}
            Ok(_) => {
                tracing::warn!(
                    "Lock {} was taken over, leaving it in place",
                    self.lock_path.display()
                );
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to read lock {}: {}", self.lock_path.display(), e);
                return;
            }
        }

        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            tracing::warn!("Failed to release lock {}: {}", self.lock_path.display(), e);
        } else {
            tracing::debug!("Released lock: {}", self.lock_path.display());
        }
    }
}

/// Acquire lock, execute function, release lock.
pub fn with_lock<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let _lock = acquire_lock(path)?;
    f()
}
