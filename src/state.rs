//! On-disk state under the outbox home directory.

use std::path::{Path, PathBuf};

use crate::core::lock::{acquire_lock, with_lock, LockHandle};
use crate::core::{JsonStore, OfflineQueue, QueueSnapshot, RetryPolicy};
use crate::error::Result;
use crate::schedule::ScheduleManager;

/// `queue.json` and `schedules.json`, guarded by one lock.
#[derive(Debug, Clone)]
pub struct StateDir {
    home: PathBuf,
    queue: JsonStore<QueueSnapshot>,
    schedules: JsonStore<ScheduleManager>,
}

impl StateDir {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            queue: JsonStore::new(home.join("queue.json")),
            schedules: JsonStore::new(home.join("schedules.json")),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Restore the queue, or start an empty one.
    pub fn load_queue(&self, policy: RetryPolicy) -> Result<OfflineQueue> {
        Ok(match self.queue.load()? {
            Some(snapshot) => OfflineQueue::from_snapshot(snapshot, policy),
            None => OfflineQueue::new(policy),
        })
    }

    pub fn save_queue(&self, queue: &OfflineQueue) -> Result<()> {
        self.queue.save(&queue.snapshot())
    }

    pub fn load_schedules(&self) -> Result<ScheduleManager> {
        Ok(self.schedules.load()?.unwrap_or_default())
    }

    pub fn save_schedules(&self, schedules: &ScheduleManager) -> Result<()> {
        self.schedules.save(schedules)
    }

    /// Hold the state lock until the handle drops.
    pub fn lock(&self) -> Result<LockHandle> {
        acquire_lock(self.queue.path())
    }

    /// Run `f` holding the state lock.
    pub fn with_lock<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        with_lock(self.queue.path(), f)
    }
}
