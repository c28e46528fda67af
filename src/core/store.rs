//! JSON persistence for queue and schedule state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use super::message::QueuedMessage;
use crate::error::Result;

/// Serialized queue state.
///
/// `pending` lists messages that were in flight first, then the pending
/// sequence in FIFO order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct QueueSnapshot {
    pub next_id: u64,
    #[serde(default)]
    pub pending: Vec<QueuedMessage>,
    #[serde(default)]
    pub failed: Vec<QueuedMessage>,
}

/// A single JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, `None` if it does not exist yet.
    pub fn load(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let value = serde_json::from_str(&content)?;
        tracing::debug!("Loaded {}", self.path.display());
        Ok(Some(value))
    }

    /// Write the document through a temp file and rename it into place.
    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!("Saved {}", self.path.display());
        Ok(())
    }
}
