//! Bounded LRU cache of recent messages per conversation.
//!
//! Constructed explicitly and handed to whoever needs it; there is no global
//! instance.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::core::QueuedMessage;
use crate::error::{Error, Result};

/// Hit and eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Inner {
    entries: LruCache<String, Vec<QueuedMessage>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn insert(&mut self, key: String, messages: Vec<QueuedMessage>) {
        if let Some((old_key, _)) = self.entries.push(key.clone(), messages) {
            if old_key != key {
                self.evictions += 1;
                tracing::debug!("Evicted cached conversation {}", old_key);
            }
        }
    }
}

pub struct MessageCache {
    inner: Mutex<Inner>,
    max_per_entry: usize,
}

impl MessageCache {
    /// `capacity` conversations, each holding at most `max_per_entry` messages.
    pub fn new(capacity: usize, max_per_entry: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::Config("cache capacity must be at least 1".to_string()))?;
        if max_per_entry == 0 {
            return Err(Error::Config(
                "cache entries must hold at least 1 message".to_string(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_per_entry,
        })
    }

    /// Copy of the cached messages for `key`, oldest first.
    pub fn get(&self, key: &str) -> Option<Vec<QueuedMessage>> {
        let mut inner = self.inner.lock();
        let cached = inner.entries.get(key).cloned();
        match cached {
            Some(messages) => {
                inner.hits += 1;
                Some(messages)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Replace the cached messages for `key`. Keeps only the newest
    /// `max_per_entry` of them.
    pub fn put(&self, key: impl Into<String>, mut messages: Vec<QueuedMessage>) {
        if messages.len() > self.max_per_entry {
            messages.drain(..messages.len() - self.max_per_entry);
        }
        self.inner.lock().insert(key.into(), messages);
    }

    /// Append one message to its conversation.
    pub fn record(&self, message: &QueuedMessage) {
        let key = message.conversation_key().to_string();
        let mut inner = self.inner.lock();

        if let Some(messages) = inner.entries.get_mut(&key) {
            messages.push(message.clone());
            if messages.len() > self.max_per_entry {
                messages.remove(0);
            }
            return;
        }

        inner.insert(key, vec![message.clone()]);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
        }
    }
}
