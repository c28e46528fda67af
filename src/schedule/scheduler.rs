//! Messages held back until a given time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{NewMessage, OfflineQueue, QueuedMessage};
use crate::error::{Error, Result};

/// A message to send at `scheduled_at`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScheduledMessage {
    pub id: u64,

    pub address: String,

    pub body: String,

    /// Conversation the message belongs to.
    #[serde(default)]
    pub thread_id: Option<String>,

    pub scheduled_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    /// Handed to the offline queue.
    #[serde(default)]
    pub delivered: bool,
}

impl ScheduledMessage {
    pub fn is_ready_to_send(&self, now: DateTime<Utc>) -> bool {
        !self.delivered && now >= self.scheduled_at
    }

    pub fn is_scheduled_for_future(&self, now: DateTime<Utc>) -> bool {
        !self.delivered && now < self.scheduled_at
    }
}

/// Schedule manager.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScheduleManager {
    #[serde(default = "first_id")]
    next_id: u64,
    #[serde(default)]
    messages: Vec<ScheduledMessage>,
}

fn first_id() -> u64 {
    1
}

impl ScheduleManager {
    /// Create a new schedule manager.
    pub fn new() -> Self {
        Self {
            next_id: first_id(),
            messages: Vec::new(),
        }
    }

    /// Schedule a message. The time must lie in the future.
    pub fn schedule(
        &mut self,
        address: &str,
        body: &str,
        at: DateTime<Utc>,
        thread_id: Option<String>,
    ) -> Result<u64> {
        let now = Utc::now();
        if at <= now {
            return Err(Error::Schedule(format!(
                "Cannot schedule message for past time {}",
                at.to_rfc3339()
            )));
        }

        let id = self.next_id;
        self.next_id += 1;

        self.messages.push(ScheduledMessage {
            id,
            address: address.to_string(),
            body: body.to_string(),
            thread_id,
            scheduled_at: at,
            created_at: now,
            delivered: false,
        });

        tracing::debug!("Scheduled message {} for {}", id, at.to_rfc3339());
        Ok(id)
    }

    /// Remove a scheduled message.
    pub fn cancel(&mut self, id: u64) -> bool {
        let Some(idx) = self.messages.iter().position(|m| m.id == id) else {
            tracing::warn!("Scheduled message {} not found", id);
            return false;
        };

        self.messages.remove(idx);
        tracing::debug!("Cancelled scheduled message {}", id);
        true
    }

    /// Change an undelivered scheduled message.
    pub fn update(&mut self, id: u64, address: &str, body: &str, at: DateTime<Utc>) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.id == id && !m.delivered)
        else {
            return false;
        };

        message.address = address.to_string();
        message.body = body.to_string();
        message.scheduled_at = at;

        tracing::debug!("Updated scheduled message {}", id);
        true
    }

    /// Get all scheduled messages.
    pub fn list(&self) -> &[ScheduledMessage] {
        &self.messages
    }

    /// Messages not yet handed to the queue.
    pub fn pending(&self) -> Vec<&ScheduledMessage> {
        self.messages.iter().filter(|m| !m.delivered).collect()
    }

    /// Messages due at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<&ScheduledMessage> {
        self.messages
            .iter()
            .filter(|m| m.is_ready_to_send(now))
            .collect()
    }

    /// Enqueue every due message into `queue`, earliest first, and mark it delivered.
    pub fn process_ready(&mut self, now: DateTime<Utc>, queue: &OfflineQueue) -> Vec<QueuedMessage> {
        let mut ready: Vec<&mut ScheduledMessage> = self
            .messages
            .iter_mut()
            .filter(|m| m.is_ready_to_send(now))
            .collect();
        ready.sort_by_key(|m| (m.scheduled_at, m.id));

        let mut enqueued = Vec::with_capacity(ready.len());
        for scheduled in ready {
            let mut new = NewMessage::new(scheduled.address.as_str(), scheduled.body.as_str());
            if let Some(thread_id) = &scheduled.thread_id {
                new = new.with_thread(thread_id.as_str());
            }

            let queued = queue.enqueue(new);
            scheduled.delivered = true;
            tracing::info!(
                "Scheduled message {} queued as {} for {}",
                scheduled.id,
                queued.id,
                queued.address
            );
            enqueued.push(queued);
        }

        enqueued
    }

    /// Drop delivered entries.
    pub fn clear_delivered(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.delivered);
        before - self.messages.len()
    }
}

impl Default for ScheduleManager {
    fn default() -> Self {
        Self::new()
    }
}
