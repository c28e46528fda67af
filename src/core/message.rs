//! Outbound message records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Queue-local message identifier. Assigned at enqueue time, starting at 1.
pub type MessageId = u64;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Transport kind.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Sms,
    Mms,
}

/// Where a live message currently sits.
///
/// `state_of` only ever reports `Pending`, `InFlight` or `Failed`.
/// `Delivered` names the target of a send report in
/// [`Error::InvalidTransition`](crate::error::Error::InvalidTransition); the
/// queue stops tracking a message once it is delivered.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Waiting in the pending sequence.
    Pending,
    /// Handed to a sender and not yet reported back.
    InFlight,
    /// Parked in the failed set.
    Failed,
    /// Reported sent. Never stored.
    Delivered,
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageState::Pending => "pending",
            MessageState::InFlight => "in-flight",
            MessageState::Failed => "failed",
            MessageState::Delivered => "delivered",
        };
        f.write_str(name)
    }
}

/// A message that has not been delivered yet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QueuedMessage {
    pub id: MessageId,

    /// Destination (e.g. a phone number)
    pub address: String,

    pub body: String,

    /// Creation time, ms since epoch
    pub timestamp: i64,

    /// Number of times the message went back to pending after a failure
    pub retry_count: u32,

    /// True while the message sits in the failed set
    pub failed: bool,

    /// Conversation this message belongs to
    #[serde(default)]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub kind: MessageKind,

    /// Attachment URIs
    #[serde(default)]
    pub attachments: Vec<String>,

    /// Reason recorded by the most recent failure
    #[serde(default)]
    pub last_error: Option<String>,

    /// Last time a sender took this message, ms since epoch
    #[serde(default)]
    pub last_attempt_at: Option<i64>,
}

impl QueuedMessage {
    pub(crate) fn from_new(id: MessageId, new: NewMessage) -> Self {
        let kind = if new.attachments.is_empty() {
            MessageKind::Sms
        } else {
            MessageKind::Mms
        };

        Self {
            id,
            address: new.address,
            body: new.body,
            timestamp: now_millis(),
            retry_count: 0,
            failed: false,
            thread_id: new.thread_id,
            kind,
            attachments: new.attachments,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Key used to group messages of one conversation.
    pub fn conversation_key(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.address)
    }
}

/// Builder for a message about to be enqueued.
#[derive(Clone, Debug, Default)]
pub struct NewMessage {
    pub address: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub attachments: Vec<String>,
}

impl NewMessage {
    pub fn new(address: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            body: body.into(),
            thread_id: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_attachment(mut self, uri: impl Into<String>) -> Self {
        self.attachments.push(uri.into());
        self
    }
}
