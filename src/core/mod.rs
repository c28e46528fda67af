//! Core module - the offline delivery queue.
//!
//! - Message records and lifecycle states
//! - Lock-free pending sequence with a locked failed set
//! - Retry cap and backoff policy
//! - JSON persistence and lock files

pub mod lock;
pub mod message;
pub mod queue;
pub mod retry;
pub mod store;

pub use message::{MessageId, MessageKind, MessageState, NewMessage, QueuedMessage};
pub use queue::{OfflineQueue, QueueStatus};
pub use retry::RetryPolicy;
pub use store::{JsonStore, QueueSnapshot};
