//! Offline outbox library root.

pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod schedule;
pub mod state;

pub use cache::{CacheStats, MessageCache};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{MessageId, NewMessage, OfflineQueue, QueueStatus, QueuedMessage, RetryPolicy};
pub use delivery::{DeliveryReport, DeliveryWorker, Transport};
pub use error::{Error, Result};
pub use schedule::{ScheduleManager, ScheduledMessage};
pub use state::StateDir;
