//! Scheduled messages.

pub mod scheduler;

pub use scheduler::{ScheduleManager, ScheduledMessage};
