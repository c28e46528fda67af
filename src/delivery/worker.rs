//! Delivery worker draining the offline queue.

use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::cache::MessageCache;
use crate::config::DeliverySettings;
use crate::core::message::now_millis;
use crate::core::{MessageState, OfflineQueue, QueuedMessage};
use crate::error::{Error, Result};
use crate::schedule::ScheduleManager;

use super::transport::Transport;

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Scheduled messages moved into the queue
    pub scheduled: usize,
    /// Failed messages requeued after their backoff
    pub retried: usize,
    pub sent: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, {} failed, {} retried, {} from schedule",
            self.sent, self.failed, self.retried, self.scheduled
        )
    }
}

/// Result of one send attempt.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: QueuedMessage,
    /// Failure reason, `None` when the message went out
    pub error: Option<String>,
}

/// Record send outcomes in `queue`.
///
/// `queue` may be a fresh copy loaded after the batch was claimed, in which case
/// the claimed messages read as pending and are claimed again first. Outcomes
/// for messages the queue no longer tracks are skipped.
pub fn settle(
    queue: &OfflineQueue,
    outcomes: Vec<SendOutcome>,
    report: &mut DeliveryReport,
) -> Result<()> {
    for outcome in outcomes {
        let id = outcome.message.id;
        let message = match queue.state_of(id) {
            Some(MessageState::InFlight) => outcome.message,
            Some(MessageState::Pending) => queue.claim(id)?,
            state => {
                tracing::warn!(
                    "Dropping send outcome for message {} ({})",
                    id,
                    state.map_or("gone".to_string(), |s| s.to_string())
                );
                continue;
            }
        };

        match outcome.error {
            None => {
                queue.mark_message_sent(message)?;
                report.sent += 1;
            }
            Some(error) => {
                queue.mark_message_failed_with_error(message, error)?;
                report.failed += 1;
            }
        }
    }

    Ok(())
}

/// Delivery worker.
pub struct DeliveryWorker {
    queue: Arc<OfflineQueue>,
    transport: Arc<dyn Transport>,
    cache: Arc<MessageCache>,
    schedules: Option<Arc<Mutex<ScheduleManager>>>,
    settings: DeliverySettings,
    running: Arc<RwLock<bool>>,
}

impl DeliveryWorker {
    /// Create a new delivery worker.
    pub fn new(
        queue: Arc<OfflineQueue>,
        transport: Arc<dyn Transport>,
        cache: Arc<MessageCache>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            queue,
            transport,
            cache,
            schedules: None,
            settings,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Also release scheduled messages as they fall due.
    pub fn with_schedules(mut self, schedules: Arc<Mutex<ScheduleManager>>) -> Self {
        self.schedules = Some(schedules);
        self
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Recently delivered messages of a conversation.
    pub fn recent(&self, conversation: &str) -> Option<Vec<QueuedMessage>> {
        self.cache.get(conversation)
    }

    /// Release due schedules, requeue failures whose backoff elapsed, and take
    /// up to `batch_size` messages off the queue.
    pub fn claim_batch(&self) -> (DeliveryReport, Vec<QueuedMessage>) {
        let mut report = DeliveryReport::default();

        if let Some(schedules) = &self.schedules {
            report.scheduled = schedules.lock().process_ready(Utc::now(), &self.queue).len();
        }

        if self.settings.auto_retry {
            report.retried = self.queue.retry_ready_messages(now_millis());
        }

        let batch = std::iter::from_fn(|| self.queue.get_next_message())
            .take(self.settings.batch_size)
            .collect();

        (report, batch)
    }

    /// Send each message in order. Leaves queue state alone.
    pub async fn send_batch(&self, batch: Vec<QueuedMessage>) -> Vec<SendOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());

        for message in batch {
            let error = match self.transport.send(&message).await {
                Ok(()) => {
                    self.cache.record(&message);
                    None
                }
                Err(e) => Some(e.to_string()),
            };
            outcomes.push(SendOutcome { message, error });
        }

        outcomes
    }

    /// Run a single pass.
    pub async fn run_once(&self) -> Result<DeliveryReport> {
        let (mut report, batch) = self.claim_batch();
        let outcomes = self.send_batch(batch).await;
        settle(&self.queue, outcomes, &mut report)?;
        Ok(report)
    }

    /// Start the worker loop. Returns after [`stop`](Self::stop).
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(Error::Other("Delivery worker already running".to_string()));
            }
            *running = true;
        }

        tracing::info!(
            "Delivery worker started ({} transport)",
            self.transport.name()
        );

        loop {
            if !*self.running.read().await {
                tracing::info!("Delivery worker stopping");
                break;
            }

            match self.run_once().await {
                Ok(report) if report.is_empty() => {}
                Ok(report) => tracing::info!("Delivery pass: {}", report),
                Err(e) => tracing::error!("Delivery pass failed: {}", e),
            }

            sleep(self.settings.poll_interval()).await;
        }

        Ok(())
    }

    /// Stop the worker.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Delivery worker stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
