//! Delivery passes against the on-disk state.
//!
//! The state lock is held while claiming a batch and while settling it, never
//! while the transport runs, so other commands can enqueue during a send.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::cache::MessageCache;
use crate::config::Settings;
use crate::core::lock::LockHandle;
use crate::error::{Error, Result};
use crate::state::StateDir;

use super::transport::Transport;
use super::worker::{settle, DeliveryReport, DeliveryWorker};

const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Wait for the state lock while other commands finish their short updates.
async fn lock_state(state: &StateDir) -> Result<LockHandle> {
    let mut attempts = 1;
    loop {
        match state.lock() {
            Err(Error::Lock(reason)) if attempts < LOCK_ATTEMPTS => {
                tracing::debug!("Waiting for state lock: {}", reason);
                attempts += 1;
                sleep(LOCK_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

/// Claim a batch from disk, send it unlocked, then settle the outcomes into
/// freshly loaded state.
///
/// Claimed messages are saved as pending, so a crash mid-send resends them.
pub async fn run_persisted_pass(
    state: &StateDir,
    settings: &Settings,
    transport: Arc<dyn Transport>,
    cache: Arc<MessageCache>,
) -> Result<DeliveryReport> {
    let policy = settings.queue.retry_policy();

    let (worker, mut report, batch) = {
        let _lock = lock_state(state).await?;
        let queue = Arc::new(state.load_queue(policy.clone())?);
        let schedules = Arc::new(Mutex::new(state.load_schedules()?));

        let worker = DeliveryWorker::new(
            Arc::clone(&queue),
            transport,
            cache,
            settings.delivery.clone(),
        )
        .with_schedules(Arc::clone(&schedules));
        let (report, batch) = worker.claim_batch();

        if !report.is_empty() || !batch.is_empty() {
            state.save_queue(&queue)?;
            state.save_schedules(&schedules.lock())?;
        }
        (worker, report, batch)
    };

    if batch.is_empty() {
        return Ok(report);
    }

    let outcomes = worker.send_batch(batch).await;

    let _lock = lock_state(state).await?;
    let queue = state.load_queue(policy)?;
    settle(&queue, outcomes, &mut report)?;
    state.save_queue(&queue)?;

    Ok(report)
}
