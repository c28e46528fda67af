//! CLI commands for the outbox using clap.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::sleep;

use crate::cache::MessageCache;
use crate::config::{
    get_home_dir, get_settings_path, load_settings_or_default, save_settings, Settings,
};
use crate::core::{MessageId, NewMessage, OfflineQueue, QueuedMessage};
use crate::delivery::{create_transport, run_persisted_pass, DeliveryWorker, Transport};
use crate::state::StateDir;

/// Offline outbox - queue SMS/MMS while offline and deliver them later.
#[derive(Parser)]
#[command(name = "outbox")]
#[command(version)]
#[command(about = "Offline outbox for SMS/MMS delivery", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write default settings
    Init {
        /// Overwrite existing settings
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Queue a message
    Send {
        /// Destination address
        address: String,

        /// Message text
        body: String,

        /// Conversation id
        #[arg(long)]
        thread: Option<String>,

        /// Attachment URI (repeatable, makes the message an MMS)
        #[arg(long = "attachment")]
        attachments: Vec<String>,
    },

    /// Show queue counters
    Status,

    /// List pending messages
    List,

    /// List failed messages
    Failed,

    /// Move a failed message back to the queue
    Retry {
        /// Message ID
        id: MessageId,
    },

    /// Drop every failed message
    ClearFailed,

    /// Scheduled messages
    #[command(subcommand)]
    Schedule(ScheduleCommand),

    /// Deliver queued messages
    Run {
        /// Run a single delivery pass and exit
        #[arg(long, default_value_t = false)]
        once: bool,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Schedule a message
    Add {
        /// Destination address
        address: String,

        /// Message text
        body: String,

        /// Send time (RFC 3339)
        #[arg(long, conflicts_with = "in_secs")]
        at: Option<String>,

        /// Send after this many seconds
        #[arg(long = "in", value_name = "SECONDS")]
        in_secs: Option<i64>,

        /// Conversation id
        #[arg(long)]
        thread: Option<String>,
    },

    /// List scheduled messages
    List,

    /// Cancel a scheduled message
    Cancel {
        /// Schedule ID
        id: u64,
    },

    /// Change a scheduled message
    Update {
        /// Schedule ID
        id: u64,

        /// Destination address
        address: String,

        /// Message text
        body: String,

        /// New send time (RFC 3339)
        #[arg(long)]
        at: String,
    },
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Init { force } => cmd_init(*force),
            Command::Send {
                address,
                body,
                thread,
                attachments,
            } => cmd_send(address, body, thread.as_deref(), attachments),
            Command::Status => cmd_status(),
            Command::List => cmd_list(),
            Command::Failed => cmd_failed(),
            Command::Retry { id } => cmd_retry(*id),
            Command::ClearFailed => cmd_clear_failed(),
            Command::Schedule(cmd) => cmd_schedule(cmd),
            Command::Run { once } => cmd_run(*once).await,
        }
    }
}

fn open() -> Result<(StateDir, Settings)> {
    let home = get_home_dir()?;
    let settings = load_settings_or_default(&home);
    Ok((StateDir::new(&home), settings))
}

/// Load the queue under the lock, apply `f`, save.
fn update_queue<T>(f: impl FnOnce(&OfflineQueue) -> crate::error::Result<T>) -> Result<T> {
    let (state, settings) = open()?;
    let value = state.with_lock(|| {
        let queue = state.load_queue(settings.queue.retry_policy())?;
        let value = f(&queue)?;
        state.save_queue(&queue)?;
        Ok(value)
    })?;
    Ok(value)
}

fn read_queue<T>(f: impl FnOnce(&OfflineQueue) -> T) -> Result<T> {
    let (state, settings) = open()?;
    let value = state.with_lock(|| {
        let queue = state.load_queue(settings.queue.retry_policy())?;
        Ok(f(&queue))
    })?;
    Ok(value)
}

fn preview(body: &str) -> String {
    body.chars().take(50).collect()
}

fn print_messages(title: &str, messages: &[QueuedMessage]) {
    println!("{} ({}):", title, messages.len());
    for msg in messages {
        println!("  {}: {} -> {}", msg.id, msg.address, preview(&msg.body));
        if msg.retry_count > 0 || msg.last_error.is_some() {
            println!(
                "      retries={} error={}",
                msg.retry_count,
                msg.last_error.as_deref().unwrap_or("-")
            );
        }
    }
}

// Command implementations

fn cmd_init(force: bool) -> Result<()> {
    let home = get_home_dir()?;
    let path = get_settings_path(&home);

    if path.exists() && !force {
        println!("Settings already exist at {}", path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    save_settings(&home, &Settings::default())?;
    println!("Saved settings to {}", path.display());
    Ok(())
}

fn cmd_send(
    address: &str,
    body: &str,
    thread: Option<&str>,
    attachments: &[String],
) -> Result<()> {
    let mut new = NewMessage::new(address, body);
    if let Some(thread) = thread {
        new = new.with_thread(thread);
    }
    for uri in attachments {
        new = new.with_attachment(uri.as_str());
    }

    let msg = update_queue(|queue| Ok(queue.enqueue(new)))?;
    println!("Queued {:?} message {} for {}", msg.kind, msg.id, msg.address);
    Ok(())
}

fn cmd_status() -> Result<()> {
    let (state, _) = open()?;
    let status = read_queue(|queue| queue.status())?;
    let scheduled = state.load_schedules()?.pending().len();

    println!("{}", status);
    println!("  Scheduled: {}", scheduled);
    Ok(())
}

fn cmd_list() -> Result<()> {
    let pending = read_queue(|queue| queue.snapshot().pending)?;
    print_messages("Pending messages", &pending);
    Ok(())
}

fn cmd_failed() -> Result<()> {
    let failed = read_queue(|queue| queue.get_failed_messages())?;
    print_messages("Failed messages", &failed);
    Ok(())
}

fn cmd_retry(id: MessageId) -> Result<()> {
    let msg = update_queue(|queue| queue.try_retry_failed_message(id))?;
    println!("Requeued message {} (retry {})", msg.id, msg.retry_count);
    Ok(())
}

fn cmd_clear_failed() -> Result<()> {
    let cleared = update_queue(|queue| Ok(queue.clear_failed_messages()))?;
    println!("Cleared {} failed messages", cleared);
    Ok(())
}

/// Resolve `--at` / `--in` into a send time.
fn parse_send_time(at: Option<&str>, in_secs: Option<i64>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match (at, in_secs) {
        (Some(at), _) => Ok(DateTime::parse_from_rfc3339(at)
            .with_context(|| format!("Invalid time '{}', expected RFC 3339", at))?
            .with_timezone(&Utc)),
        (None, Some(secs)) => Ok(now + Duration::seconds(secs)),
        (None, None) => bail!("Specify a send time with --at or --in"),
    }
}

fn cmd_schedule(cmd: &ScheduleCommand) -> Result<()> {
    let (state, _) = open()?;

    match cmd {
        ScheduleCommand::Add {
            address,
            body,
            at,
            in_secs,
            thread,
        } => {
            let when = parse_send_time(at.as_deref(), *in_secs, Utc::now())?;
            let id = state.with_lock(|| {
                let mut schedules = state.load_schedules()?;
                let id = schedules.schedule(address, body, when, thread.clone())?;
                state.save_schedules(&schedules)?;
                Ok(id)
            })?;
            println!("Scheduled message {} for {}", id, when.to_rfc3339());
        }
        ScheduleCommand::List => {
            let schedules = state.load_schedules()?;
            let now = Utc::now();
            println!("Scheduled messages ({}):", schedules.list().len());
            for msg in schedules.list() {
                let status = if msg.delivered {
                    "queued"
                } else if msg.is_scheduled_for_future(now) {
                    "waiting"
                } else {
                    "due"
                };
                println!(
                    "  {}: [{}] {} {} -> {}",
                    msg.id,
                    status,
                    msg.scheduled_at.to_rfc3339(),
                    msg.address,
                    preview(&msg.body)
                );
            }
        }
        ScheduleCommand::Cancel { id } => {
            let cancelled = state.with_lock(|| {
                let mut schedules = state.load_schedules()?;
                let cancelled = schedules.cancel(*id);
                state.save_schedules(&schedules)?;
                Ok(cancelled)
            })?;
            if cancelled {
                println!("Cancelled scheduled message {}", id);
            } else {
                bail!("Scheduled message not found: {}", id);
            }
        }
        ScheduleCommand::Update {
            id,
            address,
            body,
            at,
        } => {
            let when = parse_send_time(Some(at), None, Utc::now())?;
            let updated = state.with_lock(|| {
                let mut schedules = state.load_schedules()?;
                let updated = schedules.update(*id, address, body, when);
                state.save_schedules(&schedules)?;
                Ok(updated)
            })?;
            if updated {
                println!("Updated scheduled message {}", id);
            } else {
                bail!("No undelivered scheduled message with id {}", id);
            }
        }
    }

    Ok(())
}

async fn cmd_run(once: bool) -> Result<()> {
    let (state, settings) = open()?;
    let transport = create_transport(&settings.delivery)?;
    let cache = Arc::new(MessageCache::new(
        settings.cache.capacity,
        settings.cache.max_per_entry,
    )?);

    if !settings.queue.persist {
        return run_in_memory(&state, &settings, transport, cache, once).await;
    }

    if once {
        let report =
            run_persisted_pass(&state, &settings, Arc::clone(&transport), Arc::clone(&cache))
                .await?;
        println!("Delivery pass: {}", report);
        return Ok(());
    }

    println!(
        "Delivering from {} via {} (Ctrl-C to stop)",
        state.home().display(),
        transport.name()
    );

    loop {
        let pass =
            run_persisted_pass(&state, &settings, Arc::clone(&transport), Arc::clone(&cache));
        match pass.await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => tracing::info!("Delivery pass: {}", report),
            Err(e) => tracing::error!("Delivery pass failed: {}", e),
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep(settings.delivery.poll_interval()) => {}
        }
    }

    let stats = cache.stats();
    println!(
        "Stopped. Cached {} conversations (hit rate {:.0}%)",
        stats.entries,
        stats.hit_rate() * 100.0
    );
    Ok(())
}

/// Load once and deliver from memory without writing back.
async fn run_in_memory(
    state: &StateDir,
    settings: &Settings,
    transport: Arc<dyn Transport>,
    cache: Arc<MessageCache>,
    once: bool,
) -> Result<()> {
    let (queue, schedules) = state.with_lock(|| {
        Ok((
            state.load_queue(settings.queue.retry_policy())?,
            state.load_schedules()?,
        ))
    })?;

    let worker = Arc::new(
        DeliveryWorker::new(
            Arc::new(queue),
            transport,
            cache,
            settings.delivery.clone(),
        )
        .with_schedules(Arc::new(Mutex::new(schedules))),
    );

    if once {
        let report = worker.run_once().await?;
        println!("Delivery pass: {}", report);
        return Ok(());
    }

    println!("Delivering in memory (queue.persist is off, Ctrl-C to stop)");
    let handle = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.start().await })
    };

    tokio::signal::ctrl_c().await?;
    worker.stop().await;
    handle.await??;

    println!("{}", worker.queue().status());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_command() {
        let args = Commands::try_parse_from([
            "outbox",
            "send",
            "555-0100",
            "hello",
            "--thread",
            "t1",
            "--attachment",
            "content://a",
            "--attachment",
            "content://b",
        ])
        .unwrap();

        match args.command {
            Command::Send {
                address,
                body,
                thread,
                attachments,
            } => {
                assert_eq!(address, "555-0100");
                assert_eq!(body, "hello");
                assert_eq!(thread.as_deref(), Some("t1"));
                assert_eq!(attachments.len(), 2);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_parse_schedule_add_rejects_both_times() {
        let result = Commands::try_parse_from([
            "outbox", "schedule", "add", "a", "b", "--at", "2030-01-01T00:00:00Z", "--in", "60",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_retry_requires_numeric_id() {
        assert!(Commands::try_parse_from(["outbox", "retry", "abc"]).is_err());
        assert!(Commands::try_parse_from(["outbox", "retry", "7"]).is_ok());
    }

    #[test]
    fn test_parse_send_time() {
        let now = Utc::now();

        let at = parse_send_time(Some("2030-01-01T12:00:00+02:00"), None, now).unwrap();
        assert_eq!(at.to_rfc3339(), "2030-01-01T10:00:00+00:00");

        let later = parse_send_time(None, Some(90), now).unwrap();
        assert_eq!(later - now, Duration::seconds(90));

        assert!(parse_send_time(None, None, now).is_err());
        assert!(parse_send_time(Some("tomorrow"), None, now).is_err());
    }
}
