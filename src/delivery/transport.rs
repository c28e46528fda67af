//! Outbound transports.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::QueuedMessage;
use crate::error::{Error, Result};

/// Something that can put a message on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name.
    fn name(&self) -> &str;

    /// Attempt one delivery. An `Err` puts the message in the failed set.
    async fn send(&self, message: &QueuedMessage) -> Result<()>;
}

/// Dry-run transport: logs the message and reports success.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &QueuedMessage) -> Result<()> {
        tracing::info!(
            "[dry run] {:?} {} -> {}: {}",
            message.kind,
            message.id,
            message.address,
            message.body.chars().take(50).collect::<String>()
        );
        Ok(())
    }
}

/// Default limit on a single send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Hands each message to an external program.
///
/// The program sees the message through `OUTBOX_*` environment variables and
/// signals failure with a non-zero exit status. A program still running after
/// the send timeout is killed and the send counts as failed.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Build from `[program, args...]`.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Config("delivery command is empty".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: DEFAULT_SEND_TIMEOUT,
        })
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for CommandTransport {
    fn name(&self) -> &str {
        &self.program
    }

    async fn send(&self, message: &QueuedMessage) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("OUTBOX_MESSAGE_ID", message.id.to_string())
            .env("OUTBOX_ADDRESS", &message.address)
            .env("OUTBOX_BODY", &message.body)
            .env("OUTBOX_THREAD_ID", message.thread_id.as_deref().unwrap_or(""))
            .env("OUTBOX_ATTACHMENTS", message.attachments.join("\n"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "{} timed out after {} ms",
                    self.program,
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| Error::Transport(format!("failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = if stderr.trim().is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr.trim().to_string()
            };
            Err(Error::Transport(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OfflineQueue;

    #[test]
    fn test_from_argv() {
        let argv = vec!["sms-send".to_string(), "--modem".to_string(), "0".to_string()];
        let transport = CommandTransport::from_argv(&argv).unwrap();
        assert_eq!(transport.name(), "sms-send");
        assert_eq!(transport.args, vec!["--modem", "0"]);

        assert!(CommandTransport::from_argv(&[]).is_err());
    }

    #[tokio::test]
    async fn test_log_transport_succeeds() {
        let queue = OfflineQueue::default();
        let msg = queue.add_message("555-0100", "hi");
        assert!(LogTransport.send(&msg).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_transport_passes_message() {
        let queue = OfflineQueue::default();
        let msg = queue.add_message("555-0100", "hello");

        let transport = CommandTransport::new("sh")
            .with_arg("-c")
            .with_arg(r#"test "$OUTBOX_ADDRESS" = 555-0100 && test "$OUTBOX_BODY" = hello"#);
        assert!(transport.send(&msg).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_transport_reports_stderr() {
        let queue = OfflineQueue::default();
        let msg = queue.add_message("555-0100", "hello");

        let transport = CommandTransport::new("sh")
            .with_arg("-c")
            .with_arg("echo 'modem offline' >&2; exit 3");
        let err = transport.send(&msg).await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref reason) if reason == "modem offline"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_program_times_out() {
        let queue = OfflineQueue::default();
        let msg = queue.add_message("555-0100", "hello");

        let transport = CommandTransport::new("sh")
            .with_arg("-c")
            .with_arg("sleep 5")
            .with_timeout(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = transport.send(&msg).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(err, Error::Transport(ref reason) if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn test_missing_program_is_transport_error() {
        let queue = OfflineQueue::default();
        let msg = queue.add_message("555-0100", "hello");

        let transport = CommandTransport::new("outbox-test-no-such-program");
        assert!(matches!(transport.send(&msg).await, Err(Error::Transport(_))));
    }
}
