//! Delivery module - sends queued messages through a transport.

pub mod persisted;
pub mod transport;
pub mod worker;

use std::sync::Arc;

pub use transport::{CommandTransport, LogTransport, Transport};
pub use persisted::run_persisted_pass;
pub use worker::{settle, DeliveryReport, DeliveryWorker, SendOutcome};

use crate::config::DeliverySettings;
use crate::error::Result;

/// Build the configured transport: the external command when one is set,
/// otherwise a dry run.
pub fn create_transport(settings: &DeliverySettings) -> Result<Arc<dyn Transport>> {
    match &settings.command {
        Some(argv) => Ok(Arc::new(
            CommandTransport::from_argv(argv)?.with_timeout(settings.send_timeout()),
        )),
        None => Ok(Arc::new(LogTransport)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_transport() {
        let mut settings = DeliverySettings::default();
        assert_eq!(create_transport(&settings).unwrap().name(), "log");

        settings.command = Some(vec!["sms-send".to_string()]);
        assert_eq!(create_transport(&settings).unwrap().name(), "sms-send");

        settings.command = Some(Vec::new());
        assert!(create_transport(&settings).is_err());
    }
}
