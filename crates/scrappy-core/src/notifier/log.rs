//! Log-only notifier
//!
//! Writes every alert as an `info` line. Never fails.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

use crate::Error;
use crate::config::NotifierConfig;
use crate::traits::notifier::{ALERT_TITLE, Notifier, NotifierFactory, alert_message};

/// Notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    /// Create a new log notifier
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, name: &str, previous: Option<IpAddr>, new_ip: IpAddr) -> Result<(), Error> {
        tracing::info!("{}: {}", ALERT_TITLE, alert_message(name, previous, new_ip));
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "log"
    }
}

/// Factory for the `log` notifier type
pub struct LogNotifierFactory;

impl NotifierFactory for LogNotifierFactory {
    fn create(&self, config: &NotifierConfig) -> Result<Arc<dyn Notifier>, Error> {
        match config {
            NotifierConfig::Log => Ok(Arc::new(LogNotifier::new())),
            _ => Err(Error::config("Invalid config for log notifier")),
        }
    }
}
