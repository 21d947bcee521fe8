// # Notifier Trait
//
// Defines the interface for alerting the service owner about an address
// change.
//
// ## Implementations
//
// - Log-only: `notifier::LogNotifier` (this crate)
// - Pushover: `scrappy-notify-pushover` crate
//
// ## Delivery Semantics
//
// A notifier makes one best-effort external call and reports the outcome.
// It never retries, never touches the address store, and never decides
// whether a notification is needed. Retry policy belongs to `ChangeDetector`.

use async_trait::async_trait;
use std::net::IpAddr;

/// Title used for every alert
pub const ALERT_TITLE: &str = "IP address update";

/// Human-readable alert body
///
/// `Home is at 5.6.7.8 (was 1.2.3.4)`, or `(was none)` on first observation.
pub fn alert_message(name: &str, previous: Option<IpAddr>, new_ip: IpAddr) -> String {
    match previous {
        Some(previous) => format!("{} is at {} (was {})", name, new_ip, previous),
        None => format!("{} is at {} (was none)", name, new_ip),
    }
}

/// Trait for notifier implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe; the detector calls `send`
/// concurrently for different tokens.
///
/// # Secrets
///
/// Implementations must not log credentials and must receive only the
/// display name, never the token.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one alert
    ///
    /// # Parameters
    ///
    /// - `name`: Display name of the token
    /// - `previous`: The address before the change (absent on first observation)
    /// - `new_ip`: The newly stored address
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Provider accepted the alert
    /// - `Err(Error)`: Delivery failed
    async fn send(
        &self,
        name: &str,
        previous: Option<IpAddr>,
        new_ip: IpAddr,
    ) -> Result<(), crate::Error>;

    /// Get the notifier name (for logging)
    fn notifier_name(&self) -> &'static str;
}

/// Helper trait for constructing notifiers from configuration
pub trait NotifierFactory: Send + Sync {
    /// Create a Notifier instance from configuration
    fn create(
        &self,
        config: &crate::config::NotifierConfig,
    ) -> Result<std::sync::Arc<dyn Notifier>, crate::Error>;
}
