//! Configuration types for the Scrappy DDNS service
//!
//! This module defines all configuration structures used throughout the crate.
//! Configuration is consumed once at startup; nothing here is re-read at runtime.

use serde::{Deserialize, Serialize};

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Path to the `token:name` list
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Address store configuration
    #[serde(default)]
    pub address_store: AddressStoreConfig,

    /// Notifier configuration
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Notification delivery policy
    #[serde(default)]
    pub notify: NotifyPolicy,
}

impl ServiceConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            server: ServerConfig::default(),
            token_file: default_token_file(),
            address_store: AddressStoreConfig::default(),
            notifier: NotifierConfig::default(),
            notify: NotifyPolicy::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.token_file.is_empty() {
            return Err(crate::Error::config("Token file path cannot be empty"));
        }

        self.server.validate()?;
        self.address_store.validate()?;
        self.notifier.validate()?;
        self.notify.validate()?;

        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (e.g. "0.0.0.0" or "::")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of reverse proxies in front of the service
    ///
    /// When > 0 the client address is taken from `X-Forwarded-For`,
    /// counting this many entries from the right.
    #[serde(default)]
    pub proxy_count: usize,
}

impl ServerConfig {
    /// Validate the listener configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(crate::Error::config(format!(
                "Bind address must be an IP literal, got: {}",
                self.bind_address
            )));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            proxy_count: 0,
        }
    }
}

/// Address store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressStoreConfig {
    /// One record file per token in a directory
    File {
        /// Directory holding `<token>.ip` files
        directory: String,
    },

    /// In-memory store (not persistent)
    Memory,
}

impl AddressStoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            AddressStoreConfig::File { directory } if directory.is_empty() => Err(
                crate::Error::config("Address store directory cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            AddressStoreConfig::File { .. } => "file",
            AddressStoreConfig::Memory => "memory",
        }
    }
}

impl Default for AddressStoreConfig {
    fn default() -> Self {
        AddressStoreConfig::File {
            directory: ".".to_string(),
        }
    }
}

/// Notifier configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Pushover push notifications
    Pushover {
        /// Pushover user key
        user_key: String,
        /// Pushover application token
        app_key: String,
        /// Message priority (-2..=2)
        #[serde(default)]
        priority: i8,
    },

    /// Write alerts to the log only
    #[default]
    Log,
}

impl NotifierConfig {
    /// Validate the notifier configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            NotifierConfig::Pushover {
                user_key,
                app_key,
                priority,
            } => {
                if user_key.is_empty() {
                    return Err(crate::Error::config(
                        "No Pushover user key given. Set SCRAPPY_PUSH_USER_KEY.",
                    ));
                }
                if app_key.is_empty() {
                    return Err(crate::Error::config(
                        "No Pushover application key given. Set SCRAPPY_PUSH_APP_KEY.",
                    ));
                }
                if !(-2..=2).contains(priority) {
                    return Err(crate::Error::config(format!(
                        "Pushover priority must be between -2 and 2. Got: {}",
                        priority
                    )));
                }
                Ok(())
            }
            NotifierConfig::Log => Ok(()),
        }
    }

    /// Get the notifier type name
    pub fn type_name(&self) -> &str {
        match self {
            NotifierConfig::Pushover { .. } => "pushover",
            NotifierConfig::Log => "log",
        }
    }
}

// Custom Debug implementation that hides the push credentials
impl std::fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifierConfig::Pushover { priority, .. } => f
                .debug_struct("Pushover")
                .field("user_key", &"<REDACTED>")
                .field("app_key", &"<REDACTED>")
                .field("priority", priority)
                .finish(),
            NotifierConfig::Log => f.write_str("Log"),
        }
    }
}

/// How a changed address is handed to the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyDispatch {
    /// The request waits for the notification outcome before responding
    #[default]
    Wait,
    /// The request responds as soon as the address is committed
    Background,
}

/// Notification delivery policy
///
/// Notifiers make exactly one attempt per call; any retrying happens here,
/// in the `ChangeDetector`, and only when configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPolicy {
    /// Additional attempts after a failed notification (0 = no retry)
    #[serde(default)]
    pub max_retries: usize,

    /// Delay between attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Upper bound for a single attempt (in seconds)
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,

    /// Whether the response waits for the notification
    #[serde(default)]
    pub dispatch: NotifyDispatch,
}

impl NotifyPolicy {
    /// Validate the policy
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_retries > 10 {
            return Err(crate::Error::config(format!(
                "Notification retries must be between 0 and 10. Got: {}",
                self.max_retries
            )));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Notification timeout must be > 0"));
        }
        Ok(())
    }

    /// Set the retry count
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between attempts
    pub fn with_retry_delay_secs(mut self, retry_delay_secs: u64) -> Self {
        self.retry_delay_secs = retry_delay_secs;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the dispatch mode
    pub fn with_dispatch(mut self, dispatch: NotifyDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_secs: default_retry_delay_secs(),
            timeout_secs: default_notify_timeout_secs(),
            dispatch: NotifyDispatch::Wait,
        }
    }
}

fn default_token_file() -> String {
    "token.list".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_notify_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.token_file, "token.list");
        assert_eq!(config.notify.max_retries, 0);
        assert_eq!(config.notifier.type_name(), "log");
        assert_eq!(config.address_store.type_name(), "file");
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "token_file": "/etc/scrappy/token.list",
            "address_store": { "type": "file", "directory": "/var/lib/scrappy" },
            "notifier": { "type": "pushover", "user_key": "u", "app_key": "a", "priority": 1 },
            "notify": { "max_retries": 2, "dispatch": "background" }
        }"#;

        let config: ServiceConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.notify.max_retries, 2);
        assert_eq!(config.notify.timeout_secs, 30);
        assert_eq!(config.notify.dispatch, NotifyDispatch::Background);
        assert_eq!(
            config.address_store,
            AddressStoreConfig::File {
                directory: "/var/lib/scrappy".to_string()
            }
        );
    }

    #[test]
    fn test_pushover_requires_keys() {
        let config = NotifierConfig::Pushover {
            user_key: String::new(),
            app_key: "a".to_string(),
            priority: 0,
        };
        assert!(config.validate().is_err());

        let config = NotifierConfig::Pushover {
            user_key: "u".to_string(),
            app_key: "a".to_string(),
            priority: 3,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bind_address_rejected() {
        let mut config = ServiceConfig::default();
        config.server.bind_address = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_bounds() {
        assert!(NotifyPolicy::default().with_max_retries(11).validate().is_err());
        assert!(NotifyPolicy::default().with_timeout_secs(0).validate().is_err());
        assert!(NotifyPolicy::default().with_max_retries(3).validate().is_ok());
    }

    #[test]
    fn test_notifier_debug_redacts_keys() {
        let config = NotifierConfig::Pushover {
            user_key: "user_secret_123".to_string(),
            app_key: "app_secret_456".to_string(),
            priority: 0,
        };
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("user_secret_123"));
        assert!(!debug_str.contains("app_secret_456"));
    }
}
