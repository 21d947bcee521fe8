// # Pushover Notifier
//
// This crate provides the Pushover push-notification channel for the Scrappy
// DDNS service.
//
// ## Behavior
//
// - One HTTPS POST per alert, no retries (retry policy is owned by
//   `ChangeDetector`)
// - HTTP timeout configured (30 seconds)
// - Success means HTTP 200 with a JSON body whose `status` is 1
// - 4xx responses report the `errors` array from the body
// - Dry-run mode logs the alert without sending it
//
// ## Security Requirements
//
// - Application token and user key NEVER appear in logs or `Debug` output
// - Notifier creation fails fast if either key is empty
//
// ## API Reference
//
// - Pushover Message API: https://pushover.net/api
// - Send Message: POST `/1/messages.json` (form-urlencoded)

use async_trait::async_trait;
use scrappy_core::config::NotifierConfig;
use scrappy_core::traits::notifier::{ALERT_TITLE, alert_message};
use scrappy_core::traits::{Notifier, NotifierFactory};
use scrappy_core::{Error, ProviderRegistry, Result};
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Pushover API base URL
const PUSHOVER_API_BASE: &str = "https://api.pushover.net";

/// Message endpoint, relative to the API base
const MESSAGES_PATH: &str = "/1/messages.json";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable that switches the factory into dry-run mode
pub const MODE_ENV: &str = "SCRAPPY_MODE";

/// Pushover notifier
///
/// Stateless and single-shot: every `send` is exactly one API request.
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the notifier logs the message it would have sent
/// and reports success without contacting Pushover.
pub struct PushoverNotifier {
    /// Pushover application token
    /// ⚠️ NEVER log this value
    app_key: String,

    /// Pushover user (or group) key
    /// ⚠️ NEVER log this value
    user_key: String,

    /// Message priority (-2..=2)
    priority: i8,

    /// API base URL (overridable for tests)
    api_base: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, log instead of sending
    dry_run: bool,
}

// Custom Debug implementation that hides the keys
impl std::fmt::Debug for PushoverNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushoverNotifier")
            .field("app_key", &"<REDACTED>")
            .field("user_key", &"<REDACTED>")
            .field("priority", &self.priority)
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl PushoverNotifier {
    /// Create a new Pushover notifier
    ///
    /// # Parameters
    ///
    /// - `app_key`: Pushover application token
    /// - `user_key`: Pushover user key of the recipient
    /// - `priority`: Message priority, -2 (lowest) to 2 (emergency)
    /// - `dry_run`: If true, log alerts instead of sending them
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a key is empty or the priority is out of
    /// range.
    pub fn new(
        app_key: impl Into<String>,
        user_key: impl Into<String>,
        priority: i8,
        dry_run: bool,
    ) -> Result<Self> {
        let app_key = app_key.into();
        let user_key = user_key.into();

        if app_key.is_empty() {
            return Err(Error::config(
                "No Pushover application key given. Set SCRAPPY_PUSH_APP_KEY.",
            ));
        }
        if user_key.is_empty() {
            return Err(Error::config(
                "No Pushover user key given. Set SCRAPPY_PUSH_USER_KEY.",
            ));
        }
        if !(-2..=2).contains(&priority) {
            return Err(Error::config(format!(
                "Pushover priority must be between -2 and 2, got {}",
                priority
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            app_key,
            user_key,
            priority,
            api_base: PUSHOVER_API_BASE.to_string(),
            client,
            dry_run,
        })
    }

    /// Create a notifier that sends for real
    pub fn new_live(app_key: impl Into<String>, user_key: impl Into<String>, priority: i8) -> Result<Self> {
        Self::new(app_key, user_key, priority, false)
    }

    /// Create a notifier that only logs what it would send
    pub fn new_dry_run(
        app_key: impl Into<String>,
        user_key: impl Into<String>,
        priority: i8,
    ) -> Result<Self> {
        Self::new(app_key, user_key, priority, true)
    }

    /// Point the notifier at a different API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Whether this notifier is in dry-run mode
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Decide whether a Pushover response means the message was accepted
///
/// - 200 with `{"status": 1}`: accepted
/// - 200 otherwise, or any 4xx: rejected, reporting the body's `errors`
///   array (or the whole body when there is none)
/// - anything else: rejected, reporting the HTTP status only
pub fn interpret_response(status: u16, body: &str) -> Result<()> {
    if status != 200 && !(400..500).contains(&status) {
        return Err(Error::provider(
            "pushover",
            format!("Push failed with HTTP status: {}", status),
        ));
    }

    let json: Value = serde_json::from_str(body).map_err(|e| {
        Error::provider(
            "pushover",
            format!("Push failed with {}: unparsable response body: {}", status, e),
        )
    })?;

    if status == 200 && json.get("status").and_then(Value::as_i64) == Some(1) {
        return Ok(());
    }

    let detail = match json.get("errors") {
        Some(errors) => errors.to_string(),
        None => json.to_string(),
    };
    Err(Error::provider(
        "pushover",
        format!("Push failed with error {}: {}", status, detail),
    ))
}

#[async_trait]
impl Notifier for PushoverNotifier {
    /// Send one alert
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /1/messages.json
    /// Content-Type: application/x-www-form-urlencoded
    ///
    /// token=<app_key>&user=<user_key>&priority=0&title=IP+address+update&message=...
    /// ```
    async fn send(&self, name: &str, previous: Option<IpAddr>, new_ip: IpAddr) -> Result<()> {
        let message = alert_message(name, previous, new_ip);

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would push via Pushover: {}", message);
            return Ok(());
        }

        let priority = self.priority.to_string();
        let form = [
            ("token", self.app_key.as_str()),
            ("user", self.user_key.as_str()),
            ("priority", priority.as_str()),
            ("title", ALERT_TITLE),
            ("message", message.as_str()),
        ];

        let url = format!("{}{}", self.api_base, MESSAGES_PATH);
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors carry the URL, never the form body
                Error::provider("pushover", format!("HTTP request failed: {}", e))
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        tracing::debug!("Pushover response ({}): {}", status, body);

        interpret_response(status, &body)
    }

    fn notifier_name(&self) -> &'static str {
        "pushover"
    }
}

/// Factory for creating Pushover notifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct PushoverFactory {
    dry_run: bool,
}

impl PushoverFactory {
    /// Create a factory
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Create a factory honoring `SCRAPPY_MODE=dry-run`
    pub fn from_env() -> Self {
        let dry_run = std::env::var(MODE_ENV)
            .unwrap_or_default()
            .eq_ignore_ascii_case("dry-run");
        Self::new(dry_run)
    }
}

impl NotifierFactory for PushoverFactory {
    fn create(&self, config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
        match config {
            NotifierConfig::Pushover {
                user_key,
                app_key,
                priority,
            } => {
                if self.dry_run {
                    tracing::warn!(
                        "Pushover notifier running in DRY-RUN mode - no alerts will be sent"
                    );
                }

                Ok(Arc::new(PushoverNotifier::new(
                    app_key.clone(),
                    user_key.clone(),
                    *priority,
                    self.dry_run,
                )?))
            }
            _ => Err(Error::config("Invalid config for Pushover notifier")),
        }
    }
}

/// Register the Pushover notifier with a registry
///
/// # Example
///
/// ```rust
/// use scrappy_core::ProviderRegistry;
///
/// let mut registry = ProviderRegistry::with_builtins();
/// scrappy_notify_pushover::register(&mut registry);
/// assert!(registry.has_notifier("pushover"));
/// ```
pub fn register(registry: &mut ProviderRegistry) {
    registry.register_notifier("pushover", Box::new(PushoverFactory::from_env()));
}
