// Daemon configuration
//
// Built once at startup from an optional JSON file (named by
// `SCRAPPYDDNS_CONF`) with environment variables layered on top. Lookups go
// through a closure so tests can supply variables without touching the
// process environment.

use anyhow::{Context, Result, bail};
use scrappy_core::config::{AddressStoreConfig, NotifierConfig, NotifyDispatch, ServiceConfig};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the JSON configuration file
pub const CONFIG_FILE_ENV: &str = "SCRAPPYDDNS_CONF";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Service configuration handed to scrappy-core
    pub service: ServiceConfig,

    /// Maximum log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Size-rotated log file; stdout when unset
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` to resolve variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (mut service, notifier_configured) = match lookup(CONFIG_FILE_ENV) {
            Some(path) if !path.is_empty() => load_file(Path::new(&path))?,
            _ => (ServiceConfig::new(), false),
        };

        if let Some(host) = lookup("SCRAPPY_HOST") {
            service.server.bind_address = host;
        }
        if let Some(port) = parse_var(&lookup, "SCRAPPY_PORT")? {
            service.server.port = port;
        }
        if let Some(proxy_count) = parse_var(&lookup, "SCRAPPY_PROXY_COUNT")? {
            service.server.proxy_count = proxy_count;
        }
        if let Some(token_file) = lookup("SCRAPPY_TOKEN_FILE") {
            service.token_file = token_file;
        }

        apply_store_overrides(&mut service, &lookup)?;
        apply_notifier_overrides(&mut service, notifier_configured, &lookup)?;

        if let Some(max_retries) = parse_var(&lookup, "SCRAPPY_NOTIFY_MAX_RETRIES")? {
            service.notify.max_retries = max_retries;
        }
        if let Some(delay) = parse_var(&lookup, "SCRAPPY_NOTIFY_RETRY_DELAY_SECS")? {
            service.notify.retry_delay_secs = delay;
        }
        if let Some(timeout) = parse_var(&lookup, "SCRAPPY_NOTIFY_TIMEOUT_SECS")? {
            service.notify.timeout_secs = timeout;
        }
        if let Some(dispatch) = lookup("SCRAPPY_NOTIFY_DISPATCH") {
            service.notify.dispatch = match dispatch.to_lowercase().as_str() {
                "wait" => NotifyDispatch::Wait,
                "background" => NotifyDispatch::Background,
                _ => bail!(
                    "SCRAPPY_NOTIFY_DISPATCH '{}' is not valid. Valid values: wait, background",
                    dispatch
                ),
            };
        }

        Ok(Self {
            service,
            log_level: lookup("SCRAPPY_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_file: lookup("SCRAPPY_LOG_FILE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => bail!(
                "SCRAPPY_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

/// Read the JSON configuration file
///
/// Also reports whether the file chose a notifier, since push keys in the
/// environment only select Pushover when it did not.
fn load_file(path: &Path) -> Result<(ServiceConfig, bool)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Config file {} is not valid JSON", path.display()))?;

    let notifier_configured = value.get("notifier").is_some();
    let service = serde_json::from_value(value)
        .with_context(|| format!("Config file {} has invalid settings", path.display()))?;

    Ok((service, notifier_configured))
}

fn apply_store_overrides<F>(service: &mut ServiceConfig, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let cache_dir = lookup("SCRAPPY_IP_ADDRESS_CACHE");

    match lookup("SCRAPPY_STORE_TYPE").as_deref() {
        Some("memory") => service.address_store = AddressStoreConfig::Memory,
        Some("file") => {
            let directory = match (&cache_dir, &service.address_store) {
                (Some(dir), _) => dir.clone(),
                (None, AddressStoreConfig::File { directory }) => directory.clone(),
                (None, _) => ".".to_string(),
            };
            service.address_store = AddressStoreConfig::File { directory };
        }
        Some(other) => bail!(
            "SCRAPPY_STORE_TYPE '{}' is not supported. Supported types: file, memory",
            other
        ),
        None => {
            if let (Some(dir), AddressStoreConfig::File { directory }) =
                (cache_dir, &mut service.address_store)
            {
                *directory = dir;
            }
        }
    }

    Ok(())
}

fn apply_notifier_overrides<F>(
    service: &mut ServiceConfig,
    notifier_configured: bool,
    lookup: &F,
) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let user_key = lookup("SCRAPPY_PUSH_USER_KEY").filter(|k| !k.is_empty());
    let app_key = lookup("SCRAPPY_PUSH_APP_KEY").filter(|k| !k.is_empty());
    let env_priority: Option<i8> = parse_var(lookup, "SCRAPPY_PUSH_MSG_PRIORITY")?;

    if let NotifierConfig::Pushover {
        user_key: file_user,
        app_key: file_app,
        priority,
    } = &mut service.notifier
    {
        if let Some(key) = user_key {
            *file_user = key;
        }
        if let Some(key) = app_key {
            *file_app = key;
        }
        if let Some(p) = env_priority {
            *priority = p;
        }
        return Ok(());
    }

    // An explicit notifier in the config file is never replaced
    if notifier_configured {
        return Ok(());
    }

    match (user_key, app_key) {
        (Some(user_key), Some(app_key)) => {
            service.notifier = NotifierConfig::Pushover {
                user_key,
                app_key,
                priority: env_priority.unwrap_or(0),
            };
        }
        (None, None) => {}
        (Some(_), None) => bail!(
            "SCRAPPY_PUSH_USER_KEY is set but SCRAPPY_PUSH_APP_KEY is not. \
            Set both to enable Pushover alerts."
        ),
        (None, Some(_)) => bail!(
            "SCRAPPY_PUSH_APP_KEY is set but SCRAPPY_PUSH_USER_KEY is not. \
            Set both to enable Pushover alerts."
        ),
    }

    Ok(())
}

/// Parse an optional variable, failing on a malformed value
fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        None => Ok(None),
    }
}
