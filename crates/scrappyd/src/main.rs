// # scrappyd - Scrappy DDNS Daemon
//
// Thin integration layer around scrappy-core:
// 1. Reading configuration (JSON file plus environment variables)
// 2. Initializing logging and the runtime
// 3. Registering stores and notifiers
// 4. Serving `GET /<token>[?ip_address=<addr>]` until SIGINT/SIGTERM
//
// All change-detection logic lives in scrappy-core.
//
// ## Configuration
//
// - `SCRAPPYDDNS_CONF`: Optional JSON config file (see `ServiceConfig`)
//
// ### Listener
// - `SCRAPPY_HOST`: Bind address (default 0.0.0.0)
// - `SCRAPPY_PORT`: Port (default 5000)
// - `SCRAPPY_PROXY_COUNT`: Reverse proxies in front of the service (default 0)
//
// ### Tokens and State
// - `SCRAPPY_TOKEN_FILE`: `token:name` list (default token.list)
// - `SCRAPPY_STORE_TYPE`: Address store type (file, memory)
// - `SCRAPPY_IP_ADDRESS_CACHE`: Directory for the file store (default .)
//
// ### Notifications
// - `SCRAPPY_PUSH_USER_KEY` / `SCRAPPY_PUSH_APP_KEY`: Pushover credentials
// - `SCRAPPY_PUSH_MSG_PRIORITY`: Pushover priority, -2..2 (default 0)
// - `SCRAPPY_NOTIFY_MAX_RETRIES`: Extra attempts after a failed alert (default 0)
// - `SCRAPPY_NOTIFY_RETRY_DELAY_SECS`: Delay between attempts (default 5)
// - `SCRAPPY_NOTIFY_TIMEOUT_SECS`: Per-attempt timeout (default 30)
// - `SCRAPPY_NOTIFY_DISPATCH`: wait or background (default wait)
// - `SCRAPPY_MODE`: Set to dry-run to log alerts instead of sending them
//
// ### Logging
// - `SCRAPPY_LOG_LEVEL`: trace, debug, info, warn, error (default info)
// - `SCRAPPY_LOG_FILE`: Log to this file instead of stdout, rotated at 1 MiB
//   with 5 backups
//
// ## Example
//
// ```bash
// export SCRAPPY_TOKEN_FILE=/etc/scrappy/token.list
// export SCRAPPY_IP_ADDRESS_CACHE=/var/lib/scrappy
// export SCRAPPY_PUSH_USER_KEY=your_user_key
// export SCRAPPY_PUSH_APP_KEY=your_app_key
//
// scrappyd
// ```

mod config;
mod logging;
mod server;

use anyhow::{Context, Result};
use config::Config;
use scrappy_core::{ChangeDetector, ProviderRegistry, TokenRegistry};
use server::AppState;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, error, info};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ScrappyExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<ScrappyExitCode> for ExitCode {
    fn from(code: ScrappyExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ScrappyExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ScrappyExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if let Err(e) = logging::init(log_level, config.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ScrappyExitCode::ConfigError.into();
    }

    info!("Starting scrappyd {}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ScrappyExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let daemon = match Daemon::start(config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return ScrappyExitCode::ConfigError;
            }
        };

        match daemon.run().await {
            Ok(()) => ScrappyExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                ScrappyExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Everything built at startup, ready to serve
struct Daemon {
    listener: TcpListener,
    detector: ChangeDetector,
    proxy_count: usize,
}

impl Daemon {
    /// Build all components and bind the listener
    ///
    /// Any failure here is a startup error (exit code 1).
    async fn start(config: Config) -> Result<Self> {
        let service = config.service;

        let mut registry = ProviderRegistry::with_builtins();
        #[cfg(feature = "pushover")]
        {
            info!("Registering Pushover notifier");
            scrappy_notify_pushover::register(&mut registry);
        }

        let tokens = TokenRegistry::load(&service.token_file)
            .await
            .context("Failed to load token list")?;

        info!("Address store type: {}", service.address_store.type_name());
        let store = registry
            .create_address_store(&service.address_store)
            .await
            .context("Failed to open address store")?;

        info!("Notifier type: {}", service.notifier.type_name());
        let notifier = registry
            .create_notifier(&service.notifier)
            .context("Failed to create notifier")?;

        let detector = ChangeDetector::new(Arc::new(tokens), store, notifier, service.notify)?;

        let bind_ip: IpAddr = service
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address {}", service.server.bind_address))?;
        let addr = SocketAddr::new(bind_ip, service.server.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        if service.server.proxy_count > 0 {
            info!(
                "Trusting X-Forwarded-For from {} proxy hop(s)",
                service.server.proxy_count
            );
        }

        Ok(Self {
            listener,
            detector,
            proxy_count: service.server.proxy_count,
        })
    }

    /// Serve until a shutdown signal, then flush state
    async fn run(self) -> Result<()> {
        let shutdown = shutdown_signal()?;

        info!("Listening on http://{}", self.listener.local_addr()?);

        let state = AppState {
            detector: self.detector.clone(),
            proxy_count: self.proxy_count,
        };
        server::serve(self.listener, state, shutdown)
            .await
            .context("HTTP server failed")?;

        let grace = self.detector.max_alert_duration();
        info!("Shutting down daemon, waiting up to {:?} for pending alerts", grace);
        self.detector
            .shutdown(grace)
            .await
            .context("Failed to flush address store")?;

        let stats = self.detector.stats();
        info!(
            "Final stats: {} observation(s), {} change(s), {} unchanged, {} rejected, \
            {} storage failure(s), {} alert(s) sent, {} alert failure(s) ({} abandoned)",
            stats.observations,
            stats.changes,
            stats.unchanged,
            stats.rejected,
            stats.storage_failures,
            stats.notifications_sent,
            stats.notification_failures,
            stats.alerts_abandoned
        );

        Ok(())
    }
}

/// Future that completes on SIGTERM or SIGINT
///
/// Handlers are installed before this returns, so a failure to install them
/// surfaces before the listener starts accepting.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()> + Send + 'static> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(async move {
        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!("Received shutdown signal: {}", received);
    })
}

/// Future that completes on CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()> + Send + 'static> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal: SIGINT"),
            Err(e) => error!("Failed to wait for CTRL-C: {}", e),
        }
    })
}
