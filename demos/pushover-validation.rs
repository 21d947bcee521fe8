// # Pushover Notifier Validation Tool
//
// Sends a single alert through the Pushover notifier so credentials can be
// checked before deploying the daemon.
//
// ## Usage
//
// ```bash
// # Dry-run mode (default - safe)
// SCRAPPY_PUSH_USER_KEY=your_user_key \
// SCRAPPY_PUSH_APP_KEY=your_app_key \
// cargo run -p scrappy-demos --bin pushover_validation
//
// # Live mode (sends a real push)
// SCRAPPY_MODE=live \
// SCRAPPY_PUSH_USER_KEY=your_user_key \
// SCRAPPY_PUSH_APP_KEY=your_app_key \
// SCRAPPY_TEST_IP=1.2.3.4 \
// cargo run -p scrappy-demos --bin pushover_validation
// ```
//
// ## Environment Variables
//
// Required:
// - `SCRAPPY_PUSH_USER_KEY`: Pushover user key
// - `SCRAPPY_PUSH_APP_KEY`: Pushover application token
//
// Optional:
// - `SCRAPPY_PUSH_MSG_PRIORITY`: -2..2 (default: 0)
// - `SCRAPPY_TEST_NAME`: Display name in the alert (default: Validation)
// - `SCRAPPY_TEST_IP`: Address in the alert (default: 192.0.2.1)
// - `SCRAPPY_MODE`: "dry-run" or "live" (default: dry-run)

use scrappy_core::traits::Notifier;
use scrappy_notify_pushover::PushoverNotifier;
use std::env;
use std::net::IpAddr;
use std::process::ExitCode;

fn required(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            tracing::error!("{} environment variable is required", key);
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("=== Pushover Notifier Validation ===");

    let (Some(user_key), Some(app_key)) = (
        required("SCRAPPY_PUSH_USER_KEY"),
        required("SCRAPPY_PUSH_APP_KEY"),
    ) else {
        return ExitCode::FAILURE;
    };

    let priority: i8 = match env::var("SCRAPPY_PUSH_MSG_PRIORITY") {
        Ok(raw) => match raw.parse() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Invalid SCRAPPY_PUSH_MSG_PRIORITY '{}': {}", raw, e);
                return ExitCode::FAILURE;
            }
        },
        Err(_) => 0,
    };

    let name = env::var("SCRAPPY_TEST_NAME").unwrap_or_else(|_| "Validation".to_string());
    let test_ip: IpAddr = match env::var("SCRAPPY_TEST_IP")
        .unwrap_or_else(|_| "192.0.2.1".to_string())
        .parse()
    {
        Ok(ip) => ip,
        Err(e) => {
            tracing::error!("Invalid SCRAPPY_TEST_IP: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let live = env::var("SCRAPPY_MODE")
        .map(|m| m.eq_ignore_ascii_case("live"))
        .unwrap_or(false);

    tracing::info!("Mode: {}", if live { "LIVE" } else { "DRY-RUN" });

    let notifier = match PushoverNotifier::new(app_key, user_key, priority, !live) {
        Ok(notifier) => notifier,
        Err(e) => {
            tracing::error!("Failed to create notifier: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match notifier.send(&name, None, test_ip).await {
        Ok(()) => {
            tracing::info!("✓ Alert accepted");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("✗ Alert failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
