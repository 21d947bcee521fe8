//! Minimal embedding example for scrappy-core
//!
//! Uses the change detector as a library, without the HTTP daemon. The
//! application owns the registry, store and notifier and feeds
//! observations in directly.

use scrappy_core::traits::Notifier;
use scrappy_core::{
    ChangeDetector, DetectorEvent, MemoryAddressStore, NotifyPolicy, Observation, Result,
    TokenRegistry,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Custom notifier that prints to stdout
struct ConsoleNotifier {
    sent: AtomicUsize,
}

impl ConsoleNotifier {
    fn new() -> Self {
        Self {
            sent: AtomicUsize::new(0),
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, name: &str, previous: Option<IpAddr>, new_ip: IpAddr) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        println!(
            "  alert: {}",
            scrappy_core::traits::notifier::alert_message(name, previous, new_ip)
        );
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "console"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let registry = Arc::new(TokenRegistry::parse(
        "# demo tokens\nabc123:Home\nk9x-77:Cabin\n",
    )?);
    let store = Arc::new(MemoryAddressStore::new());
    let notifier = Arc::new(ConsoleNotifier::new());

    let (detector, mut events) = ChangeDetector::with_events(
        registry,
        store,
        notifier.clone(),
        NotifyPolicy::default(),
        32,
    )?;

    let event_printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                DetectorEvent::AddressChanged { name, new_ip, .. } => {
                    println!("  event: [{}] changed to {}", name, new_ip)
                }
                DetectorEvent::AddressUnchanged { name, .. } => {
                    println!("  event: [{}] unchanged", name)
                }
                other => println!("  event: {:?}", other),
            }
        }
    });

    let source = IpAddr::from([192, 0, 2, 10]);
    let pings = [
        ("abc123", Some("1.2.3.4")),
        ("abc123", Some("1.2.3.4")),
        ("abc123", Some("5.6.7.8")),
        ("k9x-77", None),
        ("unknown", Some("1.2.3.4")),
        ("abc123", Some("not-an-ip")),
    ];

    for (token, claimed) in pings {
        println!("ping {} {:?}", token, claimed);
        let observation = Observation::new(token, claimed.map(str::to_string), source);
        match detector.observe(observation).await {
            Ok(outcome) => println!("  -> 200 {:?}", outcome),
            Err(e) if e.is_client_error() => println!("  -> rejected: {}", e),
            Err(e) => return Err(e),
        }
    }

    let stats = detector.stats();
    println!(
        "{} observations, {} changes, {} alerts",
        stats.observations,
        stats.changes,
        notifier.sent_count()
    );

    // Waits for any alert still in flight, then flushes the store
    detector.shutdown(detector.max_alert_duration()).await?;

    // Dropping the detector closes the event channel
    drop(detector);
    let _ = event_printer.await;

    Ok(())
}
