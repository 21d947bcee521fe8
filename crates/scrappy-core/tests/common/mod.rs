//! Test doubles and common utilities for contract tests
//!
//! Notifiers and stores here record what the detector asked of them so the
//! tests can assert on side effects rather than on log output.

#![allow(dead_code)]

use scrappy_core::error::{Error, Result};
use scrappy_core::traits::{AddressRecord, AddressStore, CasOutcome, Notifier};
use scrappy_core::{
    ChangeDetector, MemoryAddressStore, NotifyPolicy, Observation, TokenRegistry,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// One alert as the notifier received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAlert {
    pub name: String,
    pub previous: Option<IpAddr>,
    pub new_ip: IpAddr,
}

/// A notifier that records every alert
///
/// Clones share the same record, so a test can keep one handle and give
/// the other to the detector.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<std::sync::Mutex<Vec<SentAlert>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts sent so far, in call order
    pub fn sent(&self) -> Vec<SentAlert> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of alerts sent so far
    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, name: &str, previous: Option<IpAddr>, new_ip: IpAddr) -> Result<()> {
        self.sent.lock().unwrap().push(SentAlert {
            name: name.to_string(),
            previous,
            new_ip,
        });
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "recording"
    }
}

/// A notifier that fails the first `failures` calls, then succeeds
#[derive(Clone)]
pub struct FlakyNotifier {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl FlakyNotifier {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A notifier that never succeeds
    pub fn always_failing() -> Self {
        Self::new(usize::MAX)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Notifier for FlakyNotifier {
    async fn send(&self, _name: &str, _previous: Option<IpAddr>, _new_ip: IpAddr) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(Error::notify("push service unavailable"))
        } else {
            Ok(())
        }
    }

    fn notifier_name(&self) -> &'static str {
        "flaky"
    }
}

/// A notifier that blocks until released
#[derive(Clone)]
pub struct BlockingNotifier {
    release: Arc<Notify>,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl BlockingNotifier {
    pub fn new() -> Self {
        Self {
            release: Arc::new(Notify::new()),
            started: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let every blocked `send` finish
    pub fn release(&self) {
        self.release.notify_waiters();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Notifier for BlockingNotifier {
    async fn send(&self, _name: &str, _previous: Option<IpAddr>, _new_ip: IpAddr) -> Result<()> {
        let released = self.release.notified();
        self.started.fetch_add(1, Ordering::SeqCst);
        released.await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notifier_name(&self) -> &'static str {
        "blocking"
    }
}

/// A store whose every operation fails
pub struct FailingStore;

#[async_trait::async_trait]
impl AddressStore for FailingStore {
    async fn get(&self, _token: &str) -> Result<Option<IpAddr>> {
        Err(Error::storage("disk on fire"))
    }

    async fn get_record(&self, _token: &str) -> Result<Option<AddressRecord>> {
        Err(Error::storage("disk on fire"))
    }

    async fn compare_and_set(&self, _token: &str, _new_ip: IpAddr) -> Result<CasOutcome> {
        Err(Error::storage("disk on fire"))
    }

    async fn list_tokens(&self) -> Result<Vec<String>> {
        Err(Error::storage("disk on fire"))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

pub const TOKEN: &str = "abc123";
pub const NAME: &str = "Home";

/// Registry with `abc123 -> Home` and `k9x-77 -> Cabin`
pub fn registry() -> Arc<TokenRegistry> {
    Arc::new(
        TokenRegistry::from_entries([(TOKEN, NAME), ("k9x-77", "Cabin")])
            .expect("static registry is valid"),
    )
}

/// Detector over an in-memory store with the given notifier
pub fn memory_detector(
    notifier: Arc<dyn Notifier>,
    policy: NotifyPolicy,
) -> (ChangeDetector, Arc<MemoryAddressStore>) {
    let store = Arc::new(MemoryAddressStore::new());
    let detector = ChangeDetector::new(registry(), store.clone(), notifier, policy)
        .expect("detector construction succeeds");
    (detector, store)
}

/// Observation carrying an explicit `ip_address`
pub fn claim(token: &str, ip: &str) -> Observation {
    Observation::new(token, Some(ip.to_string()), IpAddr::from([192, 0, 2, 1]))
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("test address parses")
}
