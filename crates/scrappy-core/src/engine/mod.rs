//! Change detection engine
//!
//! The ChangeDetector is responsible for:
//! - Validating the token of an observation
//! - Resolving the effective address
//! - Committing the address through `AddressStore::compare_and_set`
//! - Notifying the owner when the address changed
//!
//! ## Architecture
//!
//! ```text
//!  Observation (token, ip_address?, source)
//!        │
//!        ▼
//! ┌────────────────┐   unknown token  ──► NotFound
//! │ ChangeDetector │   malformed ip   ──► BadRequest
//! └────────────────┘
//!        │  spawned commit task
//!        ▼
//! ┌──────────────┐  changed   ┌──────────┐
//! │ AddressStore │ ─────────► │ Notifier │
//! │ (CAS, lock)  │            │ (no lock)│
//! └──────────────┘            └──────────┘
//! ```
//!
//! ## Request Flow
//!
//! 1. Look up the token; unknown tokens stop here
//! 2. Resolve the address; a malformed `ip_address` stops here
//! 3. `compare_and_set` (the store releases its lock before returning)
//! 4. On change, notify according to `NotifyPolicy`
//! 5. Report success whatever the notification outcome
//!
//! Steps 3-4 run in their own task. If the client disconnects and the
//! request future is dropped, a decided transition still commits and its
//! alert still goes out.
//!
//! ## Shutdown
//!
//! Every task the detector spawns is tracked. [`ChangeDetector::shutdown()`]
//! waits for them up to a grace period; alerts still undelivered after that
//! are aborted, logged and counted as notification failures.

use crate::address::Observation;
use crate::config::{NotifyDispatch, NotifyPolicy};
use crate::error::{Error, Result};
use crate::tokens::TokenRegistry;
use crate::traits::notifier::alert_message;
use crate::traits::{AddressStore, Notifier};
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Events emitted by the ChangeDetector
///
/// Events carry the display name, never the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    /// Stored address replaced
    AddressChanged {
        name: String,
        previous_ip: Option<IpAddr>,
        new_ip: IpAddr,
    },

    /// Observation matched the stored address
    AddressUnchanged { name: String, current_ip: IpAddr },

    /// Alert delivered
    NotificationSent {
        name: String,
        new_ip: IpAddr,
        attempts: usize,
    },

    /// Alert failed after all attempts
    NotificationFailed {
        name: String,
        new_ip: IpAddr,
        error: String,
        attempts: usize,
    },

    /// Address store failed for this observation
    StorageFailed { name: String, error: String },
}

/// What happened to the notification for a changed address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    /// The notifier accepted the alert
    Sent,
    /// Every attempt failed; the address change stands
    Failed,
    /// Handed to a background task (`NotifyDispatch::Background`)
    Dispatched,
}

/// Result of a successfully handled observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// The stored address already matched
    Unchanged { current_ip: IpAddr },

    /// The stored address was replaced
    Changed {
        previous_ip: Option<IpAddr>,
        new_ip: IpAddr,
        notification: NotificationStatus,
    },
}

impl ObservationOutcome {
    /// Whether this observation changed the stored address
    pub fn is_changed(&self) -> bool {
        matches!(self, ObservationOutcome::Changed { .. })
    }
}

/// Running counters
///
/// Notification failures never reach the client, so this is where an
/// operator sees a silent notifier outage.
#[derive(Debug, Default)]
pub struct DetectorStats {
    observations: AtomicU64,
    rejected: AtomicU64,
    changes: AtomicU64,
    unchanged: AtomicU64,
    storage_failures: AtomicU64,
    notifications_sent: AtomicU64,
    notification_failures: AtomicU64,
    alerts_abandoned: AtomicU64,
}

/// Point-in-time copy of [`DetectorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub observations: u64,
    pub rejected: u64,
    pub changes: u64,
    pub unchanged: u64,
    pub storage_failures: u64,
    pub notifications_sent: u64,
    /// Includes `alerts_abandoned`
    pub notification_failures: u64,
    /// Alerts cut off by shutdown
    pub alerts_abandoned: u64,
}

impl DetectorStats {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            observations: self.observations.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            alerts_abandoned: self.alerts_abandoned.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    registry: Arc<TokenRegistry>,
    store: Arc<dyn AddressStore>,
    notifier: Arc<dyn Notifier>,
    policy: NotifyPolicy,
    stats: DetectorStats,
    event_tx: Option<mpsc::Sender<DetectorEvent>>,
    /// Commit and alert tasks not yet joined
    tasks: Mutex<JoinSet<()>>,
    /// Committed changes whose alert has not finished
    pending_alerts: AtomicU64,
    closed: AtomicBool,
}

/// Change detector / request handler
///
/// Stateless across requests: all persistent state lives in the
/// `AddressStore`. Cheap to clone; clones share the same components and
/// counters.
///
/// ## Lifecycle
///
/// 1. Load a [`TokenRegistry`], open an [`AddressStore`], build a [`Notifier`]
/// 2. Create with [`ChangeDetector::new()`]
/// 3. Call [`ChangeDetector::observe()`] once per request, from any task
/// 4. On shutdown, [`ChangeDetector::shutdown()`] drains alerts and flushes
///    the store
#[derive(Clone)]
pub struct ChangeDetector {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("registry", &self.inner.registry)
            .field("notifier", &self.inner.notifier.notifier_name())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl ChangeDetector {
    /// Create a new change detector
    ///
    /// # Parameters
    ///
    /// - `registry`: Registered tokens
    /// - `store`: Address store implementation
    /// - `notifier`: Notifier implementation
    /// - `policy`: Notification retry/timeout/dispatch policy
    pub fn new(
        registry: Arc<TokenRegistry>,
        store: Arc<dyn AddressStore>,
        notifier: Arc<dyn Notifier>,
        policy: NotifyPolicy,
    ) -> Result<Self> {
        Self::build(registry, store, notifier, policy, None)
    }

    /// Create a change detector that also emits [`DetectorEvent`]s
    ///
    /// # Returns
    ///
    /// A tuple of (detector, event_receiver). When the channel is full,
    /// events are dropped with a warning rather than blocking requests.
    pub fn with_events(
        registry: Arc<TokenRegistry>,
        store: Arc<dyn AddressStore>,
        notifier: Arc<dyn Notifier>,
        policy: NotifyPolicy,
        event_channel_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<DetectorEvent>)> {
        if event_channel_capacity == 0 {
            return Err(Error::config("Event channel capacity must be > 0"));
        }
        let (tx, rx) = mpsc::channel(event_channel_capacity);
        let detector = Self::build(registry, store, notifier, policy, Some(tx))?;
        Ok((detector, rx))
    }

    fn build(
        registry: Arc<TokenRegistry>,
        store: Arc<dyn AddressStore>,
        notifier: Arc<dyn Notifier>,
        policy: NotifyPolicy,
        event_tx: Option<mpsc::Sender<DetectorEvent>>,
    ) -> Result<Self> {
        policy.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                store,
                notifier,
                policy,
                stats: DetectorStats::default(),
                event_tx,
                tasks: Mutex::new(JoinSet::new()),
                pending_alerts: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Handle one observation
    ///
    /// # Returns
    ///
    /// - `Ok(ObservationOutcome)`: Address committed (notification outcome inside)
    /// - `Err(Error::NotFound)`: Unknown token, nothing touched
    /// - `Err(Error::BadRequest)`: Malformed `ip_address`, nothing touched
    /// - `Err(Error::Storage)`: Store failure, record left as it was
    /// - `Err(Error::Other)`: The detector has been shut down
    pub async fn observe(&self, observation: Observation) -> Result<ObservationOutcome> {
        let stats = &self.inner.stats;
        DetectorStats::bump(&stats.observations);

        let Some(name) = self.inner.registry.lookup(&observation.token) else {
            DetectorStats::bump(&stats.rejected);
            debug!("Rejected ping with unknown token from {}", observation.source_ip);
            return Err(Error::not_found("Unknown token"));
        };
        let name = name.to_string();

        let ip = match observation.effective_ip() {
            Ok(ip) => ip,
            Err(e) => {
                DetectorStats::bump(&stats.rejected);
                debug!("Rejected ping from [{}]: {}", name, e);
                return Err(e);
            }
        };

        debug!("Received ping from [{}] @ {}", name, ip);

        if self.inner.closed.load(Ordering::Acquire) {
            warn!("Dropped ping from [{}] received during shutdown", name);
            return Err(Error::Other("Change detector is shut down".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let detector = self.clone();
        let token = observation.token;
        self.spawn_tracked(async move {
            let _ = tx.send(detector.commit(&token, &name, ip).await);
        });

        rx.await
            .map_err(|_| Error::Other("Observation task was cancelled".to_string()))?
    }

    /// Spawn a task that `shutdown` will wait for
    fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while let Some(result) = tasks.try_join_next() {
            Self::log_join_result(result);
        }
        tasks.spawn(task);
    }

    fn log_join_result(result: std::result::Result<(), JoinError>) {
        if let Err(e) = result
            && e.is_panic()
        {
            error!("Detector task panicked: {}", e);
        }
    }

    /// Take the current task set, leaving an empty one behind
    fn take_tasks(&self) -> JoinSet<()> {
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *tasks)
    }

    /// Compare-and-set, then notify on change
    async fn commit(&self, token: &str, name: &str, ip: IpAddr) -> Result<ObservationOutcome> {
        let stats = &self.inner.stats;

        let outcome = match self.inner.store.compare_and_set(token, ip).await {
            Ok(outcome) => outcome,
            Err(e) => {
                DetectorStats::bump(&stats.storage_failures);
                error!("Failed to record address of [{}]: {}", name, e);
                self.emit_event(DetectorEvent::StorageFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        if !outcome.changed {
            DetectorStats::bump(&stats.unchanged);
            debug!("IP of [{}] has not changed from {}. Ignored ping.", name, ip);
            self.emit_event(DetectorEvent::AddressUnchanged {
                name: name.to_string(),
                current_ip: ip,
            });
            return Ok(ObservationOutcome::Unchanged { current_ip: ip });
        }

        DetectorStats::bump(&stats.changes);
        info!(
            "Address of [{}] changed: {} -> {}",
            name,
            outcome
                .previous
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "none".to_string()),
            ip
        );
        self.emit_event(DetectorEvent::AddressChanged {
            name: name.to_string(),
            previous_ip: outcome.previous,
            new_ip: ip,
        });

        self.inner.pending_alerts.fetch_add(1, Ordering::AcqRel);
        let notification = match self.inner.policy.dispatch {
            NotifyDispatch::Wait => self.deliver(name, outcome.previous, ip).await,
            NotifyDispatch::Background => {
                let detector = self.clone();
                let name = name.to_string();
                let previous = outcome.previous;
                self.spawn_tracked(async move {
                    detector.deliver(&name, previous, ip).await;
                });
                NotificationStatus::Dispatched
            }
        };

        Ok(ObservationOutcome::Changed {
            previous_ip: outcome.previous,
            new_ip: ip,
            notification,
        })
    }

    /// Send one pending alert and mark it finished
    async fn deliver(
        &self,
        name: &str,
        previous: Option<IpAddr>,
        new_ip: IpAddr,
    ) -> NotificationStatus {
        let status = self.notify_with_retry(name, previous, new_ip).await;
        self.inner.pending_alerts.fetch_sub(1, Ordering::AcqRel);
        status
    }

    /// Send the alert, retrying as configured
    ///
    /// Failure is logged and counted here and never propagated: the address
    /// change is already committed.
    async fn notify_with_retry(
        &self,
        name: &str,
        previous: Option<IpAddr>,
        new_ip: IpAddr,
    ) -> NotificationStatus {
        let policy = &self.inner.policy;
        let notifier = &self.inner.notifier;
        let max_attempts = policy.max_retries + 1;
        let attempt_timeout = Duration::from_secs(policy.timeout_secs);

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let result =
                match tokio::time::timeout(attempt_timeout, notifier.send(name, previous, new_ip))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::notify(format!(
                        "timed out after {}s",
                        policy.timeout_secs
                    ))),
                };

            match result {
                Ok(()) => {
                    DetectorStats::bump(&self.inner.stats.notifications_sent);
                    info!(
                        "Push succeeded via {}: {}",
                        notifier.notifier_name(),
                        alert_message(name, previous, new_ip)
                    );
                    self.emit_event(DetectorEvent::NotificationSent {
                        name: name.to_string(),
                        new_ip,
                        attempts: attempt,
                    });
                    return NotificationStatus::Sent;
                }
                Err(e) => {
                    warn!(
                        "Notification attempt {}/{} for [{}] via {} failed: {}",
                        attempt,
                        max_attempts,
                        name,
                        notifier.notifier_name(),
                        e
                    );
                    last_error = Some(e);

                    if attempt < max_attempts {
                        tokio::time::sleep(Duration::from_secs(policy.retry_delay_secs)).await;
                    }
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        let failures = DetectorStats::bump(&self.inner.stats.notification_failures);
        error!(
            "Failed to notify about [{}] @ {} after {} attempt(s): {} ({} notification failure(s) so far)",
            name, new_ip, max_attempts, error, failures
        );
        self.emit_event(DetectorEvent::NotificationFailed {
            name: name.to_string(),
            new_ip,
            error,
            attempts: max_attempts,
        });
        NotificationStatus::Failed
    }

    /// Emit a detector event
    fn emit_event(&self, event: DetectorEvent) {
        let Some(tx) = &self.inner.event_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing the event channel capacity.");
            }
        }
    }

    /// Current counters
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Registered tokens
    pub fn registry(&self) -> &TokenRegistry {
        &self.inner.registry
    }

    /// The notification policy in effect
    pub fn policy(&self) -> &NotifyPolicy {
        &self.inner.policy
    }

    /// Flush the address store
    pub async fn flush(&self) -> Result<()> {
        self.inner.store.flush().await
    }

    /// Longest a single alert can take under the current policy
    pub fn max_alert_duration(&self) -> Duration {
        let policy = &self.inner.policy;
        let attempts = policy.max_retries as u64 + 1;
        Duration::from_secs(
            attempts * policy.timeout_secs + policy.max_retries as u64 * policy.retry_delay_secs,
        )
    }

    /// Stop accepting observations, drain in-flight work, flush the store
    ///
    /// Commits and alerts still running after `grace` are aborted. Each
    /// abandoned alert is logged and counted in `notification_failures`; the
    /// address change it reported is already committed and will not be
    /// alerted again.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        let deadline = tokio::time::Instant::now() + grace;

        // Commit tasks may spawn alert tasks while we wait, so drain until empty
        let mut timed_out = false;
        loop {
            let mut tasks = self.take_tasks();
            if tasks.is_empty() {
                break;
            }

            if !timed_out {
                let drained = tokio::time::timeout_at(deadline, async {
                    while let Some(result) = tasks.join_next().await {
                        Self::log_join_result(result);
                    }
                })
                .await;
                timed_out = drained.is_err();
            }

            if timed_out {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }

        let abandoned = self.inner.pending_alerts.swap(0, Ordering::AcqRel);
        if abandoned > 0 {
            let stats = &self.inner.stats;
            stats.alerts_abandoned.fetch_add(abandoned, Ordering::Relaxed);
            stats
                .notification_failures
                .fetch_add(abandoned, Ordering::Relaxed);
            error!(
                "Abandoned {} undelivered alert(s) after waiting {:?} at shutdown",
                abandoned, grace
            );
        } else {
            debug!("All alerts delivered before shutdown");
        }

        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::LogNotifier;
    use crate::state::MemoryAddressStore;

    fn detector() -> (ChangeDetector, mpsc::Receiver<DetectorEvent>) {
        let registry = Arc::new(TokenRegistry::from_entries([("abc123", "Home")]).unwrap());
        ChangeDetector::with_events(
            registry,
            Arc::new(MemoryAddressStore::new()),
            Arc::new(LogNotifier::new()),
            NotifyPolicy::default(),
            16,
        )
        .unwrap()
    }

    fn observation(token: &str, ip: Option<&str>) -> Observation {
        Observation::new(token, ip.map(str::to_string), IpAddr::from([10, 0, 0, 1]))
    }

    #[tokio::test]
    async fn test_first_observation_changes_and_notifies() {
        let (detector, mut events) = detector();

        let outcome = detector
            .observe(observation("abc123", Some("1.2.3.4")))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ObservationOutcome::Changed {
                previous_ip: None,
                new_ip: IpAddr::from([1, 2, 3, 4]),
                notification: NotificationStatus::Sent,
            }
        );

        assert!(matches!(events.recv().await, Some(DetectorEvent::AddressChanged { .. })));
        assert!(matches!(events.recv().await, Some(DetectorEvent::NotificationSent { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_source_address_used_without_parameter() {
        let (detector, _events) = detector();

        let outcome = detector.observe(observation("abc123", None)).await.unwrap();
        assert!(matches!(
            outcome,
            ObservationOutcome::Changed { new_ip, .. } if new_ip == IpAddr::from([10, 0, 0, 1])
        ));
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let (detector, _events) = detector();

        assert!(matches!(
            detector.observe(observation("nope", Some("1.2.3.4"))).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            detector.observe(observation("abc123", Some("bogus"))).await,
            Err(Error::BadRequest(_))
        ));

        let stats = detector.stats();
        assert_eq!(stats.observations, 2);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.changes, 0);
    }

    #[tokio::test]
    async fn test_unknown_token_checked_before_address() {
        let (detector, _events) = detector();
        let result = detector.observe(observation("nope", Some("bogus"))).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_token_checked_before_query_error() {
        let (detector, _events) = detector();

        let unreadable = Observation::new("nope", None, IpAddr::from([10, 0, 0, 1]))
            .with_query_error("duplicate field `ip_address`");
        assert!(matches!(detector.observe(unreadable).await, Err(Error::NotFound(_))));

        let unreadable = Observation::new("abc123", None, IpAddr::from([10, 0, 0, 1]))
            .with_query_error("duplicate field `ip_address`");
        assert!(matches!(detector.observe(unreadable).await, Err(Error::BadRequest(_))));
        assert_eq!(detector.stats().changes, 0);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let registry = Arc::new(TokenRegistry::from_entries([("abc123", "Home")]).unwrap());
        let result = ChangeDetector::new(
            registry,
            Arc::new(MemoryAddressStore::new()),
            Arc::new(LogNotifier::new()),
            NotifyPolicy::default().with_timeout_secs(0),
        );
        assert!(result.is_err());
    }
}
