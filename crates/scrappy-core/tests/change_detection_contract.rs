//! Contract Test: Change Detection
//!
//! Verifies the observable behavior of a single token over a sequence of
//! observations.
//!
//! Constraints verified:
//! - The first observation and every distinct address produce one alert
//! - A repeated address produces no alert and no write
//! - Rejected requests (unknown token, malformed address) touch nothing
//! - A failed notification never rolls back the stored address
//! - A failed store write never produces an alert

mod common;

use common::*;
use scrappy_core::traits::AddressStore;
use scrappy_core::{
    ChangeDetector, Error, NotificationStatus, NotifyPolicy, Observation, ObservationOutcome,
};
use std::net::IpAddr;
use std::sync::Arc;

#[tokio::test]
async fn alert_sequence_matches_distinct_transitions() {
    let notifier = RecordingNotifier::new();
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    let sequence = [
        "1.2.3.4", "1.2.3.4", "5.6.7.8", "5.6.7.8", "5.6.7.8", "1.2.3.4", "2001:db8::1",
    ];
    for addr in sequence {
        detector.observe(claim(TOKEN, addr)).await.unwrap();
    }

    let expected = vec![
        SentAlert { name: NAME.into(), previous: None, new_ip: ip("1.2.3.4") },
        SentAlert { name: NAME.into(), previous: Some(ip("1.2.3.4")), new_ip: ip("5.6.7.8") },
        SentAlert { name: NAME.into(), previous: Some(ip("5.6.7.8")), new_ip: ip("1.2.3.4") },
        SentAlert { name: NAME.into(), previous: Some(ip("1.2.3.4")), new_ip: ip("2001:db8::1") },
    ];
    assert_eq!(notifier.sent(), expected);
    assert_eq!(store.get(TOKEN).await.unwrap(), Some(ip("2001:db8::1")));

    let stats = detector.stats();
    assert_eq!(stats.observations, 7);
    assert_eq!(stats.changes, 4);
    assert_eq!(stats.unchanged, 3);
    assert_eq!(stats.notifications_sent, 4);
}

#[tokio::test]
async fn repeated_address_reports_unchanged() {
    let notifier = RecordingNotifier::new();
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();
    let first_record = store.get_record(TOKEN).await.unwrap().unwrap();

    let outcome = detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();
    assert_eq!(
        outcome,
        ObservationOutcome::Unchanged {
            current_ip: ip("1.2.3.4")
        }
    );

    // No write: the timestamp of the accepted address is untouched
    let second_record = store.get_record(TOKEN).await.unwrap().unwrap();
    assert_eq!(first_record, second_record);
    assert_eq!(notifier.send_count(), 1);
}

#[tokio::test]
async fn mapped_ipv6_counts_as_same_address() {
    let notifier = RecordingNotifier::new();
    let (detector, _store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();
    let outcome = detector
        .observe(claim(TOKEN, "::ffff:1.2.3.4"))
        .await
        .unwrap();

    assert!(!outcome.is_changed());
    assert_eq!(notifier.send_count(), 1);
}

#[tokio::test]
async fn source_address_used_when_parameter_absent() {
    let notifier = RecordingNotifier::new();
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    let source = IpAddr::from([198, 51, 100, 7]);
    detector
        .observe(Observation::new(TOKEN, None, source))
        .await
        .unwrap();

    assert_eq!(store.get(TOKEN).await.unwrap(), Some(source));
    assert_eq!(notifier.sent()[0].new_ip, source);
}

#[tokio::test]
async fn tokens_are_tracked_independently() {
    let notifier = RecordingNotifier::new();
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();
    detector.observe(claim("k9x-77", "1.2.3.4")).await.unwrap();

    let names: Vec<String> = notifier.sent().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["Home".to_string(), "Cabin".to_string()]);

    let mut tokens = store.list_tokens().await.unwrap();
    tokens.sort();
    assert_eq!(tokens, vec!["abc123".to_string(), "k9x-77".to_string()]);
}

#[tokio::test]
async fn unknown_token_touches_nothing() {
    let notifier = RecordingNotifier::new();
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    let result = detector.observe(claim("zzz999", "1.2.3.4")).await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(store.is_empty().await);
    assert_eq!(notifier.send_count(), 0);
}

#[tokio::test]
async fn malformed_address_touches_nothing() {
    let notifier = RecordingNotifier::new();
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();

    for bad in ["not-an-ip", "", "1.2.3", "1.2.3.4 ", "[::1]", "999.1.1.1"] {
        let result = detector.observe(claim(TOKEN, bad)).await;
        assert!(
            matches!(result, Err(Error::BadRequest(_))),
            "{:?} should be rejected",
            bad
        );
    }

    assert_eq!(store.get(TOKEN).await.unwrap(), Some(ip("1.2.3.4")));
    assert_eq!(notifier.send_count(), 1);
    assert_eq!(detector.stats().rejected, 6);
}

#[tokio::test]
async fn failed_notification_keeps_new_address() {
    let notifier = FlakyNotifier::always_failing();
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), NotifyPolicy::default());

    let outcome = detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();
    assert_eq!(
        outcome,
        ObservationOutcome::Changed {
            previous_ip: None,
            new_ip: ip("1.2.3.4"),
            notification: NotificationStatus::Failed,
        }
    );
    assert_eq!(store.get(TOKEN).await.unwrap(), Some(ip("1.2.3.4")));

    // The failed alert is not replayed on the next identical observation
    let outcome = detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();
    assert!(!outcome.is_changed());
    assert_eq!(notifier.call_count(), 1);
    assert_eq!(detector.stats().notification_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn retries_follow_policy() {
    let notifier = FlakyNotifier::new(2);
    let policy = NotifyPolicy::default()
        .with_max_retries(2)
        .with_retry_delay_secs(5);
    let (detector, _store) = memory_detector(Arc::new(notifier.clone()), policy);

    let outcome = detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();

    assert!(matches!(
        outcome,
        ObservationOutcome::Changed {
            notification: NotificationStatus::Sent,
            ..
        }
    ));
    assert_eq!(notifier.call_count(), 3);
    assert_eq!(detector.stats().notifications_sent, 1);
    assert_eq!(detector.stats().notification_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_notifier_times_out() {
    let notifier = BlockingNotifier::new();
    let policy = NotifyPolicy::default().with_timeout_secs(2);
    let (detector, store) = memory_detector(Arc::new(notifier.clone()), policy);

    let outcome = detector.observe(claim(TOKEN, "1.2.3.4")).await.unwrap();

    assert!(matches!(
        outcome,
        ObservationOutcome::Changed {
            notification: NotificationStatus::Failed,
            ..
        }
    ));
    assert_eq!(notifier.started(), 1);
    assert_eq!(notifier.finished(), 0);
    assert_eq!(store.get(TOKEN).await.unwrap(), Some(ip("1.2.3.4")));
}

#[tokio::test]
async fn storage_failure_is_reported_without_alert() {
    let notifier = RecordingNotifier::new();
    let detector = ChangeDetector::new(
        registry(),
        Arc::new(FailingStore),
        Arc::new(notifier.clone()),
        NotifyPolicy::default(),
    )
    .unwrap();

    let result = detector.observe(claim(TOKEN, "1.2.3.4")).await;

    assert!(matches!(result, Err(Error::Storage(_))));
    assert_eq!(notifier.send_count(), 0);
    assert_eq!(detector.stats().storage_failures, 1);
}
