//! Integration tests for the queue scheduler.
//!
//! This test suite validates:
//! - Sweep-001: pending captures are processed oldest first
//! - Sweep-002: a sweep requested during a sweep is skipped
//! - Sweep-003: an unconfigured classifier skips the sweep entirely
//! - Sweep-004: failures count toward the retry limit, then retry-all recovers
//! - Sweep-005: backoff defers recently failed captures
//! - Sweep-006: storage and credential errors leave captures and memory untouched
//! - Sweep-007: network restoration triggers a guarded sweep
//! - Sweep-008: background loop lifecycle (start/trigger/shutdown)
//!
//! All tests run against `MemoryStore` and a scripted classifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use triage_core::{
    CalendarEvent, Capture, CaptureRepository, CaptureStatus, ContainerType, EntityRepository,
    Error, MemoryKind, Note, PreferenceRepository, TodoItem, TypedEntity,
};
use uuid::Uuid;
use triage_db::MemoryStore;
use triage_inference::{MockClassifier, MockFailure};
use triage_jobs::{
    NetworkMonitor, QueueScheduler, SchedulerBuilder, SchedulerConfig, SchedulerEvent,
    SkipReason, SweepOutcome, SweepReport,
};

const TODO: &str = r#"{"container":"todo","suggestedPriority":"normal","summary":"任务"}"#;
const NOTE: &str = r#"{"container":"note","suggestedPriority":"normal","summary":"记录想法"}"#;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

struct Fixture {
    store: Arc<MemoryStore>,
    classifier: MockClassifier,
    scheduler: Arc<QueueScheduler>,
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_inter_item_delay(0)
        .with_associations(false)
}

fn fixture(classifier: MockClassifier, config: SchedulerConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let scheduler = SchedulerBuilder::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(classifier.clone()),
    )
    .with_config(config)
    .build();

    Fixture {
        store,
        classifier,
        scheduler: Arc::new(scheduler),
    }
}

/// Insert a capture created `offset_secs` after a fixed origin.
async fn add_capture(store: &MemoryStore, content: &str, offset_secs: i64) -> Capture {
    let origin: DateTime<Utc> = "2026-10-01T00:00:00Z".parse().unwrap();
    let capture = Capture {
        created_at: origin + chrono::Duration::seconds(offset_secs),
        ..Capture::new(content)
    };
    store.insert(&capture).await.unwrap();
    capture
}

async fn reload(store: &MemoryStore, capture: &Capture) -> Capture {
    store.get(capture.id).await.unwrap().unwrap()
}

fn completed(outcome: SweepOutcome) -> SweepReport {
    match outcome {
        SweepOutcome::Completed(report) => report,
        other => panic!("expected a completed sweep, got {:?}", other),
    }
}

async fn wait_for_calls(classifier: &MockClassifier, n: usize) {
    while classifier.call_count() < n {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// ORDERING AND SINGLE FLIGHT
// ============================================================================

#[tokio::test]
async fn test_sweep_processes_oldest_first() {
    let f = fixture(MockClassifier::new().with_default_response(TODO), fast_config());
    add_capture(&f.store, "third", 30).await;
    add_capture(&f.store, "first", 10).await;
    add_capture(&f.store, "second", 20).await;

    let report = completed(f.scheduler.process_queue().await.unwrap());

    assert_eq!(report.eligible, 3);
    assert_eq!(report.confirmed, 3);
    assert_eq!(f.classifier.classified_texts(), vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sweep_is_skipped() {
    let f = fixture(
        MockClassifier::new()
            .with_default_response(TODO)
            .with_latency(Duration::from_secs(1)),
        fast_config(),
    );
    add_capture(&f.store, "买牛奶", 0).await;

    let scheduler = f.scheduler.clone();
    let running = tokio::spawn(async move { scheduler.process_queue().await });
    wait_for_calls(&f.classifier, 1).await;
    assert!(f.scheduler.is_sweeping());

    let second = f.scheduler.process_queue().await.unwrap();
    assert_eq!(second, SweepOutcome::Skipped(SkipReason::AlreadyRunning));
    assert_eq!(f.classifier.call_count(), 1);

    let first = completed(running.await.unwrap().unwrap());
    assert_eq!(first.confirmed, 1);
    assert_eq!(f.classifier.call_count(), 1);
    assert!(!f.scheduler.is_sweeping());
}

#[tokio::test]
async fn test_unconfigured_classifier_skips_sweep() {
    let f = fixture(MockClassifier::new().unconfigured(), fast_config());
    let capture = add_capture(&f.store, "买牛奶", 0).await;

    let outcome = f.scheduler.process_queue().await.unwrap();

    assert_eq!(outcome, SweepOutcome::Skipped(SkipReason::NotConfigured));
    assert_eq!(f.classifier.call_count(), 0);
    let saved = reload(&f.store, &capture).await;
    assert_eq!(saved.status, CaptureStatus::Pending);
    assert_eq!(saved.retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_items_are_spaced_by_inter_item_delay() {
    let f = fixture(
        MockClassifier::new().with_default_response(NOTE),
        fast_config().with_inter_item_delay(500),
    );
    for i in 0..3 {
        add_capture(&f.store, &format!("item {}", i), i).await;
    }

    let start = tokio::time::Instant::now();
    completed(f.scheduler.process_queue().await.unwrap());
    assert!(start.elapsed() >= Duration::from_millis(1000));
}

// ============================================================================
// FAILURES, BACKOFF AND RECOVERY
// ============================================================================

#[tokio::test]
async fn test_five_failures_then_retry_all() {
    let mut classifier = MockClassifier::new();
    for _ in 0..5 {
        classifier = classifier.then_fail(MockFailure::Network);
    }
    let classifier = classifier.then_respond(TODO);
    // No backoff so every sweep attempts the capture.
    let f = fixture(classifier, fast_config().with_backoff(0, 0));
    let capture = add_capture(&f.store, "买牛奶", 0).await;

    for attempt in 1..=4 {
        let report = completed(f.scheduler.process_queue().await.unwrap());
        assert_eq!(report.retry_scheduled, 1);
        let saved = reload(&f.store, &capture).await;
        assert_eq!(saved.status, CaptureStatus::Pending);
        assert_eq!(saved.retry_count, attempt);
    }

    let report = completed(f.scheduler.process_queue().await.unwrap());
    assert_eq!(report.failed, 1);
    let failed = reload(&f.store, &capture).await;
    assert_eq!(failed.status, CaptureStatus::Failed);
    assert_eq!(failed.retry_count, 5);
    assert!(failed.last_error.as_deref().is_some_and(|e| !e.is_empty()));

    // Failed captures are no longer picked up.
    let report = completed(f.scheduler.process_queue().await.unwrap());
    assert_eq!(report.eligible, 0);
    assert_eq!(f.classifier.call_count(), 5);

    let report = completed(f.scheduler.retry_failed_items().await.unwrap());
    assert_eq!(report.confirmed, 1);
    let recovered = reload(&f.store, &capture).await;
    assert_eq!(recovered.status, CaptureStatus::Confirmed);
    assert_eq!(recovered.retry_count, 0);
    assert!(recovered.last_error.is_none());
    assert_eq!(f.classifier.call_count(), 6);
}

#[tokio::test]
async fn test_backoff_defers_recent_failure() {
    let f = fixture(
        MockClassifier::new()
            .then_fail(MockFailure::Service)
            .with_default_response(NOTE),
        fast_config(),
    );
    let capture = add_capture(&f.store, "想法", 0).await;

    let report = completed(f.scheduler.process_queue().await.unwrap());
    assert_eq!(report.retry_scheduled, 1);

    // Inside the 5s window.
    let report = completed(f.scheduler.process_queue().await.unwrap());
    assert_eq!(report.deferred, 1);
    assert_eq!(report.processed(), 0);
    assert_eq!(f.classifier.call_count(), 1);

    // Pretend the window has elapsed.
    let mut waited = reload(&f.store, &capture).await;
    waited.last_attempt_at = Some(Utc::now() - chrono::Duration::seconds(6));
    f.store.save(&waited).await.unwrap();

    let report = completed(f.scheduler.process_queue().await.unwrap());
    assert_eq!(report.confirmed, 1);
    assert_eq!(f.classifier.call_count(), 2);
}

#[tokio::test]
async fn test_rejected_request_fails_immediately() {
    let f = fixture(
        MockClassifier::new().then_fail(MockFailure::Rejected),
        fast_config(),
    );
    let capture = add_capture(&f.store, "很长的内容", 0).await;

    let report = completed(f.scheduler.process_queue().await.unwrap());

    assert_eq!(report.failed, 1);
    let saved = reload(&f.store, &capture).await;
    assert_eq!(saved.status, CaptureStatus::Failed);
    assert_eq!(saved.retry_count, 1);
}

#[tokio::test]
async fn test_invalid_response_is_retried() {
    let f = fixture(
        MockClassifier::new().then_respond("I think this is a todo"),
        fast_config(),
    );
    let capture = add_capture(&f.store, "买牛奶", 0).await;

    let report = completed(f.scheduler.process_queue().await.unwrap());

    assert_eq!(report.retry_scheduled, 1);
    let saved = reload(&f.store, &capture).await;
    assert_eq!(saved.status, CaptureStatus::Pending);
    assert_eq!(saved.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_classifier_times_out_and_retries() {
    let f = fixture(
        MockClassifier::new()
            .with_default_response(TODO)
            .with_latency(Duration::from_secs(120)),
        fast_config().with_classify_timeout(30),
    );
    let capture = add_capture(&f.store, "买牛奶", 0).await;

    let report = completed(f.scheduler.process_queue().await.unwrap());

    assert_eq!(report.retry_scheduled, 1);
    let saved = reload(&f.store, &capture).await;
    assert!(saved.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_storage_failure_leaves_capture_untouched() {
    let f = fixture(MockClassifier::new().with_default_response(TODO), fast_config());
    let capture = add_capture(&f.store, "买牛奶", 0).await;

    f.store.set_fail_writes(true);
    let report = completed(f.scheduler.process_queue().await.unwrap());
    assert_eq!(report.errors, 1);
    assert_eq!(report.processed(), 0);

    f.store.set_fail_writes(false);
    let saved = reload(&f.store, &capture).await;
    assert_eq!(saved.status, CaptureStatus::Pending);
    assert_eq!(saved.retry_count, 0);
    assert!(saved.last_error.is_none());

    let report = completed(f.scheduler.process_queue().await.unwrap());
    assert_eq!(report.confirmed, 1);
}

/// Entity store whose commits always fail; reads go to the wrapped store.
struct FailingEntities(Arc<MemoryStore>);

#[async_trait]
impl EntityRepository for FailingEntities {
    async fn find_by_capture(&self, capture_id: Uuid) -> triage_core::Result<Vec<TypedEntity>> {
        self.0.find_by_capture(capture_id).await
    }

    async fn materialize(&self, _: &TypedEntity, _: &[Capture]) -> triage_core::Result<()> {
        Err(Error::Storage("disk full".into()))
    }

    async fn list_calendar_events(&self) -> triage_core::Result<Vec<CalendarEvent>> {
        self.0.list_calendar_events().await
    }

    async fn list_todos(&self) -> triage_core::Result<Vec<TodoItem>> {
        self.0.list_todos().await
    }

    async fn list_notes(&self) -> triage_core::Result<Vec<Note>> {
        self.0.list_notes().await
    }
}

#[tokio::test]
async fn test_failed_commit_leaves_preferences_untouched() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = SchedulerBuilder::new(
        store.clone(),
        Arc::new(FailingEntities(store.clone())),
        store.clone(),
        Arc::new(MockClassifier::new().with_default_response(NOTE)),
    )
    .with_config(fast_config())
    .build();
    scheduler
        .memory()
        .record_correction("周报", ContainerType::Note, ContainerType::Todo, None)
        .await
        .unwrap();
    let capture = add_capture(&store, "写周报", 0).await;

    for _ in 0..3 {
        let report = completed(scheduler.process_queue().await.unwrap());
        assert_eq!(report.errors, 1);
    }

    let saved = reload(&store, &capture).await;
    assert_eq!(saved.status, CaptureStatus::Pending);
    assert_eq!(saved.retry_count, 0);

    let best = scheduler.memory().find_best_match("写周报").await.unwrap().unwrap();
    assert_eq!(best.usage_count, 1);
    let observed = PreferenceRepository::list(store.as_ref(), Some(MemoryKind::Keyword))
        .await
        .unwrap();
    assert!(observed.is_empty());
}

#[tokio::test]
async fn test_rejected_credential_aborts_sweep() {
    let f = fixture(
        MockClassifier::new()
            .then_fail(MockFailure::Unauthorized)
            .with_default_response(TODO),
        fast_config(),
    );
    let a = add_capture(&f.store, "a", 0).await;
    let b = add_capture(&f.store, "b", 1).await;

    let report = completed(f.scheduler.process_queue().await.unwrap());

    assert!(report.aborted);
    assert_eq!(f.classifier.call_count(), 1);
    for capture in [&a, &b] {
        let saved = reload(&f.store, capture).await;
        assert_eq!(saved.status, CaptureStatus::Pending);
        assert_eq!(saved.retry_count, 0);
    }
}

// ============================================================================
// EXACTLY ONCE
// ============================================================================

#[tokio::test]
async fn test_confirmed_capture_is_converted_once() {
    let f = fixture(MockClassifier::new().with_default_response(TODO), fast_config());
    let capture = add_capture(&f.store, "买牛奶", 0).await;

    completed(f.scheduler.process_queue().await.unwrap());
    let report = completed(f.scheduler.process_queue().await.unwrap());

    assert_eq!(report.eligible, 0);
    assert_eq!(f.classifier.call_count(), 1);
    assert_eq!(f.store.entity_count_for(capture.id).await, 1);
    assert_eq!(f.store.list_todos().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_queue_stats() {
    let f = fixture(
        MockClassifier::new()
            .then_respond(TODO)
            .then_fail(MockFailure::Rejected),
        fast_config(),
    );
    add_capture(&f.store, "a", 0).await;
    add_capture(&f.store, "b", 1).await;
    add_capture(&f.store, "c", 2).await;
    let before = f.scheduler.queue_stats().await.unwrap();
    assert_eq!(before.pending, 3);

    completed(f.scheduler.process_queue().await.unwrap());

    let stats = f.scheduler.queue_stats().await.unwrap();
    assert_eq!(stats.confirmed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.total(), 3);
}

// ============================================================================
// NETWORK SIGNAL
// ============================================================================

async fn next_completed_sweep(
    events: &mut tokio::sync::broadcast::Receiver<SchedulerEvent>,
) -> SweepReport {
    loop {
        if let SchedulerEvent::SweepCompleted { report } = events.recv().await.unwrap() {
            return report;
        }
    }
}

#[tokio::test]
async fn test_network_restore_triggers_sweep() {
    let f = fixture(MockClassifier::new().with_default_response(NOTE), fast_config());
    let capture = add_capture(&f.store, "想法", 0).await;

    let monitor = NetworkMonitor::new(false);
    f.scheduler.attach_network(&monitor);
    let mut events = f.scheduler.events();

    assert!(monitor.report(true));
    let report = tokio::time::timeout(Duration::from_secs(5), next_completed_sweep(&mut events))
        .await
        .unwrap();

    assert_eq!(report.confirmed, 1);
    assert_eq!(reload(&f.store, &capture).await.status, CaptureStatus::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn test_network_restore_during_sweep_is_skipped() {
    let f = fixture(
        MockClassifier::new()
            .with_default_response(NOTE)
            .with_latency(Duration::from_secs(1)),
        fast_config(),
    );
    add_capture(&f.store, "想法", 0).await;
    let monitor = NetworkMonitor::new(false);
    f.scheduler.attach_network(&monitor);
    let mut events = f.scheduler.events();

    let scheduler = f.scheduler.clone();
    let running = tokio::spawn(async move { scheduler.process_queue().await });
    wait_for_calls(&f.classifier, 1).await;

    monitor.report(true);
    loop {
        match events.recv().await.unwrap() {
            SchedulerEvent::SweepSkipped { reason } => {
                assert_eq!(reason, SkipReason::AlreadyRunning);
                break;
            }
            _ => continue,
        }
    }

    completed(running.await.unwrap().unwrap());
    assert_eq!(f.classifier.call_count(), 1);
}

// ============================================================================
// BACKGROUND LOOP
// ============================================================================

#[tokio::test]
async fn test_loop_sweeps_on_start_and_on_trigger() {
    let f = fixture(
        MockClassifier::new().with_default_response(TODO),
        fast_config().with_poll_interval(3_600_000),
    );
    add_capture(&f.store, "first", 0).await;

    let mut events = f.scheduler.events();
    let handle = f.scheduler.clone().start();

    let first = tokio::time::timeout(Duration::from_secs(5), next_completed_sweep(&mut events))
        .await
        .unwrap();
    assert_eq!(first.confirmed, 1);

    add_capture(&f.store, "second", 1).await;
    handle.trigger_sweep();
    let second = tokio::time::timeout(Duration::from_secs(5), next_completed_sweep(&mut events))
        .await
        .unwrap();
    assert_eq!(second.confirmed, 1);

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();
    assert_eq!(f.classifier.classified_texts(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_disabled_scheduler_does_not_sweep() {
    let f = fixture(
        MockClassifier::new().with_default_response(TODO),
        fast_config().with_enabled(false),
    );
    add_capture(&f.store, "a", 0).await;

    let handle = f.scheduler.clone().start();
    handle.join().await.unwrap();

    assert_eq!(f.classifier.call_count(), 0);
}
