//! Queue scheduler for pending captures.
//!
//! A sweep lists pending captures oldest first and processes them one at a
//! time. Sweeps are single-flight: a sweep requested while another is running
//! returns immediately, while manual entry points (retry-all, reclassify,
//! manual conversion) wait for the running sweep and then hold the same
//! guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use triage_core::{
    defaults, Capture, CaptureFilter, CaptureRepository, CaptureStatus, ClassifierClient,
    ContainerType, EntityRepository, Error, PreferenceRepository, QueueStats, Result,
};
use triage_inference::ClassificationEngine;
use triage_memory::{AssociationBuilder, PreferenceMemory};

use crate::backoff::BackoffPolicy;
use crate::conversion::{ConversionEngine, ConversionOutcome};
use crate::network::NetworkMonitor;
use crate::pipeline::{CaptureProcessor, ProcessOutcome};

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

/// Configuration for the queue scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the background loop runs at all.
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// Pause between two captures of the same sweep.
    pub inter_item_delay_ms: u64,
    /// Failed attempts before a capture is marked failed.
    pub max_retries: i32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Upper bound on a single classifier call.
    pub classify_timeout_secs: u64,
    /// Link converted captures to related ones.
    pub associations: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            inter_item_delay_ms: defaults::INTER_ITEM_DELAY_MS,
            max_retries: defaults::MAX_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_cap_ms: defaults::BACKOFF_CAP_MS,
            classify_timeout_secs: defaults::CLASSIFY_TIMEOUT_SECS,
            associations: true,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TRIAGE_SCHEDULER_ENABLED` | `true` | Run the background loop |
    /// | `TRIAGE_POLL_INTERVAL_MS` | `10000` | Interval between sweeps |
    /// | `TRIAGE_INTER_ITEM_DELAY_MS` | `500` | Pause between captures |
    /// | `TRIAGE_MAX_RETRIES` | `5` | Attempts before a capture fails |
    /// | `TRIAGE_BACKOFF_BASE_MS` | `5000` | Backoff base |
    /// | `TRIAGE_BACKOFF_CAP_MS` | `60000` | Backoff cap |
    /// | `TRIAGE_CLASSIFY_TIMEOUT_SECS` | `30` | Classifier call timeout |
    /// | `TRIAGE_ASSOCIATIONS` | `true` | Build related-capture links |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: env_flag("TRIAGE_SCHEDULER_ENABLED", d.enabled),
            poll_interval_ms: env_parse("TRIAGE_POLL_INTERVAL_MS", d.poll_interval_ms),
            inter_item_delay_ms: env_parse("TRIAGE_INTER_ITEM_DELAY_MS", d.inter_item_delay_ms),
            max_retries: env_parse("TRIAGE_MAX_RETRIES", d.max_retries).max(1),
            backoff_base_ms: env_parse("TRIAGE_BACKOFF_BASE_MS", d.backoff_base_ms),
            backoff_cap_ms: env_parse("TRIAGE_BACKOFF_CAP_MS", d.backoff_cap_ms),
            classify_timeout_secs: env_parse(
                "TRIAGE_CLASSIFY_TIMEOUT_SECS",
                d.classify_timeout_secs,
            )
            .max(1),
            associations: env_flag("TRIAGE_ASSOCIATIONS", d.associations),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_inter_item_delay(mut self, ms: u64) -> Self {
        self.inter_item_delay_ms = ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    pub fn with_classify_timeout(mut self, secs: u64) -> Self {
        self.classify_timeout_secs = secs;
        self
    }

    pub fn with_associations(mut self, associations: bool) -> Self {
        self.associations = associations;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }
}

/// Why a sweep did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another sweep holds the guard.
    AlreadyRunning,
    /// The classifier has no credential.
    NotConfigured,
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending captures with retry budget left.
    pub eligible: usize,
    /// Eligible captures still inside their backoff window.
    pub deferred: usize,
    pub confirmed: usize,
    pub retry_scheduled: usize,
    pub failed: usize,
    /// Captures left untouched because processing hit a storage error.
    pub errors: usize,
    /// The classifier rejected its credential mid-sweep.
    pub aborted: bool,
    pub duration_ms: u64,
}

impl SweepReport {
    pub fn processed(&self) -> usize {
        self.confirmed + self.retry_scheduled + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Skipped(SkipReason),
    Completed(SweepReport),
}

impl SweepOutcome {
    pub fn report(&self) -> Option<&SweepReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    SchedulerStarted,
    SchedulerStopped,
    /// A sweep found captures to process.
    SweepStarted { pending: usize },
    SweepCompleted { report: SweepReport },
    SweepSkipped { reason: SkipReason },
    CaptureConfirmed {
        capture_id: Uuid,
        container: ContainerType,
    },
    RetryScheduled {
        capture_id: Uuid,
        retry_count: i32,
        error: String,
    },
    CaptureFailed {
        capture_id: Uuid,
        retry_count: i32,
        error: String,
    },
}

/// Releases the single-flight flag on drop, including on panic or
/// cancellation of the holder.
struct SweepGuard<'a> {
    running: &'a AtomicBool,
    idle: &'a Notify,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

/// Drives pending captures through classification and conversion.
pub struct QueueScheduler {
    captures: Arc<dyn CaptureRepository>,
    engine: Arc<ClassificationEngine>,
    memory: Arc<PreferenceMemory>,
    conversion: Arc<ConversionEngine>,
    processor: CaptureProcessor,
    config: SchedulerConfig,
    backoff: BackoffPolicy,
    running: AtomicBool,
    idle: Notify,
    wake: Notify,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl QueueScheduler {
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<PreferenceMemory> {
        &self.memory
    }

    /// Whether a sweep or manual operation currently holds the guard.
    pub fn is_sweeping(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn try_begin(&self) -> Option<SweepGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SweepGuard {
                running: &self.running,
                idle: &self.idle,
            })
    }

    /// Wait for the guard.
    async fn begin(&self) -> SweepGuard<'_> {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if let Some(guard) = self.try_begin() {
                return guard;
            }
            debug!(subsystem = "jobs", component = "scheduler", "Waiting for in-flight sweep");
            idle.await;
        }
    }

    /// Run one sweep unless one is already in progress.
    pub async fn process_queue(&self) -> Result<SweepOutcome> {
        let Some(_guard) = self.try_begin() else {
            debug!(subsystem = "jobs", component = "scheduler", "Sweep already running, skipping");
            self.emit(SchedulerEvent::SweepSkipped {
                reason: SkipReason::AlreadyRunning,
            });
            return Ok(SweepOutcome::Skipped(SkipReason::AlreadyRunning));
        };
        self.sweep().await
    }

    /// Sweep body. The caller holds the guard.
    async fn sweep(&self) -> Result<SweepOutcome> {
        if !self.engine.is_configured() {
            debug!(subsystem = "jobs", component = "scheduler", "Classifier not configured, skipping sweep");
            self.emit(SchedulerEvent::SweepSkipped {
                reason: SkipReason::NotConfigured,
            });
            return Ok(SweepOutcome::Skipped(SkipReason::NotConfigured));
        }

        let start = Instant::now();
        let max_retries = self.config.max_retries;
        let eligible = self
            .captures
            .list(CaptureFilter::eligible(max_retries))
            .await?;

        let now = Utc::now();
        let mut report = SweepReport {
            eligible: eligible.len(),
            ..SweepReport::default()
        };
        let due: Vec<Capture> = eligible
            .into_iter()
            .filter(|c| self.backoff.is_due(c, now))
            .collect();
        report.deferred = report.eligible - due.len();

        if due.is_empty() {
            debug!(
                subsystem = "jobs",
                component = "scheduler",
                deferred = report.deferred,
                "Nothing due"
            );
            return Ok(SweepOutcome::Completed(report));
        }

        info!(
            subsystem = "jobs",
            component = "scheduler",
            pending_count = due.len(),
            deferred = report.deferred,
            "Sweep started"
        );
        self.emit(SchedulerEvent::SweepStarted { pending: due.len() });

        let delay = Duration::from_millis(self.config.inter_item_delay_ms);
        for (i, listed) in due.into_iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                sleep(delay).await;
            }

            // The listing may be stale by now.
            let capture = match self.captures.get(listed.id).await {
                Ok(Some(c)) if c.is_eligible(max_retries) => c,
                Ok(_) => {
                    debug!(capture_id = %listed.id, "Capture changed since listing, skipping");
                    continue;
                }
                Err(e) => {
                    error!(capture_id = %listed.id, error = %e, "Failed to load capture");
                    report.errors += 1;
                    continue;
                }
            };

            match self.processor.process(capture).await {
                Ok(outcome) => self.record_outcome(&mut report, outcome),
                Err(e) if e.is_configuration_missing() => {
                    warn!(
                        subsystem = "jobs",
                        component = "scheduler",
                        error = %e,
                        "Classifier rejected its configuration, ending sweep"
                    );
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "scheduler",
                        capture_id = %listed.id,
                        error = %e,
                        "Processing aborted, capture left untouched"
                    );
                    report.errors += 1;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "jobs",
            component = "scheduler",
            confirmed_count = report.confirmed,
            retry_scheduled = report.retry_scheduled,
            failed_count = report.failed,
            errors = report.errors,
            duration_ms = report.duration_ms,
            "Sweep completed"
        );
        self.emit(SchedulerEvent::SweepCompleted {
            report: report.clone(),
        });
        Ok(SweepOutcome::Completed(report))
    }

    fn record_outcome(&self, report: &mut SweepReport, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Confirmed { .. } => report.confirmed += 1,
            ProcessOutcome::WillRetry { .. } => report.retry_scheduled += 1,
            ProcessOutcome::Failed { .. } => report.failed += 1,
        }
        self.emit_outcome(outcome);
    }

    fn emit_outcome(&self, outcome: ProcessOutcome) {
        let event = match outcome {
            ProcessOutcome::Confirmed {
                capture_id,
                container,
                ..
            } => SchedulerEvent::CaptureConfirmed {
                capture_id,
                container,
            },
            ProcessOutcome::WillRetry {
                capture_id,
                retry_count,
                error,
            } => SchedulerEvent::RetryScheduled {
                capture_id,
                retry_count,
                error,
            },
            ProcessOutcome::Failed {
                capture_id,
                retry_count,
                error,
            } => SchedulerEvent::CaptureFailed {
                capture_id,
                retry_count,
                error,
            },
        };
        self.emit(event);
    }

    /// Reset every failed capture to pending with a fresh retry budget, then
    /// sweep immediately.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "retry_failed"))]
    pub async fn retry_failed_items(&self) -> Result<SweepOutcome> {
        let _guard = self.begin().await;

        let mut failed = self
            .captures
            .list(CaptureFilter::with_status(CaptureStatus::Failed))
            .await?;
        for capture in failed.iter_mut() {
            capture.reset_for_retry()?;
        }
        if !failed.is_empty() {
            self.captures.save_all(&failed).await?;
            info!(count = failed.len(), "Failed captures reset to pending");
        }

        self.sweep().await
    }

    /// Put a capture back into the queue and classify it right away.
    ///
    /// The reset is persisted first, so a failed attempt leaves the capture
    /// pending for the next sweep.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "reclassify"))]
    pub async fn reclassify(&self, capture_id: Uuid) -> Result<ProcessOutcome> {
        let _guard = self.begin().await;

        let mut capture = self
            .captures
            .get(capture_id)
            .await?
            .ok_or(Error::CaptureNotFound(capture_id))?;
        capture.begin_reclassify()?;
        self.captures.save(&capture).await?;

        if !self.engine.is_configured() {
            return Err(Error::ConfigurationMissing("classifier API key".to_string()));
        }
        let outcome = self.processor.process(capture).await?;
        self.emit_outcome(outcome.clone());
        Ok(outcome)
    }

    /// Move a capture to `container` on the user's behalf.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "scheduler", op = "manual_convert"))]
    pub async fn manual_convert(
        &self,
        capture_id: Uuid,
        container: ContainerType,
    ) -> Result<ConversionOutcome> {
        let _guard = self.begin().await;

        let mut capture = self
            .captures
            .get(capture_id)
            .await?
            .ok_or(Error::CaptureNotFound(capture_id))?;
        let outcome = self.conversion.manual_convert(&mut capture, container).await?;
        self.emit(SchedulerEvent::CaptureConfirmed {
            capture_id,
            container,
        });
        Ok(outcome)
    }

    /// Live captures linked to `capture_id`.
    pub async fn related_captures(&self, capture_id: Uuid) -> Result<Vec<Capture>> {
        let capture = self
            .captures
            .get(capture_id)
            .await?
            .ok_or(Error::CaptureNotFound(capture_id))?;
        AssociationBuilder::new(self.captures.clone())
            .related_captures(&capture)
            .await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.captures.count_by_status().await
    }

    /// Wake the background loop for an immediate sweep.
    pub fn trigger_sweep(&self) {
        self.wake.notify_one();
    }

    /// Sweep out of band whenever `monitor` sees the network come back.
    pub fn attach_network(self: &Arc<Self>, monitor: &NetworkMonitor) {
        let scheduler = Arc::clone(self);
        monitor.on_restored(move || {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                match scheduler.process_queue().await {
                    Ok(outcome) => debug!(?outcome, "Network restore sweep finished"),
                    Err(e) => error!(error = %e, "Network restore sweep failed"),
                }
            });
        });
    }

    /// Start the background loop and return a handle for control.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let task = tokio::spawn(Arc::clone(&self).run(shutdown_rx));

        SchedulerHandle {
            scheduler: self,
            shutdown_tx,
            event_rx,
            task,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "scheduler"))]
    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Queue scheduler is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            inter_item_delay_ms = self.config.inter_item_delay_ms,
            max_retries = self.config.max_retries,
            model = %self.engine.client().model_name(),
            "Queue scheduler started"
        );
        self.emit(SchedulerEvent::SchedulerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if let Err(e) = self.process_queue().await {
                error!(error = %e, "Sweep failed");
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Queue scheduler received shutdown signal");
                    break;
                }
                _ = self.wake.notified() => {
                    debug!("Immediate sweep requested");
                }
                _ = sleep(poll_interval) => {}
            }
        }

        self.emit(SchedulerEvent::SchedulerStopped);
        info!("Queue scheduler stopped");
    }
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    scheduler: Arc<QueueScheduler>,
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &Arc<QueueScheduler> {
        &self.scheduler
    }

    /// Ask the loop for an immediate sweep.
    pub fn trigger_sweep(&self) {
        self.scheduler.trigger_sweep();
    }

    /// Signal the loop to stop after its current sweep.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown_tx.send(()).await.is_err() && !self.task.is_finished() {
            return Err(Error::Internal("Failed to send shutdown signal".into()));
        }
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Scheduler task failed: {}", e)))
    }
}

/// Wires repositories and a classifier client into a [`QueueScheduler`].
pub struct SchedulerBuilder {
    captures: Arc<dyn CaptureRepository>,
    entities: Arc<dyn EntityRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    client: Arc<dyn ClassifierClient>,
    config: SchedulerConfig,
    memory: Option<Arc<PreferenceMemory>>,
}

impl SchedulerBuilder {
    pub fn new(
        captures: Arc<dyn CaptureRepository>,
        entities: Arc<dyn EntityRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        client: Arc<dyn ClassifierClient>,
    ) -> Self {
        Self {
            captures,
            entities,
            preferences,
            client,
            config: SchedulerConfig::default(),
            memory: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a preference memory with other components.
    pub fn with_memory(mut self, memory: Arc<PreferenceMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn build(self) -> QueueScheduler {
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(PreferenceMemory::new(self.preferences.clone())));
        let engine = Arc::new(ClassificationEngine::new(self.client));

        let mut conversion =
            ConversionEngine::new(self.captures.clone(), self.entities, memory.clone());
        if self.config.associations {
            conversion = conversion.with_associations(AssociationBuilder::new(self.captures.clone()));
        }
        let conversion = Arc::new(conversion);

        let processor = CaptureProcessor::new(
            self.captures.clone(),
            engine.clone(),
            memory.clone(),
            conversion.clone(),
        )
        .with_max_retries(self.config.max_retries)
        .with_classify_timeout(Duration::from_secs(self.config.classify_timeout_secs));

        let (event_tx, _) = broadcast::channel(defaults::EVENT_CHANNEL_CAPACITY);

        QueueScheduler {
            captures: self.captures,
            engine,
            memory,
            conversion,
            processor,
            backoff: self.config.backoff(),
            config: self.config,
            running: AtomicBool::new(false),
            idle: Notify::new(),
            wake: Notify::new(),
            event_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.inter_item_delay_ms, 500);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.classify_timeout_secs, 30);
        assert!(config.associations);
    }

    #[test]
    fn test_config_builders() {
        let config = SchedulerConfig::default()
            .with_enabled(false)
            .with_poll_interval(250)
            .with_inter_item_delay(0)
            .with_max_retries(3)
            .with_backoff(100, 400)
            .with_classify_timeout(2)
            .with_associations(false);

        assert!(!config.enabled);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.inter_item_delay_ms, 0);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff().delay(5), Duration::from_millis(400));
        assert_eq!(config.classify_timeout_secs, 2);
        assert!(!config.associations);
    }

    #[test]
    fn test_report_processed_count() {
        let report = SweepReport {
            confirmed: 2,
            retry_scheduled: 1,
            failed: 1,
            errors: 3,
            ..SweepReport::default()
        };
        assert_eq!(report.processed(), 4);
    }

    #[test]
    fn test_sweep_outcome_accessors() {
        let skipped = SweepOutcome::Skipped(SkipReason::AlreadyRunning);
        assert!(skipped.is_skipped());
        assert!(skipped.report().is_none());

        let done = SweepOutcome::Completed(SweepReport::default());
        assert!(!done.is_skipped());
        assert_eq!(done.report().map(|r| r.eligible), Some(0));
    }
}
