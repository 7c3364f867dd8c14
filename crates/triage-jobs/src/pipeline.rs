//! Processing of a single pending capture.
//!
//! context → classify (bounded) → adjust → convert → learn. Classification
//! and conversion failures become retry bookkeeping on the capture. Two
//! errors escape instead: a missing configuration, which ends the sweep, and
//! storage failures, which leave the stored capture and the preference
//! memory exactly as they were. Memory is only written once the conversion
//! has committed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use triage_core::{
    Capture, CaptureRepository, Classification, ContainerType, Error, FailureDisposition, Result,
};
use triage_inference::ClassificationEngine;
use triage_memory::PreferenceMemory;

use crate::conversion::{ConversionEngine, ConversionOutcome};

/// What happened to one capture.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Confirmed {
        capture_id: Uuid,
        container: ContainerType,
        conversion: ConversionOutcome,
    },
    /// Failed attempt with retries left; the capture stays pending.
    WillRetry {
        capture_id: Uuid,
        retry_count: i32,
        error: String,
    },
    /// Failed attempt that exhausted the capture.
    Failed {
        capture_id: Uuid,
        retry_count: i32,
        error: String,
    },
}

/// Classifies and converts captures one at a time.
pub struct CaptureProcessor {
    captures: Arc<dyn CaptureRepository>,
    engine: Arc<ClassificationEngine>,
    memory: Arc<PreferenceMemory>,
    conversion: Arc<ConversionEngine>,
    max_retries: i32,
    classify_timeout: Duration,
}

impl CaptureProcessor {
    pub fn new(
        captures: Arc<dyn CaptureRepository>,
        engine: Arc<ClassificationEngine>,
        memory: Arc<PreferenceMemory>,
        conversion: Arc<ConversionEngine>,
    ) -> Self {
        Self {
            captures,
            engine,
            memory,
            conversion,
            max_retries: triage_core::defaults::MAX_RETRIES,
            classify_timeout: Duration::from_secs(triage_core::defaults::CLASSIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = timeout;
        self
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Process one pending capture.
    pub async fn process(&self, capture: Capture) -> Result<ProcessOutcome> {
        let start = Instant::now();
        let capture_id = capture.id;

        let classification = match self.classify(&capture).await {
            Ok(c) => c,
            Err(e) if e.is_configuration_missing() || e.is_storage() => return Err(e),
            Err(e) => return self.record_failure(capture, e).await,
        };

        let mut working = capture.clone();
        working.mark_succeeded();
        let plan = self
            .memory
            .plan_adjustment(&working.content, classification)
            .await?;
        let adjusted = plan.classification;

        match self.conversion.auto_convert(&mut working, &adjusted).await {
            Ok(conversion) => {
                self.learn(&working.content, capture_id, plan.matched).await;
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    capture_id = %capture_id,
                    container = %adjusted.container,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Capture confirmed"
                );
                Ok(ProcessOutcome::Confirmed {
                    capture_id,
                    container: adjusted.container,
                    conversion,
                })
            }
            Err(e) if e.is_storage() => Err(e),
            Err(e) => self.record_failure(capture, e).await,
        }
    }

    /// Memory updates for a converted capture. The capture is already
    /// confirmed, so failures here are logged rather than returned.
    async fn learn(&self, content: &str, capture_id: Uuid, matched: Option<Uuid>) {
        if let Some(id) = matched {
            if let Err(e) = self.memory.record_match(id).await {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    capture_id = %capture_id,
                    error = %e,
                    "Failed to count preference use"
                );
            }
        }
        if let Err(e) = self.memory.observe(content, Some(capture_id)).await {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                capture_id = %capture_id,
                error = %e,
                "Failed to record observed keywords"
            );
        }
    }

    async fn classify(&self, capture: &Capture) -> Result<Classification> {
        let context = self.memory.context_for(&capture.content).await?;
        debug!(
            subsystem = "jobs",
            component = "pipeline",
            capture_id = %capture.id,
            has_context = context.is_some(),
            "Classifying capture"
        );

        let call = self.engine.classify(&capture.content, context.as_deref());
        match tokio::time::timeout(self.classify_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::NetworkUnavailable(format!(
                "classification timed out after {}s",
                self.classify_timeout.as_secs()
            ))),
        }
    }

    /// Count a failed attempt against the pre-attempt capture and persist it.
    async fn record_failure(&self, mut capture: Capture, error: Error) -> Result<ProcessOutcome> {
        let message = error.to_string();
        let disposition =
            capture.record_failure(&message, self.max_retries, error.is_retryable(), Utc::now())?;
        self.captures.save(&capture).await?;

        match disposition {
            FailureDisposition::WillRetry => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    capture_id = %capture.id,
                    retry_count = capture.retry_count,
                    error = %message,
                    "Classification attempt failed, will retry"
                );
                Ok(ProcessOutcome::WillRetry {
                    capture_id: capture.id,
                    retry_count: capture.retry_count,
                    error: message,
                })
            }
            FailureDisposition::Failed => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    capture_id = %capture.id,
                    retry_count = capture.retry_count,
                    retryable = error.is_retryable(),
                    error = %message,
                    "Capture failed"
                );
                Ok(ProcessOutcome::Failed {
                    capture_id: capture.id,
                    retry_count: capture.retry_count,
                    error: message,
                })
            }
        }
    }
}
