//! Scripted classifier client for deterministic testing.
//!
//! ## Usage
//!
//! ```rust
//! use triage_inference::mock::{MockClassifier, MockFailure};
//!
//! let classifier = MockClassifier::new()
//!     .with_default_response(r#"{"container":"note","suggestedPriority":"normal","summary":"记录想法"}"#)
//!     .then_fail(MockFailure::Network)
//!     .then_respond(r#"{"container":"todo","suggestedPriority":"normal","summary":"是一个任务"}"#);
//! assert_eq!(classifier.call_count(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use triage_core::{ClassifierClient, Error, Result};

/// Failure a scripted call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Transport failure (`NetworkUnavailable`).
    Network,
    /// Remote service error (`Inference`).
    Service,
    /// Refused request (`Rejected`).
    Rejected,
    /// Credential refused (`ConfigurationMissing`).
    Unauthorized,
}

impl MockFailure {
    fn to_error(self) -> Error {
        match self {
            Self::Network => Error::NetworkUnavailable("mock: connection refused".into()),
            Self::Service => Error::Inference("mock: 503 service unavailable".into()),
            Self::Rejected => Error::Rejected("mock: context too long".into()),
            Self::Unauthorized => Error::ConfigurationMissing("mock: invalid key".into()),
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(MockFailure),
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system_prompt: String,
    pub user_text: String,
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<Reply>,
    default_reply: Reply,
    calls: Vec<MockCall>,
}

/// Classifier client answering from a script, then from a default reply.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the scheduler owns another.
#[derive(Clone)]
pub struct MockClassifier {
    state: Arc<Mutex<MockState>>,
    configured: Arc<AtomicBool>,
    healthy: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    latency: Duration,
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClassifier {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                default_reply: Reply::Text(
                    r#"{"container":"note","suggestedPriority":"normal","summary":"记录想法"}"#
                        .to_string(),
                ),
                calls: Vec::new(),
            })),
            configured: Arc::new(AtomicBool::new(true)),
            healthy: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            latency: Duration::ZERO,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reply used once the script is exhausted.
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        self.state().default_reply = Reply::Text(response.into());
        self
    }

    /// Fail every call once the script is exhausted.
    pub fn with_default_failure(self, failure: MockFailure) -> Self {
        self.state().default_reply = Reply::Fail(failure);
        self
    }

    /// Queue a successful reply.
    pub fn then_respond(self, response: impl Into<String>) -> Self {
        self.state().script.push_back(Reply::Text(response.into()));
        self
    }

    /// Queue a failing reply.
    pub fn then_fail(self, failure: MockFailure) -> Self {
        self.state().script.push_back(Reply::Fail(failure));
        self
    }

    /// Simulated time each call takes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn unconfigured(self) -> Self {
        self.set_configured(false);
        self
    }

    pub fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// User texts in call order.
    pub fn classified_texts(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .map(|c| c.user_text.clone())
            .collect()
    }

    /// Highest number of calls observed running at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifierClient for MockClassifier {
    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::SeqCst)
    }

    async fn classify(&self, system_prompt: &str, user_text: &str) -> Result<String> {
        let reply = {
            let mut state = self.state();
            state.calls.push(MockCall {
                system_prompt: system_prompt.to_string(),
                user_text: user_text.to_string(),
            });
            let default_reply = state.default_reply.clone();
            state.script.pop_front().unwrap_or(default_reply)
        };

        let now_running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(failure) => Err(failure.to_error()),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}
