//! # triage-jobs
//!
//! Background processing of captured text.
//!
//! This crate provides:
//! - A single-flight queue scheduler with per-capture exponential backoff
//! - The per-capture pipeline (context, classification, memory adjustment)
//! - Idempotent conversion into calendar events, todos and notes
//! - A network monitor that triggers an immediate sweep on reconnect
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use triage_db::Database;
//! use triage_inference::OpenAIClassifier;
//! use triage_jobs::{NetworkMonitor, SchedulerBuilder, SchedulerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let scheduler = Arc::new(
//!     SchedulerBuilder::new(
//!         Arc::new(db.captures),
//!         Arc::new(db.entities),
//!         Arc::new(db.preferences),
//!         Arc::new(OpenAIClassifier::from_env()?),
//!     )
//!     .with_config(SchedulerConfig::from_env())
//!     .build(),
//! );
//!
//! let monitor = NetworkMonitor::default();
//! scheduler.attach_network(&monitor);
//!
//! let handle = scheduler.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! handle.shutdown().await?;
//! ```

pub mod backoff;
pub mod conversion;
pub mod network;
pub mod pipeline;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use conversion::{build_entity, ConversionEngine, ConversionOutcome};
pub use network::NetworkMonitor;
pub use pipeline::{CaptureProcessor, ProcessOutcome};
pub use scheduler::{
    QueueScheduler, SchedulerBuilder, SchedulerConfig, SchedulerEvent, SchedulerHandle,
    SkipReason, SweepOutcome, SweepReport,
};
