//! Structured logging schema and field name constants for triage.
//!
//! All crates use these constants for consistent structured logging fields.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (item failed, will retry) |
//! | INFO  | Lifecycle events (startup, shutdown), sweep completions |
//! | DEBUG | Decision points (preference override, skip reasons) |
//! | TRACE | Per-item iteration, keyword lists, raw model output |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "memory", "jobs", "daemon"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "scheduler", "pipeline", "conversion", "openai", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "sweep", "classify", "convert", "record_correction"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Capture UUID being operated on.
pub const CAPTURE_ID: &str = "capture_id";

/// Container tag ("calendar", "todo", "note").
pub const CONTAINER: &str = "container";

/// Capture retry count after the current attempt.
pub const RETRY_COUNT: &str = "retry_count";

/// Preference keyword.
pub const KEYWORD: &str = "keyword";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of eligible captures found by a sweep.
pub const PENDING_COUNT: &str = "pending_count";

/// Number of captures confirmed by a sweep.
pub const CONFIRMED_COUNT: &str = "confirmed_count";

/// Number of captures that failed in a sweep.
pub const FAILED_COUNT: &str = "failed_count";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for classification.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
