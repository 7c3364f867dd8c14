//! Centralized default constants for triage.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in the other crates start from these and may be overridden
//! through environment variables or `with_*` builders.

// =============================================================================
// QUEUE SCHEDULER
// =============================================================================

/// Fixed interval between background sweeps (ms).
pub const POLL_INTERVAL_MS: u64 = 10_000;

/// Pause between two items of the same sweep (ms).
pub const INTER_ITEM_DELAY_MS: u64 = 500;

/// Failed attempts after which a capture moves to `Failed`.
pub const MAX_RETRIES: i32 = 5;

/// Backoff base delay (ms). Delay for retry n is `base * 2^n`.
pub const BACKOFF_BASE_MS: u64 = 5_000;

/// Upper bound on a single backoff delay (ms).
pub const BACKOFF_CAP_MS: u64 = 60_000;

/// Upper bound on one classifier call made by the pipeline (seconds).
pub const CLASSIFY_TIMEOUT_SECS: u64 = 30;

/// Capacity of the scheduler event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// CLASSIFIER
// =============================================================================

/// Default OpenAI-compatible endpoint.
pub const LLM_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Default classifier model.
pub const LLM_MODEL: &str = "qwen-plus";

/// HTTP client timeout for classifier requests (seconds).
pub const LLM_TIMEOUT_SECS: u64 = 60;

/// Sampling temperature for classification requests.
pub const LLM_TEMPERATURE: f32 = 0.3;

/// Response token budget for a classification request.
pub const LLM_MAX_TOKENS: u32 = 500;

// =============================================================================
// PREFERENCE MEMORY
// =============================================================================

/// Usage count at which a container preference overrides the classifier.
pub const OVERRIDE_THRESHOLD: i32 = 3;

/// Usage count at which a container preference is offered as a suggestion.
pub const SUGGEST_THRESHOLD: i32 = 2;

/// Shortest generic keyword token (chars).
pub const KEYWORD_MIN_CHARS: usize = 2;

/// Longest generic keyword token (chars).
pub const KEYWORD_MAX_CHARS: usize = 8;

/// Generic tokens taken before CJK runs when combining keyword lists.
pub const KEYWORD_TOKEN_PREFIX: usize = 5;

/// CJK runs taken when combining keyword lists.
pub const KEYWORD_CJK_PREFIX: usize = 5;

/// Keywords kept per text after dedupe.
pub const KEYWORD_LIMIT: usize = 8;

/// Minimum usage for a keyword-kind entry to appear in the context block.
pub const CONTEXT_KEYWORD_MIN_USAGE: i32 = 3;

/// Entries listed per section of the context block.
pub const CONTEXT_SECTION_LIMIT: usize = 10;

// =============================================================================
// CONVERSION
// =============================================================================

/// Characters of content used as a title when no summary exists.
pub const TITLE_MAX_CHARS: usize = 50;

/// Default calendar event length (seconds).
pub const EVENT_DURATION_SECS: i64 = 3_600;

/// Related captures kept per capture.
pub const ASSOCIATION_LIMIT: usize = 5;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL.
pub const DATABASE_URL: &str = "postgres://localhost/triage";

/// Maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Minimum idle pool connections.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Pool acquire timeout (seconds).
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// DAEMON
// =============================================================================

/// Connectivity health check period (seconds).
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 15;
