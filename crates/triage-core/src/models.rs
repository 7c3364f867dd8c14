//! Core data models for triage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::uuid_utils::new_v7;

// =============================================================================
// CONTAINER & PRIORITY
// =============================================================================

/// Destination kind for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Calendar,
    Todo,
    Note,
}

impl ContainerType {
    pub const ALL: [ContainerType; 3] = [Self::Calendar, Self::Todo, Self::Note];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Todo => "todo",
            Self::Note => "note",
        }
    }

    /// Parse a tag produced by the classifier. Unknown tags become `Note`.
    pub fn from_tag_lenient(tag: &str) -> Self {
        tag.parse().unwrap_or(Self::Note)
    }

    /// Human-readable label used in prompts and context hints.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Calendar => "日程",
            Self::Todo => "待办",
            Self::Note => "笔记",
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContainerType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "calendar" => Ok(Self::Calendar),
            "todo" => Ok(Self::Todo),
            "note" => Ok(Self::Note),
            _ => Err(format!("Invalid container type: {}", s)),
        }
    }
}

/// Priority suggested for a capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Important,
    #[default]
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Important => "important",
            Self::Normal => "normal",
        }
    }

    /// Parse a tag produced by the classifier. Unknown tags become `Normal`.
    pub fn from_tag_lenient(tag: &str) -> Self {
        tag.parse().unwrap_or_default()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "important" => Ok(Self::Important),
            "normal" => Ok(Self::Normal),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

// =============================================================================
// CAPTURE
// =============================================================================

/// Lifecycle status of a capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    /// New or reset for retry; eligible for scheduler pickup.
    #[default]
    Pending,
    /// Classified but not yet materialized. Reserved for a confirmation step.
    Classified,
    /// A typed entity exists for this capture.
    Confirmed,
    /// Retry budget exhausted or non-retryable error; waits for a reset.
    Failed,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Classified => "classified",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Pending` and `Confirmed` are reachable from anywhere (retry reset,
    /// reclassify, manual conversion). `Classified` only follows `Pending`,
    /// and `Failed` only follows an attempt.
    pub fn can_transition_to(self, next: CaptureStatus) -> bool {
        match next {
            Self::Pending | Self::Confirmed => true,
            Self::Classified => self == Self::Pending,
            Self::Failed => matches!(self, Self::Pending | Self::Classified),
        }
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CaptureStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "classified" => Ok(Self::Classified),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid capture status: {}", s)),
        }
    }
}

/// Result of recording a failed attempt on a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still pending; a later sweep retries once the backoff window passes.
    WillRetry,
    /// Moved to `Failed`; no longer polled automatically.
    Failed,
}

/// A unit of captured user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: Uuid,
    pub content: String,
    pub status: CaptureStatus,
    pub container: Option<ContainerType>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Time of the most recent failed attempt, used to derive backoff.
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub extracted_time: Option<DateTime<Utc>>,
    pub suggested_priority: Priority,
    pub summary: Option<String>,
    /// Soft links to captures sharing keywords. Ids may go stale.
    pub related_capture_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Capture {
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_v7(),
            content: content.into(),
            status: CaptureStatus::Pending,
            container: None,
            retry_count: 0,
            last_error: None,
            last_attempt_at: None,
            extracted_time: None,
            suggested_priority: Priority::Normal,
            summary: None,
            related_capture_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending with retry budget left.
    pub fn is_eligible(&self, max_retries: i32) -> bool {
        self.status == CaptureStatus::Pending && self.retry_count < max_retries
    }

    fn transition(&mut self, next: CaptureStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition(format!(
                "capture {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Copy classification output onto the capture.
    pub fn apply_classification(&mut self, classification: &Classification) {
        self.extracted_time = classification.extracted_time;
        self.suggested_priority = classification.suggested_priority;
        self.summary = Some(classification.summary.clone()).filter(|s| !s.trim().is_empty());
        self.updated_at = Utc::now();
    }

    /// Clear failure bookkeeping after a successful classification.
    pub fn mark_succeeded(&mut self) {
        self.retry_count = 0;
        self.last_error = None;
        self.last_attempt_at = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_confirmed(&mut self, container: ContainerType) -> Result<()> {
        self.transition(CaptureStatus::Confirmed)?;
        self.container = Some(container);
        self.last_error = None;
        Ok(())
    }

    /// Count a failed attempt.
    ///
    /// The capture moves to `Failed` when the error is not retryable or the
    /// retry count reaches `max_retries`, so a pending capture never carries
    /// a retry count at or above the maximum.
    pub fn record_failure(
        &mut self,
        message: impl Into<String>,
        max_retries: i32,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailureDisposition> {
        if self.status != CaptureStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "capture {} is {} and cannot record an attempt",
                self.id, self.status
            )));
        }
        self.retry_count += 1;
        self.last_error = Some(message.into());
        self.last_attempt_at = Some(now);
        self.updated_at = now;

        if !retryable || self.retry_count >= max_retries {
            self.status = CaptureStatus::Failed;
            Ok(FailureDisposition::Failed)
        } else {
            Ok(FailureDisposition::WillRetry)
        }
    }

    /// Move a failed capture back to pending with a fresh retry budget.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if self.status != CaptureStatus::Failed {
            return Err(Error::InvalidTransition(format!(
                "capture {} is {}, only failed captures can be reset",
                self.id, self.status
            )));
        }
        self.transition(CaptureStatus::Pending)?;
        self.retry_count = 0;
        self.last_error = None;
        self.last_attempt_at = None;
        Ok(())
    }

    /// Put any capture back into the queue for a fresh classification.
    pub fn begin_reclassify(&mut self) -> Result<()> {
        self.transition(CaptureStatus::Pending)?;
        self.retry_count = 0;
        self.last_error = None;
        self.last_attempt_at = None;
        Ok(())
    }

    /// Add a soft link. Returns false if it already existed or points at self.
    pub fn link_related(&mut self, other: Uuid) -> bool {
        if other == self.id || self.related_capture_ids.contains(&other) {
            return false;
        }
        self.related_capture_ids.push(other);
        self.updated_at = Utc::now();
        true
    }

    /// Summary if present, else the first characters of the content.
    pub fn title_fallback(&self) -> String {
        match self.summary.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => self
                .content
                .chars()
                .take(defaults::TITLE_MAX_CHARS)
                .collect(),
        }
    }
}

/// Predicate for listing captures. Results are always oldest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureFilter {
    pub status: Option<CaptureStatus>,
    /// Exclusive upper bound on retry count.
    pub retry_count_below: Option<i32>,
}

impl CaptureFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: CaptureStatus) -> Self {
        Self {
            status: Some(status),
            retry_count_below: None,
        }
    }

    /// Pending captures with retry budget left.
    pub fn eligible(max_retries: i32) -> Self {
        Self {
            status: Some(CaptureStatus::Pending),
            retry_count_below: Some(max_retries),
        }
    }

    pub fn matches(&self, capture: &Capture) -> bool {
        self.status.map_or(true, |s| capture.status == s)
            && self
                .retry_count_below
                .map_or(true, |max| capture.retry_count < max)
    }
}

/// Capture counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub classified: i64,
    pub confirmed: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.classified + self.confirmed + self.failed
    }

    pub fn add(&mut self, status: CaptureStatus, n: i64) {
        match status {
            CaptureStatus::Pending => self.pending += n,
            CaptureStatus::Classified => self.classified += n,
            CaptureStatus::Confirmed => self.confirmed += n,
            CaptureStatus::Failed => self.failed += n,
        }
    }
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Output of one classification attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub container: ContainerType,
    pub extracted_time: Option<DateTime<Utc>>,
    pub suggested_priority: Priority,
    pub summary: String,
    /// Reported by some models; not used for any decision.
    pub confidence: Option<f32>,
}

impl Classification {
    pub fn with_container(self, container: ContainerType) -> Self {
        Self { container, ..self }
    }

    pub fn with_priority(self, suggested_priority: Priority) -> Self {
        Self {
            suggested_priority,
            ..self
        }
    }
}

// =============================================================================
// PREFERENCE MEMORY
// =============================================================================

/// Kind of learned memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Container or priority bias learned from corrections.
    Preference,
    /// Frequency tracking of extracted keywords.
    Keyword,
    /// People mentioned in captures.
    Person,
    /// Project and product names.
    Context,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Keyword => "keyword",
            Self::Person => "person",
            Self::Context => "context",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(Self::Preference),
            "keyword" => Ok(Self::Keyword),
            "person" => Ok(Self::Person),
            "context" => Ok(Self::Context),
            _ => Err(format!("Invalid memory kind: {}", s)),
        }
    }
}

/// A learned association or observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceEntry {
    pub id: Uuid,
    pub kind: MemoryKind,
    pub keyword: String,
    pub description: String,
    pub associated_container: Option<ContainerType>,
    pub associated_priority: Option<Priority>,
    /// Starts at 1 on creation.
    pub usage_count: i32,
    pub is_active: bool,
    pub source_capture_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl PreferenceEntry {
    pub fn new(kind: MemoryKind, keyword: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_v7(),
            kind,
            keyword: keyword.into(),
            description: description.into(),
            associated_container: None,
            associated_priority: None,
            usage_count: 1,
            is_active: true,
            source_capture_id: None,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Preference steering `keyword` toward `container`.
    pub fn for_container(keyword: impl Into<String>, container: ContainerType) -> Self {
        let keyword = keyword.into();
        let description = format!(
            "包含「{}」的内容通常归类为{}",
            keyword,
            container.display_name()
        );
        Self {
            associated_container: Some(container),
            ..Self::new(MemoryKind::Preference, keyword, description)
        }
    }

    /// Preference steering `keyword` toward `priority`.
    pub fn for_priority(keyword: impl Into<String>, priority: Priority) -> Self {
        let keyword = keyword.into();
        let description = format!("包含「{}」的内容优先级为{}", keyword, priority);
        Self {
            associated_priority: Some(priority),
            ..Self::new(MemoryKind::Preference, keyword, description)
        }
    }

    pub fn with_source(mut self, capture_id: Uuid) -> Self {
        self.source_capture_id = Some(capture_id);
        self
    }

    /// Case-insensitive substring match against already-lowercased text.
    pub fn matches_lowercase(&self, text_lower: &str) -> bool {
        !self.keyword.is_empty() && text_lower.contains(&self.keyword.to_lowercase())
    }

    pub fn record_usage(&mut self, now: DateTime<Utc>) {
        self.usage_count += 1;
        self.last_used_at = now;
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

// =============================================================================
// TYPED ENTITIES
// =============================================================================

/// Calendar event materialized from a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_all_day: bool,
    pub priority: Priority,
    pub is_completed: bool,
    pub source_capture_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    /// Event of the default length starting at `start_at`.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        start_at: DateTime<Utc>,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_v7(),
            title: title.into(),
            description: description.into(),
            start_at,
            end_at: start_at + chrono::Duration::seconds(defaults::EVENT_DURATION_SECS),
            is_all_day: false,
            priority,
            is_completed: false,
            source_capture_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Todo item materialized from a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub source_capture_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TodoItem {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        due_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_v7(),
            title: title.into(),
            description: description.into(),
            priority,
            due_at,
            is_completed: false,
            completed_at: None,
            source_capture_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.is_completed = true;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_incomplete(&mut self) {
        self.is_completed = false;
        self.completed_at = None;
        self.updated_at = Utc::now();
    }
}

/// Note materialized from a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub source_capture_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(content: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_v7(),
            title: title.filter(|t| !t.trim().is_empty()),
            content: content.into(),
            tags: Vec::new(),
            source_capture_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Explicit title, or the first content line shortened to fit.
    pub fn display_title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        let first_line = self.content.lines().next().unwrap_or("").trim();
        let max = defaults::TITLE_MAX_CHARS;
        if first_line.chars().count() > max {
            let head: String = first_line.chars().take(max - 3).collect();
            format!("{}...", head)
        } else {
            first_line.to_string()
        }
    }
}

/// A typed entity of any container kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "container", rename_all = "lowercase")]
pub enum TypedEntity {
    Calendar(CalendarEvent),
    Todo(TodoItem),
    Note(Note),
}

impl TypedEntity {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Calendar(e) => e.id,
            Self::Todo(t) => t.id,
            Self::Note(n) => n.id,
        }
    }

    pub fn container(&self) -> ContainerType {
        match self {
            Self::Calendar(_) => ContainerType::Calendar,
            Self::Todo(_) => ContainerType::Todo,
            Self::Note(_) => ContainerType::Note,
        }
    }

    pub fn source_capture_id(&self) -> Option<Uuid> {
        match self {
            Self::Calendar(e) => e.source_capture_id,
            Self::Todo(t) => t.source_capture_id,
            Self::Note(n) => n.source_capture_id,
        }
    }

    /// Set the back-reference to the capture that spawned this entity.
    pub fn with_source(mut self, capture_id: Uuid) -> Self {
        match &mut self {
            Self::Calendar(e) => e.source_capture_id = Some(capture_id),
            Self::Todo(t) => t.source_capture_id = Some(capture_id),
            Self::Note(n) => n.source_capture_id = Some(capture_id),
        }
        self
    }
}
