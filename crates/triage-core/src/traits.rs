//! Core traits for triage abstractions.
//!
//! These traits define the collaborator boundaries: persistence and the
//! remote classifier. Concrete implementations live in `triage-db` and
//! `triage-inference`; tests plug in their own.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CAPTURE REPOSITORY
// =============================================================================

/// Durable store of captures.
#[async_trait]
pub trait CaptureRepository: Send + Sync {
    /// Insert a new capture.
    async fn insert(&self, capture: &Capture) -> Result<()>;

    /// Get a capture by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Capture>>;

    /// Get the captures that still exist among `ids`. Missing ids are skipped.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Capture>>;

    /// List captures matching `filter`, ordered by creation time ascending
    /// (ties broken by id).
    async fn list(&self, filter: CaptureFilter) -> Result<Vec<Capture>>;

    /// Persist an existing capture. Fails with `CaptureNotFound` if absent.
    async fn save(&self, capture: &Capture) -> Result<()>;

    /// Persist several captures atomically: all or none.
    async fn save_all(&self, captures: &[Capture]) -> Result<()>;

    /// Delete a capture. Typed entities it spawned are left alone.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Count captures per status.
    async fn count_by_status(&self) -> Result<QueueStats>;
}

// =============================================================================
// PREFERENCE REPOSITORY
// =============================================================================

/// Store of learned memory entries.
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// List entries, optionally of one kind, ordered by usage count
    /// descending then insertion order.
    async fn list(&self, kind: Option<MemoryKind>) -> Result<Vec<PreferenceEntry>>;

    /// Insert or update entries atomically, keyed by id.
    async fn save_all(&self, entries: &[PreferenceEntry]) -> Result<()>;
}

// =============================================================================
// ENTITY REPOSITORY
// =============================================================================

/// Store of calendar events, todos and notes.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Typed entities whose back-reference is `capture_id`.
    async fn find_by_capture(&self, capture_id: Uuid) -> Result<Vec<TypedEntity>>;

    /// Insert `entity` and persist `captures` in a single transaction.
    ///
    /// `captures` holds the source capture plus any capture whose related
    /// links changed as part of the conversion.
    async fn materialize(&self, entity: &TypedEntity, captures: &[Capture]) -> Result<()>;

    async fn list_calendar_events(&self) -> Result<Vec<CalendarEvent>>;

    async fn list_todos(&self) -> Result<Vec<TodoItem>>;

    async fn list_notes(&self) -> Result<Vec<Note>>;
}

// =============================================================================
// CLASSIFIER CLIENT
// =============================================================================

/// Remote model that turns capture text into a classification payload.
#[async_trait]
pub trait ClassifierClient: Send + Sync {
    /// Whether a credential is present. Never makes a call.
    fn is_configured(&self) -> bool;

    /// Send one request and return the raw text of the model's answer.
    async fn classify(&self, system_prompt: &str, user_text: &str) -> Result<String>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Cheap reachability check.
    async fn health_check(&self) -> Result<bool> {
        Ok(self.is_configured())
    }
}
