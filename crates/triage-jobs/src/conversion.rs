//! Materialization of classified captures into typed entities.
//!
//! Conversion never decides retry policy. Errors are returned to the
//! caller, which owns the capture's failure bookkeeping.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use triage_core::{
    CalendarEvent, Capture, CaptureRepository, Classification, ContainerType, EntityRepository,
    Note, Result, TodoItem, TypedEntity,
};
use triage_memory::{AssociationBuilder, PreferenceMemory};

/// Result of a conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    /// A new entity was written.
    Created(TypedEntity),
    /// An entity of this container already references the capture; nothing
    /// new was written besides the capture itself.
    AlreadyMaterialized(TypedEntity),
}

impl ConversionOutcome {
    pub fn entity(&self) -> &TypedEntity {
        match self {
            Self::Created(e) | Self::AlreadyMaterialized(e) => e,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Build the typed entity for `capture` in `container`.
///
/// Titles fall back to the first 50 characters of the content when the
/// capture has no summary. Events without an extracted time start now.
pub fn build_entity(capture: &Capture, container: ContainerType) -> TypedEntity {
    let entity = match container {
        ContainerType::Calendar => TypedEntity::Calendar(CalendarEvent::new(
            capture.title_fallback(),
            capture.content.clone(),
            capture.extracted_time.unwrap_or_else(Utc::now),
            capture.suggested_priority,
        )),
        ContainerType::Todo => TypedEntity::Todo(TodoItem::new(
            capture.title_fallback(),
            capture.content.clone(),
            capture.suggested_priority,
            capture.extracted_time,
        )),
        ContainerType::Note => {
            TypedEntity::Note(Note::new(capture.content.clone(), capture.summary.clone()))
        }
    };
    entity.with_source(capture.id)
}

/// Turns captures into calendar events, todos and notes.
pub struct ConversionEngine {
    captures: Arc<dyn CaptureRepository>,
    entities: Arc<dyn EntityRepository>,
    memory: Arc<PreferenceMemory>,
    associations: Option<AssociationBuilder>,
}

impl ConversionEngine {
    pub fn new(
        captures: Arc<dyn CaptureRepository>,
        entities: Arc<dyn EntityRepository>,
        memory: Arc<PreferenceMemory>,
    ) -> Self {
        Self {
            captures,
            entities,
            memory,
            associations: None,
        }
    }

    /// Link each newly converted capture to related captures.
    pub fn with_associations(mut self, builder: AssociationBuilder) -> Self {
        self.associations = Some(builder);
        self
    }

    pub fn associations(&self) -> Option<&AssociationBuilder> {
        self.associations.as_ref()
    }

    /// Convert a capture using its (memory-adjusted) classification.
    ///
    /// Copies time, priority and summary onto `capture`, materializes the
    /// entity, and confirms the capture. On error nothing is persisted.
    #[instrument(
        skip(self, capture, classification),
        fields(subsystem = "conversion", capture_id = %capture.id, container = %classification.container)
    )]
    pub async fn auto_convert(
        &self,
        capture: &mut Capture,
        classification: &Classification,
    ) -> Result<ConversionOutcome> {
        capture.apply_classification(classification);
        self.convert(capture, classification.container).await
    }

    /// Move a capture to `container` on the user's behalf.
    ///
    /// A change from the capture's current container is recorded as a
    /// correction before anything is converted.
    #[instrument(
        skip(self, capture),
        fields(subsystem = "conversion", capture_id = %capture.id, container = %container)
    )]
    pub async fn manual_convert(
        &self,
        capture: &mut Capture,
        container: ContainerType,
    ) -> Result<ConversionOutcome> {
        if let Some(from) = capture.container {
            if from != container {
                self.memory
                    .record_correction(&capture.content, from, container, Some(capture.id))
                    .await?;
            }
        }
        self.convert(capture, container).await
    }

    async fn convert(
        &self,
        capture: &mut Capture,
        container: ContainerType,
    ) -> Result<ConversionOutcome> {
        let existing = self
            .entities
            .find_by_capture(capture.id)
            .await?
            .into_iter()
            .find(|e| e.container() == container);

        if let Some(entity) = existing {
            capture.mark_confirmed(container)?;
            self.captures.save(capture).await?;
            debug!(entity_id = %entity.id(), "Capture already materialized, skipping");
            return Ok(ConversionOutcome::AlreadyMaterialized(entity));
        }

        let entity = build_entity(capture, container);
        capture.mark_confirmed(container)?;

        let partners = match &self.associations {
            Some(builder) => builder.link(capture).await?,
            None => Vec::new(),
        };

        let mut touched = Vec::with_capacity(partners.len() + 1);
        touched.push(capture.clone());
        touched.extend(partners);
        self.entities.materialize(&entity, &touched).await?;

        info!(
            entity_id = %entity.id(),
            related = capture.related_capture_ids.len(),
            "Capture converted"
        );
        Ok(ConversionOutcome::Created(entity))
    }
}
