//! In-process store implementing every repository trait.
//!
//! Used by tests and by embedders that do not want PostgreSQL. Ordering and
//! uniqueness rules mirror the SQL schema: captures list oldest first,
//! preferences by usage then insertion order, and at most one typed entity
//! per table references a given capture.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use triage_core::{
    CalendarEvent, Capture, CaptureFilter, CaptureRepository, EntityRepository, Error, MemoryKind,
    Note, PreferenceEntry, PreferenceRepository, QueueStats, Result, TodoItem, TypedEntity,
};

#[derive(Default)]
struct Tables {
    captures: Vec<Capture>,
    preferences: Vec<PreferenceEntry>,
    events: Vec<CalendarEvent>,
    todos: Vec<TodoItem>,
    notes: Vec<Note>,
}

/// Thread-safe in-memory persistence.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("writes disabled".to_string()));
        }
        Ok(())
    }

    /// Number of typed entities referencing `capture_id`, across all tables.
    pub async fn entity_count_for(&self, capture_id: Uuid) -> usize {
        let tables = self.tables.read().await;
        let src = Some(capture_id);
        tables.events.iter().filter(|e| e.source_capture_id == src).count()
            + tables.todos.iter().filter(|t| t.source_capture_id == src).count()
            + tables.notes.iter().filter(|n| n.source_capture_id == src).count()
    }
}

fn sort_oldest_first(captures: &mut [Capture]) {
    captures.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl CaptureRepository for MemoryStore {
    async fn insert(&self, capture: &Capture) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if tables.captures.iter().any(|c| c.id == capture.id) {
            return Err(Error::Storage(format!("capture {} already exists", capture.id)));
        }
        tables.captures.push(capture.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Capture>> {
        let tables = self.tables.read().await;
        Ok(tables.captures.iter().find(|c| c.id == id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Capture>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Capture> = tables
            .captures
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect();
        sort_oldest_first(&mut found);
        Ok(found)
    }

    async fn list(&self, filter: CaptureFilter) -> Result<Vec<Capture>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Capture> = tables
            .captures
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        sort_oldest_first(&mut found);
        Ok(found)
    }

    async fn save(&self, capture: &Capture) -> Result<()> {
        CaptureRepository::save_all(self, std::slice::from_ref(capture)).await
    }

    async fn save_all(&self, captures: &[Capture]) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        replace_captures(&mut tables, captures)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let before = tables.captures.len();
        tables.captures.retain(|c| c.id != id);
        if tables.captures.len() == before {
            return Err(Error::CaptureNotFound(id));
        }
        Ok(())
    }

    async fn count_by_status(&self) -> Result<QueueStats> {
        let tables = self.tables.read().await;
        let mut stats = QueueStats::default();
        for capture in &tables.captures {
            stats.add(capture.status, 1);
        }
        Ok(stats)
    }
}

/// Replace stored captures by id. Validates all ids before touching anything.
fn replace_captures(tables: &mut Tables, captures: &[Capture]) -> Result<()> {
    let mut positions = Vec::with_capacity(captures.len());
    for capture in captures {
        let pos = tables
            .captures
            .iter()
            .position(|c| c.id == capture.id)
            .ok_or(Error::CaptureNotFound(capture.id))?;
        positions.push(pos);
    }
    for (pos, capture) in positions.into_iter().zip(captures) {
        tables.captures[pos] = capture.clone();
    }
    Ok(())
}

#[async_trait]
impl PreferenceRepository for MemoryStore {
    async fn list(&self, kind: Option<MemoryKind>) -> Result<Vec<PreferenceEntry>> {
        let tables = self.tables.read().await;
        let mut found: Vec<PreferenceEntry> = tables
            .preferences
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal usage counts.
        found.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        Ok(found)
    }

    async fn save_all(&self, entries: &[PreferenceEntry]) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        for entry in entries {
            match tables.preferences.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry.clone(),
                None => tables.preferences.push(entry.clone()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for MemoryStore {
    async fn find_by_capture(&self, capture_id: Uuid) -> Result<Vec<TypedEntity>> {
        let tables = self.tables.read().await;
        let src = Some(capture_id);
        let mut found = Vec::new();
        found.extend(
            tables
                .events
                .iter()
                .filter(|e| e.source_capture_id == src)
                .cloned()
                .map(TypedEntity::Calendar),
        );
        found.extend(
            tables
                .todos
                .iter()
                .filter(|t| t.source_capture_id == src)
                .cloned()
                .map(TypedEntity::Todo),
        );
        found.extend(
            tables
                .notes
                .iter()
                .filter(|n| n.source_capture_id == src)
                .cloned()
                .map(TypedEntity::Note),
        );
        Ok(found)
    }

    async fn materialize(&self, entity: &TypedEntity, captures: &[Capture]) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;

        if let Some(src) = entity.source_capture_id() {
            let duplicate = match entity {
                TypedEntity::Calendar(_) => tables
                    .events
                    .iter()
                    .any(|e| e.source_capture_id == Some(src)),
                TypedEntity::Todo(_) => tables
                    .todos
                    .iter()
                    .any(|t| t.source_capture_id == Some(src)),
                TypedEntity::Note(_) => tables
                    .notes
                    .iter()
                    .any(|n| n.source_capture_id == Some(src)),
            };
            if duplicate {
                return Err(Error::Storage(format!(
                    "a {} already references capture {}",
                    entity.container(),
                    src
                )));
            }
        }

        replace_captures(&mut tables, captures)?;
        match entity {
            TypedEntity::Calendar(e) => tables.events.push(e.clone()),
            TypedEntity::Todo(t) => tables.todos.push(t.clone()),
            TypedEntity::Note(n) => tables.notes.push(n.clone()),
        }
        Ok(())
    }

    async fn list_calendar_events(&self) -> Result<Vec<CalendarEvent>> {
        let tables = self.tables.read().await;
        let mut events = tables.events.clone();
        events.sort_by(|a, b| a.start_at.cmp(&b.start_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn list_todos(&self) -> Result<Vec<TodoItem>> {
        Ok(self.tables.read().await.todos.clone())
    }

    async fn list_notes(&self) -> Result<Vec<Note>> {
        Ok(self.tables.read().await.notes.clone())
    }
}
