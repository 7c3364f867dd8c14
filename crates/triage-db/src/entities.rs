//! Typed entity repository: calendar events, todos and notes.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use triage_core::{
    CalendarEvent, Capture, EntityRepository, Error, Note, Result, TodoItem, TypedEntity,
};

use crate::captures::update_capture;

const EVENT_COLUMNS: &str = "id, title, description, start_at, end_at, is_all_day, priority, \
     is_completed, source_capture_id, created_at, updated_at";
const TODO_COLUMNS: &str = "id, title, description, priority, due_at, is_completed, \
     completed_at, source_capture_id, created_at, updated_at";
const NOTE_COLUMNS: &str = "id, title, content, tags, source_capture_id, created_at, updated_at";

/// PostgreSQL implementation of EntityRepository.
pub struct PgEntityRepository {
    pool: Pool<Postgres>,
}

impl PgEntityRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_event_row(row: PgRow) -> Result<CalendarEvent> {
        let priority: String = row.get("priority");
        Ok(CalendarEvent {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            start_at: row.get("start_at"),
            end_at: row.get("end_at"),
            is_all_day: row.get("is_all_day"),
            priority: priority.parse().map_err(Error::Storage)?,
            is_completed: row.get("is_completed"),
            source_capture_id: row.get("source_capture_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_todo_row(row: PgRow) -> Result<TodoItem> {
        let priority: String = row.get("priority");
        Ok(TodoItem {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            priority: priority.parse().map_err(Error::Storage)?,
            due_at: row.get("due_at"),
            is_completed: row.get("is_completed"),
            completed_at: row.get("completed_at"),
            source_capture_id: row.get("source_capture_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_note_row(row: PgRow) -> Note {
        Note {
            id: row.get("id"),
            title: row.get("title"),
            content: row.get("content"),
            tags: row.get("tags"),
            source_capture_id: row.get("source_capture_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    async fn insert_entity(conn: &mut PgConnection, entity: &TypedEntity) -> Result<()> {
        match entity {
            TypedEntity::Calendar(e) => {
                sqlx::query(
                    "INSERT INTO calendar_event (id, title, description, start_at, end_at,
                         is_all_day, priority, is_completed, source_capture_id, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                )
                .bind(e.id)
                .bind(&e.title)
                .bind(&e.description)
                .bind(e.start_at)
                .bind(e.end_at)
                .bind(e.is_all_day)
                .bind(e.priority.as_str())
                .bind(e.is_completed)
                .bind(e.source_capture_id)
                .bind(e.created_at)
                .bind(e.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(Error::Database)?;
            }
            TypedEntity::Todo(t) => {
                sqlx::query(
                    "INSERT INTO todo_item (id, title, description, priority, due_at,
                         is_completed, completed_at, source_capture_id, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                )
                .bind(t.id)
                .bind(&t.title)
                .bind(&t.description)
                .bind(t.priority.as_str())
                .bind(t.due_at)
                .bind(t.is_completed)
                .bind(t.completed_at)
                .bind(t.source_capture_id)
                .bind(t.created_at)
                .bind(t.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(Error::Database)?;
            }
            TypedEntity::Note(n) => {
                sqlx::query(
                    "INSERT INTO note (id, title, content, tags, source_capture_id, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(n.id)
                .bind(&n.title)
                .bind(&n.content)
                .bind(&n.tags)
                .bind(n.source_capture_id)
                .bind(n.created_at)
                .bind(n.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(Error::Database)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn find_by_capture(&self, capture_id: Uuid) -> Result<Vec<TypedEntity>> {
        let mut found = Vec::new();

        let events = sqlx::query(&format!(
            "SELECT {} FROM calendar_event WHERE source_capture_id = $1",
            EVENT_COLUMNS
        ))
        .bind(capture_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        for row in events {
            found.push(TypedEntity::Calendar(Self::parse_event_row(row)?));
        }

        let todos = sqlx::query(&format!(
            "SELECT {} FROM todo_item WHERE source_capture_id = $1",
            TODO_COLUMNS
        ))
        .bind(capture_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        for row in todos {
            found.push(TypedEntity::Todo(Self::parse_todo_row(row)?));
        }

        let notes = sqlx::query(&format!(
            "SELECT {} FROM note WHERE source_capture_id = $1",
            NOTE_COLUMNS
        ))
        .bind(capture_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        found.extend(notes.into_iter().map(|row| TypedEntity::Note(Self::parse_note_row(row))));

        Ok(found)
    }

    async fn materialize(&self, entity: &TypedEntity, captures: &[Capture]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        Self::insert_entity(&mut tx, entity).await?;
        for capture in captures {
            update_capture(&mut tx, capture).await?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "entities",
            entity_id = %entity.id(),
            container = %entity.container(),
            capture_count = captures.len(),
            "Typed entity materialized"
        );
        Ok(())
    }

    async fn list_calendar_events(&self) -> Result<Vec<CalendarEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM calendar_event ORDER BY start_at ASC, id ASC",
            EVENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_event_row).collect()
    }

    async fn list_todos(&self) -> Result<Vec<TodoItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM todo_item ORDER BY created_at ASC, id ASC",
            TODO_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_todo_row).collect()
    }

    async fn list_notes(&self) -> Result<Vec<Note>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM note ORDER BY created_at ASC, id ASC",
            NOTE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_note_row).collect())
    }
}
