//! Capture repository implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use triage_core::{
    Capture, CaptureFilter, CaptureRepository, CaptureStatus, Error, QueueStats, Result,
};

const CAPTURE_COLUMNS: &str = "id, content, status, container, retry_count, last_error, \
     last_attempt_at, extracted_time, suggested_priority, summary, related_capture_ids, \
     created_at, updated_at";

/// PostgreSQL implementation of CaptureRepository.
pub struct PgCaptureRepository {
    pool: Pool<Postgres>,
}

impl PgCaptureRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_capture_row(row: PgRow) -> Result<Capture> {
        let status: String = row.get("status");
        let container: Option<String> = row.get("container");
        let priority: String = row.get("suggested_priority");

        Ok(Capture {
            id: row.get("id"),
            content: row.get("content"),
            status: status.parse().map_err(Error::Storage)?,
            container: container
                .map(|c| c.parse())
                .transpose()
                .map_err(Error::Storage)?,
            retry_count: row.get("retry_count"),
            last_error: row.get("last_error"),
            last_attempt_at: row.get("last_attempt_at"),
            extracted_time: row.get("extracted_time"),
            suggested_priority: priority.parse().map_err(Error::Storage)?,
            summary: row.get("summary"),
            related_capture_ids: row.get("related_capture_ids"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Update every mutable column of an existing capture on `conn`.
///
/// Shared with the entity repository so conversions can update captures
/// inside their own transaction.
pub(crate) async fn update_capture(conn: &mut PgConnection, capture: &Capture) -> Result<()> {
    let result = sqlx::query(
        "UPDATE capture
         SET content = $2, status = $3, container = $4, retry_count = $5, last_error = $6,
             last_attempt_at = $7, extracted_time = $8, suggested_priority = $9, summary = $10,
             related_capture_ids = $11, updated_at = $12
         WHERE id = $1",
    )
    .bind(capture.id)
    .bind(&capture.content)
    .bind(capture.status.as_str())
    .bind(capture.container.map(|c| c.as_str()))
    .bind(capture.retry_count)
    .bind(&capture.last_error)
    .bind(capture.last_attempt_at)
    .bind(capture.extracted_time)
    .bind(capture.suggested_priority.as_str())
    .bind(&capture.summary)
    .bind(&capture.related_capture_ids)
    .bind(capture.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;

    if result.rows_affected() == 0 {
        return Err(Error::CaptureNotFound(capture.id));
    }
    Ok(())
}

#[async_trait]
impl CaptureRepository for PgCaptureRepository {
    async fn insert(&self, capture: &Capture) -> Result<()> {
        sqlx::query(
            "INSERT INTO capture (id, content, status, container, retry_count, last_error,
                 last_attempt_at, extracted_time, suggested_priority, summary,
                 related_capture_ids, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(capture.id)
        .bind(&capture.content)
        .bind(capture.status.as_str())
        .bind(capture.container.map(|c| c.as_str()))
        .bind(capture.retry_count)
        .bind(&capture.last_error)
        .bind(capture.last_attempt_at)
        .bind(capture.extracted_time)
        .bind(capture.suggested_priority.as_str())
        .bind(&capture.summary)
        .bind(&capture.related_capture_ids)
        .bind(capture.created_at)
        .bind(capture.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(subsystem = "db", component = "captures", capture_id = %capture.id, "Capture inserted");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Capture>> {
        let row = sqlx::query(&format!("SELECT {} FROM capture WHERE id = $1", CAPTURE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_capture_row).transpose()
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Capture>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM capture WHERE id = ANY($1) ORDER BY created_at ASC, id ASC",
            CAPTURE_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_capture_row).collect()
    }

    async fn list(&self, filter: CaptureFilter) -> Result<Vec<Capture>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM capture
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::int IS NULL OR retry_count < $2)
             ORDER BY created_at ASC, id ASC",
            CAPTURE_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.retry_count_below)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_capture_row).collect()
    }

    async fn save(&self, capture: &Capture) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        update_capture(&mut conn, capture).await
    }

    async fn save_all(&self, captures: &[Capture]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for capture in captures {
            update_capture(&mut tx, capture).await?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM capture WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::CaptureNotFound(id));
        }
        Ok(())
    }

    async fn count_by_status(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM capture GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let status: CaptureStatus = status.parse().map_err(Error::Storage)?;
            stats.add(status, count);
        }
        Ok(stats)
    }
}
