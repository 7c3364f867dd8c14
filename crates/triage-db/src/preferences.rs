//! Preference entry repository implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use triage_core::{Error, MemoryKind, PreferenceEntry, PreferenceRepository, Result};

/// PostgreSQL implementation of PreferenceRepository.
///
/// Insertion order is tracked with the `seq` column so ties in usage count
/// resolve to the older entry.
pub struct PgPreferenceRepository {
    pool: Pool<Postgres>,
}

impl PgPreferenceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_entry_row(row: PgRow) -> Result<PreferenceEntry> {
        let kind: String = row.get("kind");
        let container: Option<String> = row.get("associated_container");
        let priority: Option<String> = row.get("associated_priority");

        Ok(PreferenceEntry {
            id: row.get("id"),
            kind: kind.parse().map_err(Error::Storage)?,
            keyword: row.get("keyword"),
            description: row.get("description"),
            associated_container: container
                .map(|c| c.parse())
                .transpose()
                .map_err(Error::Storage)?,
            associated_priority: priority
                .map(|p| p.parse())
                .transpose()
                .map_err(Error::Storage)?,
            usage_count: row.get("usage_count"),
            is_active: row.get("is_active"),
            source_capture_id: row.get("source_capture_id"),
            created_at: row.get("created_at"),
            last_used_at: row.get("last_used_at"),
        })
    }
}

#[async_trait]
impl PreferenceRepository for PgPreferenceRepository {
    async fn list(&self, kind: Option<MemoryKind>) -> Result<Vec<PreferenceEntry>> {
        let rows = sqlx::query(
            "SELECT id, kind, keyword, description, associated_container, associated_priority,
                    usage_count, is_active, source_capture_id, created_at, last_used_at
             FROM preference_entry
             WHERE ($1::text IS NULL OR kind = $1)
             ORDER BY usage_count DESC, seq ASC",
        )
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_entry_row).collect()
    }

    async fn save_all(&self, entries: &[PreferenceEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Deactivations first so a replacement association never collides
        // with the one it supersedes on the active-association index.
        let (retiring, rest): (Vec<_>, Vec<_>) = entries.iter().partition(|e| !e.is_active);
        for entry in retiring.into_iter().chain(rest) {
            sqlx::query(
                "INSERT INTO preference_entry (id, kind, keyword, description,
                     associated_container, associated_priority, usage_count, is_active,
                     source_capture_id, created_at, last_used_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (id) DO UPDATE SET
                     description = EXCLUDED.description,
                     associated_container = EXCLUDED.associated_container,
                     associated_priority = EXCLUDED.associated_priority,
                     usage_count = EXCLUDED.usage_count,
                     is_active = EXCLUDED.is_active,
                     last_used_at = EXCLUDED.last_used_at",
            )
            .bind(entry.id)
            .bind(entry.kind.as_str())
            .bind(&entry.keyword)
            .bind(&entry.description)
            .bind(entry.associated_container.map(|c| c.as_str()))
            .bind(entry.associated_priority.map(|p| p.as_str()))
            .bind(entry.usage_count)
            .bind(entry.is_active)
            .bind(entry.source_capture_id)
            .bind(entry.created_at)
            .bind(entry.last_used_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
