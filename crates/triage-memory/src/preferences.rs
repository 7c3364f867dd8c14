//! Learned classification preferences.
//!
//! Preferences are keyword → container (or keyword → priority) associations
//! learned from user corrections. Once a preference has been reinforced
//! often enough it overrides the model's answer for matching text.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use triage_core::defaults::{OVERRIDE_THRESHOLD, SUGGEST_THRESHOLD};
use triage_core::{
    Classification, ContainerType, MemoryKind, PreferenceEntry, PreferenceRepository, Priority,
    Result,
};

use crate::context::assemble_context;
use crate::keywords::{detect_people, detect_projects, extract_keywords};

const KEYWORD_DESCRIPTION: &str = "用户常提到的内容";
const PERSON_DESCRIPTION: &str = "识别到的人物";
const PROJECT_DESCRIPTION: &str = "识别到的项目/产品";

/// Classification after preferences were applied, and the preference that
/// matched, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub classification: Classification,
    pub matched: Option<Uuid>,
}

fn same_keyword(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Preference memory backed by a [`PreferenceRepository`].
///
/// Read-modify-write cycles are serialized by an internal lock so two
/// corrections for the same keyword cannot both create an entry.
pub struct PreferenceMemory {
    repo: Arc<dyn PreferenceRepository>,
    write_lock: Mutex<()>,
}

impl PreferenceMemory {
    pub fn new(repo: Arc<dyn PreferenceRepository>) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    /// All entries, optionally of one kind, most used first.
    pub async fn entries(&self, kind: Option<MemoryKind>) -> Result<Vec<PreferenceEntry>> {
        self.repo.list(kind).await
    }

    /// Highest-usage active preference whose keyword occurs in `text`.
    pub async fn find_best_match(&self, text: &str) -> Result<Option<PreferenceEntry>> {
        let lower = text.to_lowercase();
        let entries = self.repo.list(Some(MemoryKind::Preference)).await?;
        Ok(entries
            .into_iter()
            .find(|e| e.is_active && e.matches_lowercase(&lower)))
    }

    /// Apply learned preferences to a fresh classification and count the
    /// match as a use.
    #[instrument(skip(self, text, classification), fields(subsystem = "memory", op = "adjust"))]
    pub async fn adjust(&self, text: &str, classification: Classification) -> Result<Classification> {
        let adjustment = self.plan_adjustment(text, classification).await?;
        if let Some(id) = adjustment.matched {
            self.record_match(id).await?;
        }
        Ok(adjustment.classification)
    }

    /// Compute the adjustment for `text` without writing anything.
    ///
    /// The container is replaced only when the matching preference has been
    /// reinforced at least three times; an associated priority always
    /// applies. Pass `matched` to [`record_match`](Self::record_match) once
    /// the adjusted classification has been acted on.
    pub async fn plan_adjustment(
        &self,
        text: &str,
        classification: Classification,
    ) -> Result<Adjustment> {
        let Some(entry) = self.find_best_match(text).await? else {
            return Ok(Adjustment {
                classification,
                matched: None,
            });
        };

        let mut adjusted = classification;
        if let Some(container) = entry.associated_container {
            if entry.usage_count >= OVERRIDE_THRESHOLD && container != adjusted.container {
                info!(
                    subsystem = "memory",
                    keyword = %entry.keyword,
                    from = %adjusted.container,
                    to = %container,
                    usage_count = entry.usage_count,
                    "Preference overrides classified container"
                );
                adjusted = adjusted.with_container(container);
            }
        }
        if let Some(priority) = entry.associated_priority {
            adjusted = adjusted.with_priority(priority);
        }

        Ok(Adjustment {
            classification: adjusted,
            matched: Some(entry.id),
        })
    }

    /// Count one use of the preference `id`. Unknown ids are ignored.
    pub async fn record_match(&self, id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let entries = self.repo.list(Some(MemoryKind::Preference)).await?;
        let Some(mut entry) = entries.into_iter().find(|e| e.id == id) else {
            debug!(subsystem = "memory", preference_id = %id, "Matched preference no longer exists");
            return Ok(());
        };
        entry.record_usage(Utc::now());
        self.repo.save_all(std::slice::from_ref(&entry)).await
    }

    /// Container a matching preference suggests, once reinforced twice.
    ///
    /// Read-only: does not count as a use.
    pub async fn suggested_container(&self, text: &str) -> Result<Option<ContainerType>> {
        Ok(self
            .find_best_match(text)
            .await?
            .filter(|e| e.usage_count >= SUGGEST_THRESHOLD)
            .and_then(|e| e.associated_container))
    }

    /// Learn from a user moving `content` from one container to another.
    ///
    /// For every extracted keyword the `(keyword, to)` preference is
    /// reinforced or created, and every other active container preference
    /// for that keyword is deactivated. No-op when `from == to`.
    #[instrument(
        skip(self, content),
        fields(subsystem = "memory", op = "record_correction", from = %from, to = %to)
    )]
    pub async fn record_correction(
        &self,
        content: &str,
        from: ContainerType,
        to: ContainerType,
        source: Option<Uuid>,
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let keywords = extract_keywords(content);
        if keywords.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut entries = self.repo.list(Some(MemoryKind::Preference)).await?;
        let mut changed: Vec<PreferenceEntry> = Vec::new();

        for keyword in &keywords {
            let mut reinforced = false;
            for entry in entries.iter_mut() {
                if !entry.is_active || !same_keyword(&entry.keyword, keyword) {
                    continue;
                }
                match entry.associated_container {
                    Some(c) if c == to => {
                        entry.record_usage(now);
                        reinforced = true;
                        changed.push(entry.clone());
                    }
                    Some(_) => {
                        entry.deactivate();
                        changed.push(entry.clone());
                    }
                    None => {}
                }
            }
            if !reinforced {
                let mut created = PreferenceEntry::for_container(keyword.clone(), to);
                if let Some(id) = source {
                    created = created.with_source(id);
                }
                entries.push(created.clone());
                changed.push(created);
            }
        }

        self.repo.save_all(&changed).await?;
        info!(keywords = keywords.len(), entries = changed.len(), "Recorded container correction");
        Ok(())
    }

    /// Learn from a user changing the priority of `content`.
    ///
    /// Contradicting priority preferences for the same keyword are
    /// deactivated, mirroring container corrections.
    #[instrument(
        skip(self, content),
        fields(subsystem = "memory", op = "record_priority_correction", priority = %priority)
    )]
    pub async fn record_priority_correction(
        &self,
        content: &str,
        priority: Priority,
        source: Option<Uuid>,
    ) -> Result<()> {
        let keywords = extract_keywords(content);
        if keywords.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut entries = self.repo.list(Some(MemoryKind::Preference)).await?;
        let mut changed: Vec<PreferenceEntry> = Vec::new();

        for keyword in &keywords {
            let mut reinforced = false;
            for entry in entries.iter_mut() {
                if !entry.is_active || !same_keyword(&entry.keyword, keyword) {
                    continue;
                }
                match entry.associated_priority {
                    Some(p) if p == priority => {
                        entry.record_usage(now);
                        reinforced = true;
                        changed.push(entry.clone());
                    }
                    Some(_) => {
                        entry.deactivate();
                        changed.push(entry.clone());
                    }
                    None => {}
                }
            }
            if !reinforced {
                let mut created = PreferenceEntry::for_priority(keyword.clone(), priority);
                if let Some(id) = source {
                    created = created.with_source(id);
                }
                entries.push(created.clone());
                changed.push(created);
            }
        }

        self.repo.save_all(&changed).await?;
        info!(keywords = keywords.len(), entries = changed.len(), "Recorded priority correction");
        Ok(())
    }

    /// Track keywords, people and projects mentioned in a classified capture.
    #[instrument(skip(self, content), fields(subsystem = "memory", op = "observe"))]
    pub async fn observe(&self, content: &str, source: Option<Uuid>) -> Result<()> {
        let observed: Vec<(MemoryKind, String, &str)> = extract_keywords(content)
            .into_iter()
            .map(|k| (MemoryKind::Keyword, k, KEYWORD_DESCRIPTION))
            .chain(
                detect_people(content)
                    .into_iter()
                    .map(|p| (MemoryKind::Person, p, PERSON_DESCRIPTION)),
            )
            .chain(
                detect_projects(content)
                    .into_iter()
                    .map(|p| (MemoryKind::Context, p, PROJECT_DESCRIPTION)),
            )
            .collect();
        if observed.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut entries = self.repo.list(None).await?;
        let mut changed: Vec<PreferenceEntry> = Vec::new();

        for (kind, value, description) in observed {
            match entries
                .iter_mut()
                .find(|e| e.kind == kind && e.keyword == value)
            {
                Some(existing) => {
                    existing.record_usage(now);
                    changed.push(existing.clone());
                }
                None => {
                    let mut created = PreferenceEntry::new(kind, value, description);
                    if let Some(id) = source {
                        created = created.with_source(id);
                    }
                    entries.push(created.clone());
                    changed.push(created);
                }
            }
        }

        debug!(entries = changed.len(), "Observed capture content");
        self.repo.save_all(&changed).await
    }

    /// Context text for the classifier prompt, or `None` if nothing is known.
    pub async fn context_for(&self, text: &str) -> Result<Option<String>> {
        let entries = self.repo.list(None).await?;
        Ok(assemble_context(&entries, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_db::MemoryStore;

    fn memory() -> (Arc<MemoryStore>, PreferenceMemory) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), PreferenceMemory::new(store))
    }

    fn classification(container: ContainerType) -> Classification {
        Classification {
            container,
            extracted_time: None,
            suggested_priority: Priority::Normal,
            summary: "s".to_string(),
            confidence: None,
        }
    }

    #[tokio::test]
    async fn test_correction_round_trip() {
        let (_, mem) = memory();
        mem.record_correction("周报", ContainerType::Calendar, ContainerType::Todo, None)
            .await
            .unwrap();

        let best = mem.find_best_match("周报").await.unwrap().unwrap();
        assert_eq!(best.keyword, "周报");
        assert_eq!(best.associated_container, Some(ContainerType::Todo));
        assert_eq!(best.usage_count, 1);
    }

    #[tokio::test]
    async fn test_same_container_correction_is_noop() {
        let (store, mem) = memory();
        mem.record_correction("周报", ContainerType::Todo, ContainerType::Todo, None)
            .await
            .unwrap();
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_opposite_correction_deactivates_previous() {
        let (store, mem) = memory();
        mem.record_correction("周报", ContainerType::Calendar, ContainerType::Todo, None)
            .await
            .unwrap();
        mem.record_correction("周报", ContainerType::Todo, ContainerType::Note, None)
            .await
            .unwrap();

        let entries = store.list(Some(MemoryKind::Preference)).await.unwrap();
        let active: Vec<_> = entries.iter().filter(|e| e.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].associated_container, Some(ContainerType::Note));
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_override_requires_three_uses() {
        let (_, mem) = memory();
        mem.record_correction("周报", ContainerType::Note, ContainerType::Todo, None)
            .await
            .unwrap();

        // usage 1: no override, usage becomes 2
        let c = mem.adjust("写周报", classification(ContainerType::Note)).await.unwrap();
        assert_eq!(c.container, ContainerType::Note);

        // usage 2: still below, usage becomes 3
        let c = mem.adjust("写周报", classification(ContainerType::Note)).await.unwrap();
        assert_eq!(c.container, ContainerType::Note);

        // usage 3: overrides
        let c = mem.adjust("写周报", classification(ContainerType::Note)).await.unwrap();
        assert_eq!(c.container, ContainerType::Todo);
        assert_eq!(
            mem.find_best_match("周报").await.unwrap().unwrap().usage_count,
            4
        );
    }

    #[tokio::test]
    async fn test_suggestion_threshold_is_two_and_read_only() {
        let (_, mem) = memory();
        mem.record_correction("周报", ContainerType::Note, ContainerType::Todo, None)
            .await
            .unwrap();
        assert_eq!(mem.suggested_container("周报").await.unwrap(), None);

        mem.record_correction("周报", ContainerType::Note, ContainerType::Todo, None)
            .await
            .unwrap();
        assert_eq!(
            mem.suggested_container("周报").await.unwrap(),
            Some(ContainerType::Todo)
        );
        assert_eq!(
            mem.find_best_match("周报").await.unwrap().unwrap().usage_count,
            2
        );
    }

    #[tokio::test]
    async fn test_priority_correction_always_applies() {
        let (_, mem) = memory();
        mem.record_priority_correction("报销", Priority::Important, None)
            .await
            .unwrap();

        let c = mem.adjust("交报销单", classification(ContainerType::Todo)).await.unwrap();
        assert_eq!(c.suggested_priority, Priority::Important);
        assert_eq!(c.container, ContainerType::Todo);
    }

    #[tokio::test]
    async fn test_plan_adjustment_writes_nothing() {
        let (_, mem) = memory();
        mem.record_correction("周报", ContainerType::Note, ContainerType::Todo, None)
            .await
            .unwrap();

        for _ in 0..3 {
            let plan = mem
                .plan_adjustment("写周报", classification(ContainerType::Note))
                .await
                .unwrap();
            assert_eq!(plan.classification.container, ContainerType::Note);
            assert!(plan.matched.is_some());
        }
        assert_eq!(
            mem.find_best_match("周报").await.unwrap().unwrap().usage_count,
            1
        );
    }

    #[tokio::test]
    async fn test_record_match_counts_one_use() {
        let (_, mem) = memory();
        mem.record_correction("周报", ContainerType::Note, ContainerType::Todo, None)
            .await
            .unwrap();
        let plan = mem
            .plan_adjustment("写周报", classification(ContainerType::Note))
            .await
            .unwrap();

        mem.record_match(plan.matched.unwrap()).await.unwrap();
        mem.record_match(Uuid::new_v4()).await.unwrap();

        assert_eq!(
            mem.find_best_match("周报").await.unwrap().unwrap().usage_count,
            2
        );
    }

    #[tokio::test]
    async fn test_adjust_without_match_leaves_classification() {
        let (store, mem) = memory();
        let c = mem.adjust("anything", classification(ContainerType::Note)).await.unwrap();
        assert_eq!(c, classification(ContainerType::Note));
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_match_is_case_insensitive() {
        let (_, mem) = memory();
        mem.record_correction("Standup", ContainerType::Note, ContainerType::Calendar, None)
            .await
            .unwrap();
        assert!(mem.find_best_match("daily STANDUP").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_observe_tracks_kinds_and_reinforces() {
        let (store, mem) = memory();
        mem.observe("明天，张总和小王。推进星河项目", None).await.unwrap();
        mem.observe("明天，张总和小王。推进星河项目", None).await.unwrap();

        let people = store.list(Some(MemoryKind::Person)).await.unwrap();
        assert!(people.iter().any(|p| p.keyword == "张总" && p.usage_count == 2));

        let projects = store.list(Some(MemoryKind::Context)).await.unwrap();
        assert!(projects.iter().any(|p| p.keyword == "推进星河项目"));

        let keywords = store.list(Some(MemoryKind::Keyword)).await.unwrap();
        assert!(keywords.iter().all(|k| k.usage_count == 2));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let (store, mem) = memory();
        store.set_fail_writes(true);
        let err = mem
            .record_correction("周报", ContainerType::Note, ContainerType::Todo, None)
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }
}
