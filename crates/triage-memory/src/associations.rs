//! Advisory links between captures that talk about the same things.
//!
//! Links are symmetric soft references by id. Either side may be deleted
//! without touching the other; dangling ids are dropped on read.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use triage_core::defaults::ASSOCIATION_LIMIT;
use triage_core::{Capture, CaptureFilter, CaptureRepository, ContainerType, Result};

use crate::keywords::extract_keywords;

/// Relatedness of `other` to a capture with `keywords` and `container`.
///
/// Each keyword scores 2 when it is also one of `other`'s keywords, else 1
/// when `other`'s content contains it. A shared container adds 1.
pub fn association_score(
    keywords: &[String],
    container: Option<ContainerType>,
    other: &Capture,
) -> u32 {
    let other_keywords: HashSet<String> = extract_keywords(&other.content).into_iter().collect();
    let other_lower = other.content.to_lowercase();

    let keyword_score: u32 = keywords
        .iter()
        .map(|k| {
            if other_keywords.contains(k) {
                2
            } else if other_lower.contains(k.as_str()) {
                1
            } else {
                0
            }
        })
        .sum();

    match (container, other.container) {
        (Some(a), Some(b)) if a == b => keyword_score + 1,
        _ => keyword_score,
    }
}

/// Ids of the best-scoring candidates for `capture`, at most `limit`.
///
/// `candidates` are expected oldest first; among equal scores the newest
/// capture wins.
pub fn find_related(capture: &Capture, candidates: &[Capture], limit: usize) -> Vec<Uuid> {
    let keywords = extract_keywords(&capture.content);
    let mut scored: Vec<(u32, Uuid)> = candidates
        .iter()
        .rev()
        .filter(|c| c.id != capture.id)
        .map(|c| (association_score(&keywords, capture.container, c), c.id))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, id)| id).collect()
}

/// Builds and resolves related-capture links.
pub struct AssociationBuilder {
    captures: Arc<dyn CaptureRepository>,
    limit: usize,
}

impl AssociationBuilder {
    pub fn new(captures: Arc<dyn CaptureRepository>) -> Self {
        Self {
            captures,
            limit: ASSOCIATION_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Link `capture` to its best matches, in both directions.
    ///
    /// `capture` is updated in place; the returned partners carry the back
    /// link and still need persisting. Nothing is written here.
    pub async fn link(&self, capture: &mut Capture) -> Result<Vec<Capture>> {
        let candidates = self.captures.list(CaptureFilter::all()).await?;
        let related = find_related(capture, &candidates, self.limit);

        let mut partners = Vec::new();
        for id in related {
            capture.link_related(id);
            if let Some(mut partner) = candidates.iter().find(|c| c.id == id).cloned() {
                if partner.link_related(capture.id) {
                    partners.push(partner);
                }
            }
        }

        if !partners.is_empty() {
            debug!(
                subsystem = "memory",
                capture_id = %capture.id,
                related = capture.related_capture_ids.len(),
                "Linked related captures"
            );
        }
        Ok(partners)
    }

    /// Live captures `capture` links to. Deleted ids are skipped.
    pub async fn related_captures(&self, capture: &Capture) -> Result<Vec<Capture>> {
        if capture.related_capture_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.captures.get_many(&capture.related_capture_ids).await
    }
}
