//! Context block handed to the classifier alongside the capture text.

use triage_core::defaults::{CONTEXT_KEYWORD_MIN_USAGE, CONTEXT_SECTION_LIMIT};
use triage_core::{MemoryKind, PreferenceEntry, Priority};

/// Active entries of `kind`, most used first, as a `、`-joined list.
fn joined(entries: &[PreferenceEntry], kind: MemoryKind, min_usage: i32) -> Option<String> {
    let values: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == kind && e.is_active && e.usage_count >= min_usage)
        .take(CONTEXT_SECTION_LIMIT)
        .map(|e| e.keyword.as_str())
        .collect();
    (!values.is_empty()).then(|| values.join("、"))
}

fn hint(entry: &PreferenceEntry) -> Option<String> {
    match (entry.associated_container, entry.associated_priority) {
        (Some(container), _) => Some(format!(
            "提到「{}」的内容通常归类为{}",
            entry.keyword,
            container.display_name()
        )),
        (None, Some(Priority::Important)) => {
            Some(format!("提到「{}」的内容通常比较重要", entry.keyword))
        }
        (None, Some(Priority::Normal)) => {
            Some(format!("提到「{}」的内容通常是普通优先级", entry.keyword))
        }
        (None, None) => None,
    }
}

/// Build the context block from memory entries.
///
/// `entries` must be ordered by usage count descending. Sections are
/// frequently mentioned keywords (usage ≥ 3), people, projects, and hints
/// from preferences whose keyword occurs in `text`. Returns `None` when
/// every section is empty.
pub fn assemble_context(entries: &[PreferenceEntry], text: &str) -> Option<String> {
    let mut lines = Vec::new();

    if let Some(keywords) = joined(entries, MemoryKind::Keyword, CONTEXT_KEYWORD_MIN_USAGE) {
        lines.push(format!("用户常提到的关键词: {}", keywords));
    }
    if let Some(people) = joined(entries, MemoryKind::Person, 0) {
        lines.push(format!("相关人物: {}", people));
    }
    if let Some(projects) = joined(entries, MemoryKind::Context, 0) {
        lines.push(format!("相关项目: {}", projects));
    }

    let lower = text.to_lowercase();
    let hints: Vec<String> = entries
        .iter()
        .filter(|e| e.kind == MemoryKind::Preference && e.is_active && e.matches_lowercase(&lower))
        .filter_map(hint)
        .take(CONTEXT_SECTION_LIMIT)
        .collect();
    if !hints.is_empty() {
        lines.push(format!("用户偏好: {}", hints.join("；")));
    }

    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::ContainerType;

    fn entry(kind: MemoryKind, keyword: &str, usage: i32) -> PreferenceEntry {
        PreferenceEntry {
            usage_count: usage,
            ..PreferenceEntry::new(kind, keyword, "")
        }
    }

    #[test]
    fn test_empty_memory_yields_none() {
        assert_eq!(assemble_context(&[], "明天开会"), None);
    }

    #[test]
    fn test_low_usage_keywords_are_omitted() {
        let entries = vec![entry(MemoryKind::Keyword, "周报", 2)];
        assert_eq!(assemble_context(&entries, "x"), None);
    }

    #[test]
    fn test_sections_in_order() {
        let entries = vec![
            entry(MemoryKind::Keyword, "周报", 5),
            entry(MemoryKind::Keyword, "开会", 3),
            entry(MemoryKind::Person, "张总", 1),
            entry(MemoryKind::Context, "[Apollo]", 1),
        ];
        let context = assemble_context(&entries, "x").unwrap();
        assert_eq!(
            context,
            "用户常提到的关键词: 周报、开会\n相关人物: 张总\n相关项目: [Apollo]"
        );
    }

    #[test]
    fn test_preference_hint_only_when_keyword_in_text() {
        let pref = PreferenceEntry::for_container("周报", ContainerType::Todo);
        let entries = vec![pref];

        assert_eq!(assemble_context(&entries, "买牛奶"), None);
        let context = assemble_context(&entries, "写周报").unwrap();
        assert!(context.contains("「周报」"));
        assert!(context.contains("待办"));
    }

    #[test]
    fn test_inactive_entries_are_ignored() {
        let mut person = entry(MemoryKind::Person, "张总", 4);
        person.deactivate();
        assert_eq!(assemble_context(&[person], "张总"), None);
    }

    #[test]
    fn test_sections_are_capped() {
        let entries: Vec<_> = (0..15)
            .map(|i| entry(MemoryKind::Person, &format!("p{}", i), 1))
            .collect();
        let context = assemble_context(&entries, "x").unwrap();
        assert_eq!(context.matches('、').count(), CONTEXT_SECTION_LIMIT - 1);
    }
}
