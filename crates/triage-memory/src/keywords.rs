//! Keyword, person and project extraction from capture text.
//!
//! All extractors return matches in order of first appearance with
//! duplicates removed.

use once_cell::sync::Lazy;
use regex::Regex;

use triage_core::defaults::{
    KEYWORD_CJK_PREFIX, KEYWORD_LIMIT, KEYWORD_MAX_CHARS, KEYWORD_MIN_CHARS, KEYWORD_TOKEN_PREFIX,
};

static CJK_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{4e00}-\x{9fa5}]{2,6}").expect("valid CJK run pattern"));

static PERSON_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // 张先生, 李总, 王姐
        r"[\x{4e00}-\x{9fa5}]{1,2}(?:先生|小姐|总|哥|姐)",
        // 小王, 老李
        r"(?:小|老)[\x{4e00}-\x{9fa5}]{1,2}",
        // @handle
        r"@[\w\x{4e00}-\x{9fa5}]+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid person pattern"))
    .collect()
});

static PROJECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // 星河项目, CRM系统, Foo APP
        r"[\x{4e00}-\x{9fa5}a-zA-Z0-9]{2,10}(?:项目|系统|平台|产品|APP|app)",
        // [Apollo]
        r"\[[^\]]+\]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid project pattern"))
    .collect()
});

fn push_unique(out: &mut Vec<String>, value: String) {
    if !out.contains(&value) {
        out.push(value);
    }
}

/// Extract up to eight lowercase keywords.
///
/// Generic tokens are 2-8 character runs split on non-alphanumeric
/// boundaries; the first five are kept. CJK runs of 2-6 ideographs follow,
/// again the first five. The combined list is deduplicated and capped.
///
/// ```
/// use triage_memory::extract_keywords;
///
/// let keywords = extract_keywords("明天 review 周报");
/// assert_eq!(keywords, vec!["明天", "review", "周报"]);
/// ```
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();

    let tokens = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| {
            let n = t.chars().count();
            (KEYWORD_MIN_CHARS..=KEYWORD_MAX_CHARS).contains(&n)
        })
        .take(KEYWORD_TOKEN_PREFIX)
        .map(str::to_string);

    let cjk = CJK_RUN
        .find_iter(&lower)
        .take(KEYWORD_CJK_PREFIX)
        .map(|m| m.as_str().to_string());

    let mut keywords = Vec::new();
    for keyword in tokens.chain(cjk) {
        push_unique(&mut keywords, keyword);
    }
    keywords.truncate(KEYWORD_LIMIT);
    keywords
}

fn find_all(patterns: &[Regex], text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for pattern in patterns {
        for m in pattern.find_iter(text) {
            push_unique(&mut found, m.as_str().to_string());
        }
    }
    found
}

/// Names of people mentioned in `text`.
pub fn detect_people(text: &str) -> Vec<String> {
    find_all(&PERSON_PATTERNS, text)
}

/// Project or product names mentioned in `text`.
pub fn detect_projects(text: &str) -> Vec<String> {
    find_all(&PROJECT_PATTERNS, text)
}
