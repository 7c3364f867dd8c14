//! Capture classification: prompt construction and response parsing.
//!
//! One call to [`ClassificationEngine::classify`] makes exactly one request
//! to the classifier client. Retrying is the scheduler's job.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use triage_core::{Classification, ClassifierClient, ContainerType, Error, Priority, Result};

const BASE_PROMPT: &str = r#"你是一个智能助手，负责把用户输入的内容归入以下三个容器之一：
1. calendar - 日程（有明确时间的安排，如会议、约会）
2. todo - 待办（需要完成的任务、行动项）
3. note - 笔记（想法、灵感、信息记录、学习内容）

只返回如下 JSON，不要附加其他文字：
{
    "container": "calendar|todo|note",
    "extractedTime": "ISO8601 格式时间（没有则省略）",
    "suggestedPriority": "important|normal",
    "summary": "分类理由，10 字以内"
}

summary 说明分类理由，例如"包含会议时间"、"是一个任务"、"记录想法"。"#;

const CONTEXT_HEADER: &str = "参考以下用户上下文信息，以更准确地分类：";

/// Build the system instruction, appending `context` when it has content.
///
/// Blank or whitespace-only context adds nothing.
pub fn build_system_prompt(context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("{}\n\n{}\n{}", BASE_PROMPT, CONTEXT_HEADER, ctx),
        _ => BASE_PROMPT.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClassification {
    container: String,
    #[serde(default)]
    extracted_time: Option<String>,
    suggested_priority: String,
    summary: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Cut the JSON object out of a model answer that may carry code fences or
/// surrounding prose.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Parse an ISO-8601 timestamp. Offset-less values are read as local time.
pub fn parse_extracted_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a classifier answer.
///
/// `container`, `suggestedPriority` and `summary` are required; a missing
/// field or malformed JSON is an `InvalidResponse`. Unknown tags fall back
/// to `note` and `normal`, and an unparseable time is dropped.
pub fn parse_classification(raw: &str) -> Result<Classification> {
    let json = extract_json_object(raw)
        .ok_or_else(|| Error::InvalidResponse("no JSON object in classifier output".into()))?;

    let parsed: RawClassification = serde_json::from_str(json)
        .map_err(|e| Error::InvalidResponse(format!("malformed classification: {}", e)))?;

    let extracted_time = parsed.extracted_time.as_deref().and_then(|t| {
        let time = parse_extracted_time(t);
        if time.is_none() && !t.trim().is_empty() {
            debug!(value = t, "Dropping unparseable extractedTime");
        }
        time
    });

    Ok(Classification {
        container: ContainerType::from_tag_lenient(&parsed.container),
        extracted_time,
        suggested_priority: Priority::from_tag_lenient(&parsed.suggested_priority),
        summary: parsed.summary.trim().to_string(),
        confidence: parsed.confidence,
    })
}

/// Orchestrates one classification attempt.
pub struct ClassificationEngine {
    client: Arc<dyn ClassifierClient>,
}

impl ClassificationEngine {
    pub fn new(client: Arc<dyn ClassifierClient>) -> Self {
        Self { client }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    pub fn client(&self) -> &Arc<dyn ClassifierClient> {
        &self.client
    }

    /// Classify `text`, giving the model `context` as soft guidance.
    #[instrument(
        skip(self, text, context),
        fields(subsystem = "inference", component = "classification", op = "classify")
    )]
    pub async fn classify(&self, text: &str, context: Option<&str>) -> Result<Classification> {
        if !self.client.is_configured() {
            return Err(Error::ConfigurationMissing(
                "classifier has no API key".to_string(),
            ));
        }

        let start = Instant::now();
        let system_prompt = build_system_prompt(context);
        let raw = self.client.classify(&system_prompt, text).await?;
        trace!(response_len = raw.len(), raw = %raw, "Classifier answered");

        let classification = parse_classification(&raw)?;
        debug!(
            model = self.client.model_name(),
            container = %classification.container,
            priority = %classification.suggested_priority,
            has_time = classification.extracted_time.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Classification complete"
        );
        Ok(classification)
    }
}
