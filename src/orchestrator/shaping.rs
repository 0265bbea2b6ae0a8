//! Data-shaping orchestrator.
//!
//! Turns raw scraped records into the user's requested JSON schema via the
//! chat provider. The provider is prompted to act strictly as a parser; its
//! output is recovered from mixed text and checked against the requested
//! fields and template, with one retry before the failure is surfaced.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use scraper::Html;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::AppError;
use crate::provider::{ChatApi, ChatMessage};
use crate::types::{ExecutionResult, ParsedMeta, ParsedResponse, Record, ScrapeRequest};

use super::jsonx::{
    check_array_consistency, check_required_fields, check_template, extracted_fields,
    records_parsed, recover_json,
};

/// Shaping attempts per request (initial + one validator retry).
const MAX_SHAPING_ATTEMPTS: u32 = 2;

/// Default cap on the extracted text handed to the model.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 50_000;

/// Marker appended when the extracted text is truncated.
pub const TRUNCATION_MARKER: &str = "\n...[content truncated]";

/// Fixed system prompt for the shaping call.
const SHAPER_SYSTEM_PROMPT: &str = "\
You are strictly a data parser. You receive raw text scraped from web pages
and reorganize it into JSON.

Rules:
1. Extract only the requested fields. Do not invent data.
2. Follow the provided JSON template exactly: same keys at every level.
3. Use null for any value the text does not contain.
4. Respond with JSON and nothing else: no prose, no markdown fences.";

/// Orchestrates the shaping call against the chat provider.
pub struct DataShaper {
    chat: Arc<dyn ChatApi>,
    max_tokens: u32,
    max_text_length: usize,
}

impl DataShaper {
    /// Create a shaper with the default text cap.
    pub fn new(chat: Arc<dyn ChatApi>, max_tokens: u32) -> Self {
        Self::with_text_limit(chat, max_tokens, DEFAULT_MAX_TEXT_LENGTH)
    }

    /// Create a shaper with a custom extracted-text cap.
    pub fn with_text_limit(chat: Arc<dyn ChatApi>, max_tokens: u32, max_text_length: usize) -> Self {
        Self {
            chat,
            max_tokens,
            max_text_length,
        }
    }

    /// Shape an execution's records into the requested schema.
    ///
    /// # Errors
    ///
    /// - [`AppError::EmptyData`] when the execution produced no records (no
    ///   chat call is made).
    /// - [`AppError::Parsing`] when the output is not JSON after one retry.
    /// - [`AppError::ShapeValidation`] when the JSON deviates from the
    ///   requested fields or template after one retry.
    /// - Provider errors propagated from the chat client.
    pub async fn shape(
        &self,
        execution: &ExecutionResult,
        request: &ScrapeRequest,
    ) -> Result<ParsedResponse, AppError> {
        if execution.records.is_empty() {
            return Err(AppError::EmptyData(
                "execution produced no records to shape".to_owned(),
            ));
        }

        let text = extract_text(&execution.records, self.max_text_length);
        let messages = vec![
            ChatMessage::system(SHAPER_SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(request, &text)),
        ];

        let started = Instant::now();
        let mut tokens_used: u32 = 0;
        let mut parse_failure = true;
        let mut last_cause = String::new();

        for attempt in 1..=MAX_SHAPING_ATTEMPTS {
            let completion = self
                .chat
                .complete(messages.clone(), self.max_tokens)
                .await?;
            tokens_used = tokens_used.saturating_add(completion.tokens_used);

            let data = match recover_json(&completion.content) {
                Ok(value) => value,
                Err(cause) => {
                    warn!(attempt, %cause, "shaping output was not JSON");
                    parse_failure = true;
                    last_cause = cause;
                    continue;
                }
            };

            match conformance(&data, request) {
                Ok(()) => {
                    let records = records_parsed(&data);
                    info!(attempt, records, tokens_used, "shaping complete");
                    let model = if completion.model.is_empty() {
                        self.chat.model_id().to_owned()
                    } else {
                        completion.model
                    };
                    return Ok(ParsedResponse {
                        meta: ParsedMeta {
                            model,
                            tokens_used,
                            parsing_ms: elapsed_ms(started),
                            records_parsed: records,
                            fields_extracted: extracted_fields(&data),
                            data_sources: execution.meta.target_urls.clone(),
                            timestamp: Utc::now(),
                        },
                        data,
                        source_meta: execution.meta.clone(),
                        raw_output: completion.content,
                    });
                }
                Err(cause) => {
                    warn!(attempt, %cause, "shaping output failed conformance");
                    parse_failure = false;
                    last_cause = cause;
                }
            }
        }

        if parse_failure {
            Err(AppError::Parsing(last_cause))
        } else {
            Err(AppError::ShapeValidation(last_cause))
        }
    }
}

/// Run every conformance check the request implies.
fn conformance(data: &Value, request: &ScrapeRequest) -> Result<(), String> {
    check_required_fields(data, &request.desired_fields)?;
    if let Some(template) = &request.response_template {
        check_template(data, template)?;
    }
    check_array_consistency(data)
}

/// Build the user message: extracted text, field list, template.
fn user_prompt(request: &ScrapeRequest, text: &str) -> String {
    let mut prompt = String::new();

    if !request.desired_fields.is_empty() {
        prompt.push_str(&format!(
            "Fields to extract: {}\n",
            request.desired_fields.join(", ")
        ));
    }

    match &request.response_template {
        Some(template) => {
            let rendered = serde_json::to_string_pretty(template).unwrap_or_default();
            prompt.push_str(&format!("JSON template to follow:\n{rendered}\n"));
        }
        None => {
            prompt.push_str(
                "No template was given: respond with {\"data\": [...]} where each \
                 element carries the fields above.\n",
            );
        }
    }

    prompt.push_str("\nScraped content:\n");
    prompt.push_str(text);
    prompt
}

// ---------------------------------------------------------------------------
// Text extraction
// ---------------------------------------------------------------------------

/// Render scraped records as readable text for the model.
///
/// HTML-looking string values are stripped to text; nested maps become
/// `key: value` lines; nested lists are flattened. The combined text is
/// capped at `max_length` characters with a visible truncation marker.
pub fn extract_text(records: &[Record], max_length: usize) -> String {
    let mut out = String::new();
    for (index, record) in records.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(&format!("record {}:\n", index.saturating_add(1)));
        for (key, value) in record {
            render_value(&mut out, key, value, 1);
        }
    }
    truncate_chars(&out, max_length)
}

/// Render one value under `key` at the given indent depth.
fn render_value(out: &mut String, key: &str, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::String(s) if looks_like_html(s) => {
            out.push_str(&format!("{indent}{key}: {}\n", html_to_text(s)));
        }
        Value::Object(map) => {
            out.push_str(&format!("{indent}{key}:\n"));
            for (sub_key, sub_value) in map {
                render_value(out, sub_key, sub_value, depth.saturating_add(1));
            }
        }
        Value::Array(items) => {
            out.push_str(&format!("{indent}{key}:\n"));
            for (index, item) in items.iter().enumerate() {
                render_value(out, &format!("[{index}]"), item, depth.saturating_add(1));
            }
        }
        Value::Null => out.push_str(&format!("{indent}{key}: null\n")),
        Value::String(s) => out.push_str(&format!("{indent}{key}: {s}\n")),
        other => out.push_str(&format!("{indent}{key}: {other}\n")),
    }
}

/// Whether a string looks like HTML markup: a `<` immediately followed by an
/// ASCII letter, and a closing `>` somewhere after it.
pub fn looks_like_html(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes
        .windows(2)
        .any(|w| w[0] == b'<' && w[1].is_ascii_alphabetic())
        && s.contains('>')
}

/// Strip markup from an HTML fragment, returning whitespace-collapsed text.
///
/// Scripts, styles, and comments are removed before parsing; the result
/// never contains a tag token (`<` followed by a letter).
pub fn html_to_text(html: &str) -> String {
    let cleaned = strip_block(html, "<script", "</script>");
    let cleaned = strip_block(&cleaned, "<style", "</style>");
    let cleaned = strip_block(&cleaned, "<!--", "-->");

    let fragment = Html::parse_fragment(&cleaned);
    let text = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    defang_tags(&collapsed)
}

/// Remove every `start..end` block (case-insensitive on `start`).
fn strip_block(html: &str, start: &str, end: &str) -> String {
    // ASCII lowering keeps byte offsets aligned with the original.
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(offset) = lower[pos..].find(start) {
        let begin = pos + offset;
        out.push_str(&html[pos..begin]);
        match lower[begin..].find(end) {
            Some(end_offset) => pos = begin + end_offset + end.len(),
            None => {
                pos = html.len();
                break;
            }
        }
    }
    out.push_str(&html[pos..]);
    out
}

/// Neutralise any tag token that survived entity decoding.
fn defang_tags(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    for (index, c) in text.char_indices() {
        if c == '<'
            && bytes
                .get(index.saturating_add(1))
                .is_some_and(u8::is_ascii_alphabetic)
        {
            out.push_str("&lt;");
        } else {
            out.push(c);
        }
    }
    out
}

/// Truncate at a char boundary, appending the truncation marker.
fn truncate_chars(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max_length).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Saturating milliseconds since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
