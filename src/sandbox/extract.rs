//! Record extraction: interpret a compiled plan against fetched HTML.
//!
//! Extraction is synchronous and pure; the parsed document never crosses an
//! await point (the parse tree is not `Send`).

use scraper::{ElementRef, Html};
use serde_json::Value;
use url::Url;

use super::plan::{CompiledField, CompiledPlan};
use crate::types::Record;

/// Outcome of interpreting a plan against one page.
#[derive(Debug, Default)]
pub struct PageExtraction {
    /// Records extracted, in document order.
    pub records: Vec<Record>,
    /// Record nodes dropped because every field came back empty.
    pub filtered_count: usize,
    /// Absolute next-page URL, when the plan paginates and a link matched.
    pub next_page: Option<Url>,
}

/// Interpret `plan` against one page of HTML.
///
/// `remaining` caps how many more records this source may emit; `base` is
/// the page URL, used to absolutise the next-page link.
pub fn extract_page(html: &str, plan: &CompiledPlan, remaining: usize, base: &Url) -> PageExtraction {
    let document = Html::parse_document(html);
    let mut out = PageExtraction::default();

    for node in document.select(&plan.record_selector) {
        if out.records.len() >= remaining {
            break;
        }
        let record = extract_record(&node, &plan.fields);
        if record.values().all(Value::is_null) {
            out.filtered_count = out.filtered_count.saturating_add(1);
            continue;
        }
        out.records.push(record);
    }

    if let Some(follow) = &plan.follow_next {
        out.next_page = document
            .select(&follow.selector)
            .next()
            .and_then(|el| el.value().attr(&follow.attr))
            .and_then(|href| base.join(href).ok());
    }

    out
}

/// Extract one record from a record node. Missing fields become `null`.
fn extract_record(node: &ElementRef<'_>, fields: &[CompiledField]) -> Record {
    let mut record = Record::new();
    for field in fields {
        let value = extract_field(node, field);
        record.insert(
            field.name.clone(),
            value.map(Value::String).unwrap_or(Value::Null),
        );
    }
    record
}

/// Extract one field value from a record node, applying the rule's kind and
/// optional regex.
fn extract_field(node: &ElementRef<'_>, field: &CompiledField) -> Option<String> {
    let target = match &field.selector {
        Some(selector) => node.select(selector).next(),
        None => Some(*node),
    }?;

    let raw = match field.kind.as_str() {
        "attr" => target.value().attr(field.attr.as_deref()?)?.to_owned(),
        "html" => target.inner_html(),
        // "text" and anything the validator let through.
        _ => target.text().collect::<Vec<_>>().join(" "),
    };

    let trimmed = collapse_whitespace(&raw);
    if trimmed.is_empty() {
        return None;
    }

    match &field.pattern {
        Some(pattern) => {
            let captures = pattern.captures(&trimmed)?;
            let matched = captures
                .get(1)
                .or_else(|| captures.get(0))
                .map(|m| m.as_str().trim().to_owned())?;
            (!matched.is_empty()).then_some(matched)
        }
        None => Some(trimmed),
    }
}

/// Collapse internal whitespace runs and trim.
fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the duplicate-detection key for a record, when the plan dedupes.
///
/// Returns `None` when `dedupe_on` is empty (no deduplication).
pub fn dedupe_key(record: &Record, dedupe_on: &[String]) -> Option<String> {
    if dedupe_on.is_empty() {
        return None;
    }
    let mut key = String::new();
    for field in dedupe_on {
        let value = record.get(field).map(Value::to_string).unwrap_or_default();
        key.push_str(&value);
        key.push('\u{1f}');
    }
    Some(key)
}
