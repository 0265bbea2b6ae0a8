//! Core domain types shared across the sandbox, orchestrators, registry,
//! and server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw scraped record — one row of data keyed by field name.
pub type Record = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A natural-language data request from the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    /// What the user wants, in their own words. Must be non-empty.
    pub description: String,
    /// Field names the shaped output must contain, in order. May be empty.
    #[serde(default)]
    pub desired_fields: Vec<String>,
    /// Optional JSON object the shaped output must structurally follow.
    #[serde(default)]
    pub response_template: Option<Value>,
    /// Pages to scrape, in order. Empty means the model proposes sources.
    #[serde(default)]
    pub target_urls: Vec<String>,
    /// Informational refresh cadence (e.g. "hourly"). Persisted, not scheduled.
    #[serde(default)]
    pub update_frequency: String,
}

impl ScrapeRequest {
    /// Validate request-side constraints.
    ///
    /// # Errors
    ///
    /// Returns a message for an empty description or a non-object template.
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description must not be empty".to_owned());
        }
        if let Some(template) = &self.response_template {
            if !template.is_object() {
                return Err("response_template must be a JSON object".to_owned());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generated plan
// ---------------------------------------------------------------------------

/// Outcome of static validation of an LLM-emitted scraper plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// The plan text parsed as JSON.
    pub syntax_ok: bool,
    /// Every extraction capability used is on the allow-list.
    pub capabilities_ok: bool,
    /// The forbidden-token scan found nothing.
    pub no_forbidden_ops: bool,
    /// The `scrape_data` entry object has the required shape.
    pub entry_ok: bool,
    /// Validation errors, each prefixed `syntax:` or `security:`.
    pub errors: Vec<String>,
    /// Non-fatal findings (e.g. unknown plan keys).
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// A plan is executable iff all four flags hold.
    pub fn is_executable(&self) -> bool {
        self.syntax_ok && self.capabilities_ok && self.no_forbidden_ops && self.entry_ok
    }
}

/// A scraper plan captured from an LLM completion, with validation outcome
/// and generation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPlan {
    /// Raw plan text (JSON) as emitted by the model, fences stripped.
    pub source: String,
    /// Static validation outcome.
    pub validation: ValidationReport,
    /// URLs the plan will be executed against, in order.
    pub target_urls: Vec<String>,
    /// Fields the shaped output must contain.
    pub required_fields: Vec<String>,
    /// Model that produced the plan.
    pub model: String,
    /// Total tokens billed for the generation call.
    pub tokens_used: u32,
    /// Wall-clock generation time in milliseconds.
    pub generation_ms: u64,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Outcome of scraping a single URL within a multi-URL execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    /// The URL this outcome describes.
    pub url: String,
    /// Whether this source produced records.
    pub ok: bool,
    /// Records contributed by this source.
    pub record_count: usize,
    /// Records dropped by plan filters.
    pub filtered_count: usize,
    /// Records dropped as duplicates.
    pub duplicate_count: usize,
    /// Failure cause when `ok` is false.
    pub error: Option<String>,
    /// Wall-clock time spent on this source in milliseconds.
    pub elapsed_ms: u64,
    /// Extraction method used (e.g. "css-selector").
    pub method: String,
    /// Extraction confidence label ("high", "medium", "low").
    pub confidence: String,
}

impl SourceOutcome {
    /// An outcome for a source that never ran before the deadline.
    pub fn timed_out(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            ok: false,
            record_count: 0,
            filtered_count: 0,
            duplicate_count: 0,
            error: Some("timeout".to_owned()),
            elapsed_ms: 0,
            method: "css-selector".to_owned(),
            confidence: "low".to_owned(),
        }
    }
}

/// Aggregate metadata for one plan execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMeta {
    /// Number of records in the aggregated result.
    pub total_count: usize,
    /// Records dropped by plan filters across all sources.
    pub filtered_count: usize,
    /// Records dropped as duplicates across all sources.
    pub duplicate_count: usize,
    /// URLs the execution targeted, in input order.
    pub target_urls: Vec<String>,
    /// Model that generated the plan, when known.
    pub model: Option<String>,
    /// Plan generation time in milliseconds, when known.
    pub generation_ms: Option<u64>,
    /// Extraction method used.
    pub method: String,
    /// Extraction confidence label.
    pub confidence: String,
}

/// Result of executing a scraper plan against one or more URLs.
///
/// Invariants: `per_source.len() == meta.target_urls.len()` in input order;
/// `records` is the concatenation of successful per-source records in source
/// order; `meta.total_count == records.len()`; `ok == !records.is_empty()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the execution produced at least one record.
    pub ok: bool,
    /// Aggregated records in source order.
    pub records: Vec<Record>,
    /// Aggregate metadata.
    pub meta: ExecutionMeta,
    /// Execution-level errors (validation, timeout, per-source failures).
    pub errors: Vec<String>,
    /// Per-source outcomes, one per target URL, in input order.
    pub per_source: Vec<SourceOutcome>,
    /// Total wall-clock time in milliseconds.
    pub elapsed_ms: u64,
    /// When the execution finished.
    pub scraped_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Shaped response
// ---------------------------------------------------------------------------

/// Metadata attached to a shaped response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMeta {
    /// Model that shaped the data.
    pub model: String,
    /// Total tokens billed for the shaping call.
    pub tokens_used: u32,
    /// Wall-clock shaping time in milliseconds.
    pub parsing_ms: u64,
    /// Records in the output's primary array (1 for a single object).
    pub records_parsed: usize,
    /// Field names present in the first shaped record.
    pub fields_extracted: Vec<String>,
    /// URLs the raw data came from.
    pub data_sources: Vec<String>,
    /// When shaping finished.
    pub timestamp: DateTime<Utc>,
}

/// The LLM-shaped response: user-schema JSON plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    /// Shaped JSON object conforming to the requested fields and template.
    pub data: Value,
    /// Shaping metadata.
    pub meta: ParsedMeta,
    /// Metadata carried over from the execution that fed this shaping.
    pub source_meta: ExecutionMeta,
    /// Verbatim model output before JSON recovery.
    pub raw_output: String,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// A persisted endpoint row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Unique lower-case hyphenated identifier.
    pub endpoint_id: String,
    /// The JSON object served at `/api/data/{endpoint_id}`.
    pub json_data: Value,
    /// The user's original description.
    pub description: String,
    /// URLs the data was scraped from.
    pub source_urls: Vec<String>,
    /// Record count at registration time.
    pub records_count: i64,
    /// Field names in the shaped data.
    pub fields: Vec<String>,
    /// When the shaping step finished.
    pub parsing_timestamp: Option<DateTime<Utc>>,
    /// When the endpoint was registered.
    pub created_at: DateTime<Utc>,
}

/// Summary of a registered endpoint, as returned by create and list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Unique lower-case hyphenated identifier.
    pub endpoint_id: String,
    /// Full URL the endpoint is served at.
    pub access_url: String,
    /// The user's original description.
    pub description: String,
    /// When the endpoint was registered.
    pub created_at: DateTime<Utc>,
    /// Record count at registration time.
    pub records_count: i64,
}
