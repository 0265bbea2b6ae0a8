//! Declarative scraper-plan schema and its compiled form.
//!
//! A plan is the JSON document the LLM emits in place of program source:
//!
//! ```json
//! {
//!   "scrape_data": {
//!     "record_selector": "table.prices tbody tr",
//!     "fields": {
//!       "symbol": {"selector": "td.sym", "kind": "text"},
//!       "price":  {"selector": "td.price", "kind": "text", "pattern": "([0-9.]+)"}
//!     },
//!     "record_limit": 100,
//!     "dedupe_on": ["symbol"],
//!     "follow_next": {"selector": "a.next", "attr": "href", "max_pages": 2}
//!   }
//! }
//! ```
//!
//! Compilation pre-parses every selector and regex so interpretation is a
//! pure walk over the fetched documents.

use std::collections::BTreeMap;

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};

/// Extraction kinds a field rule may use. Anything else fails validation.
pub const ALLOWED_KINDS: &[&str] = &["text", "attr", "html"];

/// The top-level plan document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperPlan {
    /// The entry object, analogous to the `scrape_data(urls)` entry point.
    pub scrape_data: EntryPlan,
}

/// The `scrape_data` entry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPlan {
    /// CSS selector matching one record node per record.
    pub record_selector: String,
    /// Field extraction rules, keyed by output field name.
    pub fields: BTreeMap<String, FieldRule>,
    /// Pages the model proposes when the request named none.
    #[serde(default)]
    pub source_urls: Vec<String>,
    /// Cap on records per source. `None` means unlimited.
    #[serde(default)]
    pub record_limit: Option<usize>,
    /// Field names whose combined values identify a duplicate record.
    #[serde(default)]
    pub dedupe_on: Vec<String>,
    /// Optional next-page link to follow within one source.
    #[serde(default)]
    pub follow_next: Option<FollowNext>,
}

/// How to extract one field from a record node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// CSS selector scoped to the record node. `None` means the node itself.
    #[serde(default)]
    pub selector: Option<String>,
    /// Extraction kind: `text`, `attr`, or `html`.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Attribute name, required when `kind` is `attr`.
    #[serde(default)]
    pub attr: Option<String>,
    /// Optional regex applied to the extracted value; capture group 1 wins.
    #[serde(default)]
    pub pattern: Option<String>,
}

fn default_kind() -> String {
    "text".to_owned()
}

/// Pagination rule: follow a link to the next page within the same source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowNext {
    /// CSS selector for the next-page anchor.
    pub selector: String,
    /// Attribute holding the link target.
    #[serde(default = "default_attr")]
    pub attr: String,
    /// Maximum additional pages to fetch per source.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_attr() -> String {
    "href".to_owned()
}

fn default_max_pages() -> usize {
    1
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// A plan with every selector and regex pre-parsed.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    /// Parsed record selector.
    pub record_selector: Selector,
    /// Compiled field rules in name order.
    pub fields: Vec<CompiledField>,
    /// Per-source record cap.
    pub record_limit: Option<usize>,
    /// Duplicate-detection key fields.
    pub dedupe_on: Vec<String>,
    /// Compiled pagination rule.
    pub follow_next: Option<CompiledFollow>,
}

/// A compiled field rule.
#[derive(Debug, Clone)]
pub struct CompiledField {
    /// Output field name.
    pub name: String,
    /// Parsed scoped selector, when present.
    pub selector: Option<Selector>,
    /// Extraction kind (validated member of [`ALLOWED_KINDS`]).
    pub kind: String,
    /// Attribute name for `attr` extraction.
    pub attr: Option<String>,
    /// Compiled post-extraction regex.
    pub pattern: Option<Regex>,
}

/// A compiled pagination rule.
#[derive(Debug, Clone)]
pub struct CompiledFollow {
    /// Parsed next-page selector.
    pub selector: Selector,
    /// Attribute holding the link target.
    pub attr: String,
    /// Maximum additional pages per source.
    pub max_pages: usize,
}
