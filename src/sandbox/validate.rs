//! Static validation of untrusted plan text.
//!
//! Four checks, in order: JSON syntax, extraction-capability allow-list,
//! forbidden-token scan, entry-object shape. The scan is conservative and
//! purely textual: any match in the raw plan text fails validation, whether
//! or not the token would be reachable. Validation is a pure function of the
//! source text, so running it twice yields the same report.

use std::sync::OnceLock;

use regex::Regex;
use scraper::Selector;
use serde_json::Value;

use super::plan::{
    CompiledField, CompiledFollow, CompiledPlan, EntryPlan, ScraperPlan, ALLOWED_KINDS,
};
use crate::types::ValidationReport;

/// Identifiers whose textual presence anywhere in the plan rejects it.
/// Dynamic evaluation, process escapes, file access (`open`, `input`), and
/// the module names historically abused to break out of hosted scraper
/// sandboxes.
const FORBIDDEN_OPS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "os.system",
    "subprocess",
    "shutil",
    "open",
    "input",
    "breakpoint",
];

/// Module names rejected on any textual match.
const FORBIDDEN_MODULES: &[&str] = &["os", "sys", "socket", "pickle", "marshal"];

/// URL schemes a plan may not reference.
const FORBIDDEN_SCHEMES: &[&str] = &["file:", "ftp:"];

/// Keys recognised at the top level of a plan document.
const KNOWN_TOP_KEYS: &[&str] = &["scrape_data"];

/// Keys recognised inside the `scrape_data` entry object.
const KNOWN_ENTRY_KEYS: &[&str] = &[
    "record_selector",
    "fields",
    "source_urls",
    "record_limit",
    "dedupe_on",
    "follow_next",
];

/// Validate plan text without compiling it for execution.
pub fn validate_plan(source: &str) -> ValidationReport {
    let (report, _compiled) = check(source);
    report
}

/// Validate and compile plan text in one pass.
///
/// # Errors
///
/// Returns the failing [`ValidationReport`] when any check fails.
pub fn compile_plan(source: &str) -> Result<CompiledPlan, ValidationReport> {
    let (report, compiled) = check(source);
    match compiled {
        Some(plan) if report.is_executable() => Ok(plan),
        _ => Err(report),
    }
}

/// Run all four checks, producing the report and (when fully valid) the
/// compiled plan.
fn check(source: &str) -> (ValidationReport, Option<CompiledPlan>) {
    let mut report = ValidationReport::default();

    // 3 (textual, order-independent): forbidden-token scan over raw text.
    // Runs even when the JSON does not parse.
    report.no_forbidden_ops = true;
    if let Some(error) = scan_forbidden(source) {
        report.no_forbidden_ops = false;
        report.errors.push(error);
    }

    // 1: syntax.
    let value: Value = match serde_json::from_str(source) {
        Ok(v) => {
            report.syntax_ok = true;
            v
        }
        Err(e) => {
            report.errors.push(format!("syntax: {e}"));
            return (report, None);
        }
    };

    collect_unknown_key_warnings(&value, &mut report.warnings);

    // 4: entry-object shape.
    let plan: ScraperPlan = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            report
                .errors
                .push(format!("syntax: scrape_data entry is malformed: {e}"));
            return (report, None);
        }
    };
    match check_entry(&plan.scrape_data) {
        Ok(()) => report.entry_ok = true,
        Err(error) => {
            report.errors.push(error);
            return (report, None);
        }
    }

    // 2: capability allow-list, checked by compiling every rule.
    match compile_entry(&plan.scrape_data) {
        Ok(compiled) => {
            report.capabilities_ok = true;
            (report, Some(compiled))
        }
        Err(errors) => {
            report.errors.extend(errors);
            (report, None)
        }
    }
}

/// Scan raw plan text for forbidden tokens. Returns at most one error,
/// for the first token found.
fn scan_forbidden(source: &str) -> Option<String> {
    static OPS_RE: OnceLock<Regex> = OnceLock::new();
    static MODULES_RE: OnceLock<Regex> = OnceLock::new();

    let ops = OPS_RE.get_or_init(|| {
        let escaped: Vec<String> = FORBIDDEN_OPS.iter().map(|t| regex::escape(t)).collect();
        Regex::new(&format!(r"\b({})\b", escaped.join("|")))
            .expect("escaped literal alternation compiles")
    });
    if let Some(m) = ops.find(source) {
        return Some(format!("security: forbidden operation: {}", m.as_str()));
    }

    let modules = MODULES_RE.get_or_init(|| {
        Regex::new(&format!(r"\b({})\b", FORBIDDEN_MODULES.join("|")))
            .expect("literal alternation compiles")
    });
    if let Some(m) = modules.find(source) {
        return Some(format!("security: forbidden module: {}", m.as_str()));
    }

    for scheme in FORBIDDEN_SCHEMES {
        if source.contains(scheme) {
            return Some(format!("security: forbidden url scheme: {scheme}"));
        }
    }

    None
}

/// Warn about unrecognised keys at the top and entry levels.
fn collect_unknown_key_warnings(value: &Value, warnings: &mut Vec<String>) {
    let Some(top) = value.as_object() else {
        return;
    };
    for key in top.keys() {
        if !KNOWN_TOP_KEYS.contains(&key.as_str()) {
            warnings.push(format!("unknown top-level key ignored: {key}"));
        }
    }
    if let Some(entry) = top.get("scrape_data").and_then(Value::as_object) {
        for key in entry.keys() {
            if !KNOWN_ENTRY_KEYS.contains(&key.as_str()) {
                warnings.push(format!("unknown scrape_data key ignored: {key}"));
            }
        }
    }
}

/// Entry-object shape: a non-empty record selector and at least one field.
fn check_entry(entry: &EntryPlan) -> Result<(), String> {
    if entry.record_selector.trim().is_empty() {
        return Err("syntax: scrape_data.record_selector must not be empty".to_owned());
    }
    if entry.fields.is_empty() {
        return Err("syntax: scrape_data.fields must define at least one field".to_owned());
    }
    Ok(())
}

/// Compile every selector, kind, and regex, collecting allow-list errors.
fn compile_entry(entry: &EntryPlan) -> Result<CompiledPlan, Vec<String>> {
    let mut errors = Vec::new();

    let record_selector = match Selector::parse(&entry.record_selector) {
        Ok(s) => Some(s),
        Err(e) => {
            errors.push(format!(
                "syntax: invalid record_selector {:?}: {e}",
                entry.record_selector
            ));
            None
        }
    };

    let mut fields = Vec::with_capacity(entry.fields.len());
    for (name, rule) in &entry.fields {
        if !ALLOWED_KINDS.contains(&rule.kind.as_str()) {
            errors.push(format!(
                "security: extraction kind {:?} for field {:?} is not allowed (allowed: {})",
                rule.kind,
                name,
                ALLOWED_KINDS.join(", ")
            ));
            continue;
        }
        if rule.kind == "attr" && rule.attr.as_deref().map_or(true, str::is_empty) {
            errors.push(format!(
                "syntax: field {name:?} uses kind \"attr\" but names no attribute"
            ));
            continue;
        }

        let selector = match &rule.selector {
            Some(raw) => match Selector::parse(raw) {
                Ok(s) => Some(s),
                Err(e) => {
                    errors.push(format!(
                        "syntax: invalid selector {raw:?} for field {name:?}: {e}"
                    ));
                    continue;
                }
            },
            None => None,
        };

        let pattern = match &rule.pattern {
            Some(raw) => match Regex::new(raw) {
                Ok(r) => Some(r),
                Err(e) => {
                    errors.push(format!(
                        "syntax: invalid pattern {raw:?} for field {name:?}: {e}"
                    ));
                    continue;
                }
            },
            None => None,
        };

        fields.push(CompiledField {
            name: name.clone(),
            selector,
            kind: rule.kind.clone(),
            attr: rule.attr.clone(),
            pattern,
        });
    }

    let follow_next = match &entry.follow_next {
        Some(follow) => match Selector::parse(&follow.selector) {
            Ok(selector) => Some(CompiledFollow {
                selector,
                attr: follow.attr.clone(),
                max_pages: follow.max_pages,
            }),
            Err(e) => {
                errors.push(format!(
                    "syntax: invalid follow_next selector {:?}: {e}",
                    follow.selector
                ));
                None
            }
        },
        None => None,
    };

    match (errors.is_empty(), record_selector) {
        (true, Some(record_selector)) => Ok(CompiledPlan {
            record_selector,
            fields,
            record_limit: entry.record_limit,
            dedupe_on: entry.dedupe_on.clone(),
            follow_next,
        }),
        _ => Err(errors),
    }
}
