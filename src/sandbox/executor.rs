//! Timed plan interpretation with per-source failure isolation.
//!
//! An execution walks the target URLs in input order inside a dedicated
//! task. Each source reports its outcome over a channel as soon as it
//! finishes, so when the wall-clock deadline fires the collector keeps every
//! per-source result that already arrived and fills the rest with timeout
//! markers. A source failure never aborts later sources.
//!
//! Lifecycle per execution: validating → compiling → invoking →
//! succeeded | timed_out | failed. Terminal states always produce a fully
//! populated [`ExecutionResult`].

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::extract::{dedupe_key, extract_page};
use super::fetch::{check_target, fetch_page};
use super::plan::CompiledPlan;
use super::validate::compile_plan;
use crate::config::ScrapingConfig;
use crate::types::{
    ExecutionMeta, ExecutionResult, GeneratedPlan, Record, SourceOutcome, ValidationReport,
};

/// Extraction method label for every plan-driven execution.
const METHOD: &str = "css-selector";

/// Progress message from the execution task: one finished source.
type SourceProgress = (usize, SourceOutcome, Vec<Record>);

/// Interprets validated scraper plans under a safety policy.
pub struct SandboxExecutor {
    client: reqwest::Client,
}

impl SandboxExecutor {
    /// Create an executor with a page-fetch client built from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ScrapingConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: super::fetch::build_client(config)?,
        })
    }

    /// Run raw plan text against `urls` under `timeout`.
    ///
    /// Never returns an error across this boundary: failures appear as
    /// `ok=false` with populated `errors`.
    pub async fn execute_text(
        &self,
        source: &str,
        urls: &[String],
        timeout: Duration,
    ) -> ExecutionResult {
        let started = Instant::now();

        debug!(url_count = urls.len(), "validating plan");
        let compiled = match compile_plan(source) {
            Ok(plan) => plan,
            Err(report) => {
                return validation_failure(report, urls, started);
            }
        };

        debug!("invoking plan");
        let mut result = self.invoke(compiled, urls, timeout).await;
        result.elapsed_ms = elapsed_ms(started);
        result.scraped_at = Some(Utc::now());
        result
    }

    /// Run a generated plan against its own target URLs, merging generation
    /// metadata into the result.
    pub async fn execute_plan(&self, plan: &GeneratedPlan, timeout: Duration) -> ExecutionResult {
        let mut result = self
            .execute_text(&plan.source, &plan.target_urls, timeout)
            .await;
        result.meta.model = Some(plan.model.clone());
        result.meta.generation_ms = Some(plan.generation_ms);
        result
    }

    /// Drive the source walk in a dedicated task and collect progress until
    /// completion or deadline.
    async fn invoke(&self, plan: CompiledPlan, urls: &[String], timeout: Duration) -> ExecutionResult {
        let mut errors = Vec::new();
        if urls.is_empty() {
            errors.push("no target urls to scrape".to_owned());
            return assemble(vec![], vec![], urls, errors);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<SourceProgress>();
        let task_urls: Vec<String> = urls.to_vec();
        let client = self.client.clone();
        let handle = tokio::spawn(run_sources(client, plan, task_urls, tx));

        let mut outcomes: Vec<Option<SourceOutcome>> = vec![None; urls.len()];
        let mut records_by_source: Vec<Vec<Record>> = vec![Vec::new(); urls.len()];
        let mut timed_out = false;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some((index, outcome, records)) => {
                        outcomes[index] = Some(outcome);
                        records_by_source[index] = records;
                    }
                    None => break,
                },
                () = &mut deadline => {
                    handle.abort();
                    // Keep whatever progress was already reported.
                    while let Ok((index, outcome, records)) = rx.try_recv() {
                        outcomes[index] = Some(outcome);
                        records_by_source[index] = records;
                    }
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(timeout_s = timeout.as_secs(), "execution timed out");
            errors.push(format!("execution-timeout: {}s", timeout.as_secs()));
        } else {
            let _ = handle.await;
        }

        let per_source: Vec<SourceOutcome> = outcomes
            .into_iter()
            .zip(urls)
            .map(|(outcome, url)| outcome.unwrap_or_else(|| SourceOutcome::timed_out(url)))
            .collect();

        for outcome in per_source.iter().filter(|o| !o.ok) {
            if let Some(error) = &outcome.error {
                if error != "timeout" {
                    errors.push(format!("{}: {error}", outcome.url));
                }
            }
        }

        assemble(per_source, records_by_source, urls, errors)
    }
}

/// Walk the sources in input order, reporting each outcome as it finishes.
async fn run_sources(
    client: reqwest::Client,
    plan: CompiledPlan,
    urls: Vec<String>,
    tx: mpsc::UnboundedSender<SourceProgress>,
) {
    let mut seen: HashSet<String> = HashSet::new();
    for (index, url) in urls.iter().enumerate() {
        let (outcome, records) = scrape_source(&client, &plan, url, &mut seen).await;
        if tx.send((index, outcome, records)).is_err() {
            // Collector gone — deadline fired.
            return;
        }
    }
}

/// Scrape one source, following pagination up to the plan's budget.
///
/// All failures are captured in the outcome; this function never panics the
/// walk.
async fn scrape_source(
    client: &reqwest::Client,
    plan: &CompiledPlan,
    raw_url: &str,
    seen: &mut HashSet<String>,
) -> (SourceOutcome, Vec<Record>) {
    let started = Instant::now();
    let mut outcome = SourceOutcome {
        url: raw_url.to_owned(),
        ok: false,
        record_count: 0,
        filtered_count: 0,
        duplicate_count: 0,
        error: None,
        elapsed_ms: 0,
        method: METHOD.to_owned(),
        confidence: "low".to_owned(),
    };

    let first_url = match check_target(raw_url) {
        Ok(url) => url,
        Err(e) => {
            outcome.error = Some(e);
            outcome.elapsed_ms = elapsed_ms(started);
            return (outcome, vec![]);
        }
    };

    let limit = plan.record_limit.unwrap_or(usize::MAX);
    let max_pages = plan
        .follow_next
        .as_ref()
        .map_or(0, |follow| follow.max_pages);

    let mut records: Vec<Record> = Vec::new();
    let mut page_url = first_url;
    let mut pages_fetched = 0_usize;

    loop {
        let html = match fetch_page(client, &page_url).await {
            Ok(html) => html,
            Err(e) => {
                if pages_fetched == 0 {
                    outcome.error = Some(e);
                } else {
                    // Later pages are best-effort; keep what we have.
                    debug!(url = %page_url, error = %e, "pagination fetch failed");
                }
                break;
            }
        };
        pages_fetched = pages_fetched.saturating_add(1);

        let remaining = limit.saturating_sub(records.len());
        let page = extract_page(&html, plan, remaining, &page_url);
        outcome.filtered_count = outcome.filtered_count.saturating_add(page.filtered_count);

        for record in page.records {
            match dedupe_key(&record, &plan.dedupe_on) {
                Some(key) if !seen.insert(key.clone()) => {
                    outcome.duplicate_count = outcome.duplicate_count.saturating_add(1);
                }
                _ => records.push(record),
            }
        }

        match page.next_page {
            Some(next) if pages_fetched <= max_pages && records.len() < limit => page_url = next,
            _ => break,
        }
    }

    outcome.record_count = records.len();
    outcome.ok = !records.is_empty();
    if !outcome.ok && outcome.error.is_none() {
        outcome.error = Some(if outcome.duplicate_count > 0 {
            "all matched records were duplicates".to_owned()
        } else {
            "no records matched record_selector".to_owned()
        });
    }
    outcome.confidence = if outcome.ok && outcome.filtered_count == 0 {
        "high".to_owned()
    } else if outcome.ok {
        "medium".to_owned()
    } else {
        "low".to_owned()
    };
    outcome.elapsed_ms = elapsed_ms(started);

    (outcome, records)
}

/// Build the short-circuit result for a plan that failed static validation.
fn validation_failure(
    report: ValidationReport,
    urls: &[String],
    started: Instant,
) -> ExecutionResult {
    let per_source: Vec<SourceOutcome> = urls
        .iter()
        .map(|url| SourceOutcome {
            url: url.clone(),
            ok: false,
            record_count: 0,
            filtered_count: 0,
            duplicate_count: 0,
            error: Some("not executed: plan failed validation".to_owned()),
            elapsed_ms: 0,
            method: METHOD.to_owned(),
            confidence: "low".to_owned(),
        })
        .collect();

    ExecutionResult {
        ok: false,
        records: vec![],
        meta: ExecutionMeta {
            total_count: 0,
            filtered_count: 0,
            duplicate_count: 0,
            target_urls: urls.to_vec(),
            model: None,
            generation_ms: None,
            method: METHOD.to_owned(),
            confidence: "low".to_owned(),
        },
        errors: report.errors,
        per_source,
        elapsed_ms: elapsed_ms(started),
        scraped_at: Some(Utc::now()),
    }
}

/// Assemble the terminal result from per-source outcomes and records.
///
/// `records` is the concatenation of successful per-source records in source
/// order; counts are recomputed from the assembled data.
fn assemble(
    per_source: Vec<SourceOutcome>,
    records_by_source: Vec<Vec<Record>>,
    urls: &[String],
    errors: Vec<String>,
) -> ExecutionResult {
    let records: Vec<Record> = records_by_source.into_iter().flatten().collect();
    let filtered_count = per_source.iter().map(|o| o.filtered_count).sum();
    let duplicate_count = per_source.iter().map(|o| o.duplicate_count).sum();

    let confidence = if per_source.iter().any(|o| o.confidence == "high") {
        "high"
    } else if !records.is_empty() {
        "medium"
    } else {
        "low"
    };

    ExecutionResult {
        ok: !records.is_empty(),
        meta: ExecutionMeta {
            total_count: records.len(),
            filtered_count,
            duplicate_count,
            target_urls: urls.to_vec(),
            model: None,
            generation_ms: None,
            method: METHOD.to_owned(),
            confidence: confidence.to_owned(),
        },
        records,
        errors,
        per_source,
        elapsed_ms: 0,
        scraped_at: None,
    }
}

/// Saturating milliseconds since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
