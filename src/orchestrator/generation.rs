//! Plan-generation orchestrator.
//!
//! Builds the generation prompt from a [`ScrapeRequest`], asks the chat
//! provider for a scraper plan, strips fences, and runs the sandbox's static
//! validator. A plan that fails validation is regenerated once with the same
//! prompt; a second failure surfaces the validation errors to the caller.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::AppError;
use crate::provider::{ChatApi, ChatMessage};
use crate::sandbox::plan::ScraperPlan;
use crate::sandbox::validate::validate_plan;
use crate::types::{GeneratedPlan, ScrapeRequest};

use super::jsonx::strip_fences;

/// Generation attempts per request (initial + one validator retry).
const MAX_GENERATION_ATTEMPTS: u32 = 2;

/// Fixed system prompt documenting the plan contract.
const PLAN_SYSTEM_PROMPT: &str = "\
You write scraper plans: declarative JSON documents executed by a sandboxed \
HTML scraper. Respond with a single JSON object and nothing else.

The document must have exactly one top-level key, \"scrape_data\", an object with:
- \"record_selector\": CSS selector matching one element per record (required)
- \"fields\": object mapping each output field name to a rule (required, non-empty):
    {\"selector\": CSS selector scoped to the record (optional),
     \"kind\": \"text\" | \"attr\" | \"html\" (default \"text\"),
     \"attr\": attribute name, required when kind is \"attr\",
     \"pattern\": regex whose capture group 1 refines the value (optional)}
- \"source_urls\": array of page URLs, only when the user named no URLs
- \"record_limit\": max records per page (optional)
- \"dedupe_on\": field names identifying duplicate records (optional)
- \"follow_next\": {\"selector\", \"attr\", \"max_pages\"} pagination rule (optional)

Rules:
- Only the extraction kinds text, attr, and html exist. There is no scripting,
  no file access, no process execution, and no dynamic evaluation; any mention
  of such operations rejects the plan.
- Target URLs must use http or https.
- Prefer selectors resilient to minor markup changes (class names over
  positional child indexes).";

/// Orchestrates plan generation against the chat provider.
pub struct PlanGenerator {
    chat: Arc<dyn ChatApi>,
    max_tokens: u32,
    fetch_timeout_seconds: u64,
    user_agent: String,
}

impl PlanGenerator {
    /// Create a generator.
    ///
    /// `fetch_timeout_seconds` and `user_agent` are quoted in the prompt so
    /// the model knows the fetch conditions its plan will run under.
    pub fn new(
        chat: Arc<dyn ChatApi>,
        max_tokens: u32,
        fetch_timeout_seconds: u64,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            max_tokens,
            fetch_timeout_seconds,
            user_agent: user_agent.into(),
        }
    }

    /// Generate a validated scraper plan for `request`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Validation`] for a malformed request.
    /// - [`AppError::PlanValidation`] when the second attempt still fails
    ///   static validation or proposes no sources.
    /// - Provider errors propagated from the chat client.
    pub async fn generate(&self, request: &ScrapeRequest) -> Result<GeneratedPlan, AppError> {
        request.validate().map_err(AppError::Validation)?;

        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(user_prompt(request)),
        ];

        let started = Instant::now();
        let mut tokens_used: u32 = 0;
        let mut last_errors: Vec<String> = Vec::new();

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let completion = self
                .chat
                .complete(messages.clone(), self.max_tokens)
                .await?;
            tokens_used = tokens_used.saturating_add(completion.tokens_used);

            let source = strip_fences(&completion.content);
            let validation = validate_plan(&source);

            if validation.is_executable() {
                let target_urls = resolve_targets(request, &source);
                if target_urls.is_empty() {
                    last_errors = vec!["plan proposed no source urls".to_owned()];
                    warn!(attempt, "generated plan named no sources");
                    continue;
                }

                info!(
                    attempt,
                    tokens_used,
                    url_count = target_urls.len(),
                    "scraper plan generated"
                );
                let model = if completion.model.is_empty() {
                    self.chat.model_id().to_owned()
                } else {
                    completion.model
                };
                return Ok(GeneratedPlan {
                    source,
                    validation,
                    target_urls,
                    required_fields: request.desired_fields.clone(),
                    model,
                    tokens_used,
                    generation_ms: elapsed_ms(started),
                });
            }

            warn!(
                attempt,
                errors = ?validation.errors,
                "generated plan failed validation"
            );
            last_errors = validation.errors;
        }

        Err(AppError::PlanValidation(last_errors.join("; ")))
    }

    fn system_prompt(&self) -> String {
        format!(
            "{PLAN_SYSTEM_PROMPT}\n\nPages are fetched with a {}s timeout and the \
             User-Agent {:?}; plans cannot change either.",
            self.fetch_timeout_seconds, self.user_agent
        )
    }
}

/// Build the user message from the request.
fn user_prompt(request: &ScrapeRequest) -> String {
    let mut prompt = format!("Data request: {}\n", request.description.trim());

    if request.target_urls.is_empty() {
        prompt.push_str(
            "No target URLs were given. Propose suitable public pages in \
             scrape_data.source_urls.\n",
        );
    } else {
        prompt.push_str("Target URLs, in order:\n");
        for url in &request.target_urls {
            prompt.push_str("- ");
            prompt.push_str(url);
            prompt.push('\n');
        }
    }

    if !request.desired_fields.is_empty() {
        prompt.push_str(&format!(
            "Each record must expose these fields: {}\n",
            request.desired_fields.join(", ")
        ));
    }

    if let Some(template) = &request.response_template {
        let rendered = serde_json::to_string_pretty(template).unwrap_or_default();
        prompt.push_str(&format!(
            "The shaped response will follow this JSON template:\n{rendered}\n"
        ));
    }

    prompt
}

/// The URLs the plan will run against: the request's, or the plan's proposed
/// `source_urls` when the request named none.
fn resolve_targets(request: &ScrapeRequest, source: &str) -> Vec<String> {
    if !request.target_urls.is_empty() {
        return request.target_urls.clone();
    }
    serde_json::from_str::<ScraperPlan>(source)
        .map(|plan| plan.scrape_data.source_urls)
        .unwrap_or_default()
}

/// Saturating milliseconds since `started`.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
