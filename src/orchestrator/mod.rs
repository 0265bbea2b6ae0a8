//! Orchestration: plan generation, data shaping, and the synchronous
//! generate-and-publish pipeline the front-end drives.

pub mod generation;
pub mod jsonx;
pub mod shaping;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::error::AppError;
use crate::registry::EndpointRegistry;
use crate::sandbox::SandboxExecutor;
use crate::types::{EndpointInfo, ExecutionResult, GeneratedPlan, ParsedResponse, ScrapeRequest};

pub use generation::PlanGenerator;
pub use shaping::DataShaper;

/// Everything a successful pipeline run produced, stage by stage.
#[derive(Debug)]
pub struct PublishOutcome {
    /// The validated scraper plan.
    pub plan: GeneratedPlan,
    /// The sandbox execution result.
    pub execution: ExecutionResult,
    /// The shaped response.
    pub parsed: ParsedResponse,
    /// The registered endpoint.
    pub endpoint: EndpointInfo,
}

/// Drives generation → sandbox → shaping → registry in order.
pub struct Pipeline {
    generator: PlanGenerator,
    executor: SandboxExecutor,
    shaper: DataShaper,
    registry: Arc<EndpointRegistry>,
    execution_timeout: Duration,
}

impl Pipeline {
    /// Assemble the pipeline from its collaborators.
    pub fn new(
        generator: PlanGenerator,
        executor: SandboxExecutor,
        shaper: DataShaper,
        registry: Arc<EndpointRegistry>,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            executor,
            shaper,
            registry,
            execution_timeout,
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// # Errors
    ///
    /// Fails with the typed error of whichever stage broke first; a stage
    /// failure leaves no endpoint registered.
    #[instrument(skip_all, fields(description = %request.description))]
    pub async fn generate_and_publish(
        &self,
        request: ScrapeRequest,
    ) -> Result<PublishOutcome, AppError> {
        let plan = self.generator.generate(&request).await?;
        info!(
            urls = plan.target_urls.len(),
            generation_ms = plan.generation_ms,
            "plan stage complete"
        );

        let execution = self
            .executor
            .execute_plan(&plan, self.execution_timeout)
            .await;
        info!(
            ok = execution.ok,
            records = execution.records.len(),
            elapsed_ms = execution.elapsed_ms,
            "execution stage complete"
        );
        if !execution.ok {
            if let Some(error) = classify_failed_execution(&execution) {
                return Err(error);
            }
        }

        let parsed = self.shaper.shape(&execution, &request).await?;
        info!(
            records_parsed = parsed.meta.records_parsed,
            parsing_ms = parsed.meta.parsing_ms,
            "shaping stage complete"
        );

        let endpoint = self.registry.create(&parsed, &request.description).await?;
        info!(endpoint_id = %endpoint.endpoint_id, "endpoint published");

        Ok(PublishOutcome {
            plan,
            execution,
            parsed,
            endpoint,
        })
    }
}

/// Map a failed execution to its typed error.
///
/// Timeouts win over runtime causes; an execution with zero records but no
/// recorded error falls through to the shaper's empty-data refusal.
fn classify_failed_execution(execution: &ExecutionResult) -> Option<AppError> {
    if let Some(timeout) = execution
        .errors
        .iter()
        .find(|e| e.starts_with("execution-timeout"))
    {
        return Some(AppError::ExecutionTimeout(timeout.clone()));
    }
    if execution
        .errors
        .iter()
        .any(|e| e.starts_with("security:") || e.starts_with("syntax:"))
    {
        return Some(AppError::PlanValidation(execution.errors.join("; ")));
    }
    // Sources that ran but matched nothing are an empty-data case, which the
    // shaper reports; anything else is a runtime failure.
    let hard: Vec<&str> = execution
        .errors
        .iter()
        .filter(|e| {
            !e.ends_with("no records matched record_selector")
                && !e.ends_with("all matched records were duplicates")
        })
        .map(String::as_str)
        .collect();
    if !hard.is_empty() {
        return Some(AppError::ExecutionRuntime(hard.join("; ")));
    }
    None
}
