//! Crate-wide error taxonomy and the HTTP status mapping.
//!
//! Every failure the pipeline can surface is one tagged variant carrying a
//! human-readable message. The server's kind-to-status translation is a pure
//! table-driven function so handlers never branch on error internals.

use thiserror::Error;

/// Errors surfaced by the generate-and-publish pipeline and the server.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing API key or malformed numeric environment value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The LLM provider rejected the bearer token.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Provider rate limit still exceeded after the retry budget.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Network or provider 5xx failure after the retry budget.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Request-side validation: malformed template, empty description.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The generated plan failed static validation twice.
    #[error("plan validation failed: {0}")]
    PlanValidation(String),

    /// The sandbox exceeded its wall-clock limit.
    #[error("execution timed out: {0}")]
    ExecutionTimeout(String),

    /// The plan failed at runtime; cause captured from the interpreter.
    #[error("execution failed: {0}")]
    ExecutionRuntime(String),

    /// The sandbox produced no records; shaping refuses to run.
    #[error("no data to shape: {0}")]
    EmptyData(String),

    /// Shaping output did not parse as JSON after one retry.
    #[error("shaping output unparseable: {0}")]
    Parsing(String),

    /// Shaped JSON lacks a requested field or deviates from the template.
    #[error("shaped output invalid: {0}")]
    ShapeValidation(String),

    /// Endpoint insert conflict unresolved, or underlying store failure.
    #[error("endpoint creation failed: {0}")]
    StoreCreation(String),

    /// Requested endpoint id is not present.
    #[error("endpoint not found: {0}")]
    EndpointMissing(String),
}

impl AppError {
    /// Stable kind label used in logs and front-end error displays.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::RateLimit(_) => "rate-limit",
            Self::TransientNetwork(_) => "transient-network",
            Self::Validation(_) => "validation",
            Self::PlanValidation(_) => "plan-validation",
            Self::ExecutionTimeout(_) => "execution-timeout",
            Self::ExecutionRuntime(_) => "execution-runtime",
            Self::EmptyData(_) => "empty-data",
            Self::Parsing(_) => "parsing",
            Self::ShapeValidation(_) => "shape-validation",
            Self::StoreCreation(_) => "store-creation",
            Self::EndpointMissing(_) => "endpoint-missing",
        }
    }

    /// One-line remediation hint shown next to the error by the front-end.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "set the missing environment variable and restart",
            Self::Authentication(_) => "check that DEEPSEEK_API_KEY is valid",
            Self::RateLimit(_) => "wait a moment and retry",
            Self::TransientNetwork(_) => "check connectivity and retry",
            Self::Validation(_) => "fix the request fields and retry",
            Self::PlanValidation(_) | Self::Parsing(_) | Self::ShapeValidation(_) => {
                "simplify the requirements and retry"
            }
            Self::ExecutionTimeout(_) => "reduce the number of target pages or raise the timeout",
            Self::ExecutionRuntime(_) | Self::EmptyData(_) => {
                "verify the target pages contain the requested data"
            }
            Self::StoreCreation(_) => "retry; if it persists check the database file",
            Self::EndpointMissing(_) => "list endpoints to find a valid id",
        }
    }
}

/// Map an error kind to the HTTP status served at the boundary.
///
/// Pure function: hit-or-miss store outcomes map to 404, request-side
/// validation to 400, everything internal to 500.
pub fn http_status(error: &AppError) -> u16 {
    match error {
        AppError::EndpointMissing(_) => 404,
        AppError::Validation(_) => 400,
        AppError::Configuration(_)
        | AppError::Authentication(_)
        | AppError::RateLimit(_)
        | AppError::TransientNetwork(_)
        | AppError::PlanValidation(_)
        | AppError::ExecutionTimeout(_)
        | AppError::ExecutionRuntime(_)
        | AppError::EmptyData(_)
        | AppError::Parsing(_)
        | AppError::ShapeValidation(_)
        | AppError::StoreCreation(_) => 500,
    }
}
