//! Scraper-plan sandbox: static validation and timed interpretation of
//! untrusted, LLM-emitted scraper plans.
//!
//! The "program" surface is a declarative JSON plan (CSS selectors + field
//! extraction rules + optional pagination) interpreted natively. The sandbox
//! never evaluates code, touches the filesystem, or spawns processes; the
//! enforced policy is the capability allow-list, the forbidden-token scan,
//! per-source failure isolation, and a wall-clock timeout.
//!
//! Entry points: [`executor::SandboxExecutor::execute_text`] for raw plan
//! text and [`executor::SandboxExecutor::execute_plan`] for a validated
//! [`GeneratedPlan`](crate::types::GeneratedPlan).

pub mod executor;
pub mod extract;
pub mod fetch;
pub mod plan;
pub mod validate;

pub use executor::SandboxExecutor;
pub use validate::validate_plan;
