//! Tracing setup for the server and the one-shot subcommands.
//!
//! The scraping stack pulls in chatty dependencies (`html5ever`,
//! `selectors`, `sqlx` statement logging, `hyper` connection churn), so the
//! default filter quiets those to `warn` while keeping straylight itself at
//! `info`. `RUST_LOG` overrides the whole filter.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVES: &str =
    "info,html5ever=warn,selectors=warn,sqlx=warn,hyper=warn,reqwest=warn";

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes buffered entries, so `serve` holds it for the
/// whole process lifetime.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Initialise logging for the long-running `serve` subcommand.
///
/// Requests and pipeline stages go to two places: human-readable lines on
/// stderr, and one JSON object per event in `{logs_dir}/straylight.jsonl.*`
/// with daily rotation (each served request logs at least once, so a flat
/// file would grow without bound).
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .map_err(|e| anyhow::anyhow!("cannot create logs dir {}: {e}", logs_dir.display()))?;

    let (writer, worker) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        logs_dir,
        "straylight.jsonl",
    ));

    tracing_subscriber::registry()
        .with(default_filter())
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _worker: worker })
}

/// Initialise logging for `create`, `list`, and `delete`.
///
/// Stderr only — a one-shot run prints its result to stdout, and rotating
/// log files for a command that exits in seconds would just be litter.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// `RUST_LOG` if set, otherwise [`DEFAULT_DIRECTIVES`].
fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}
