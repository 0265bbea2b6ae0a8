#![allow(missing_docs)]

//! Straylight CLI — publish natural-language data requests as live JSON
//! endpoints and serve them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use straylight::config::Config;
use straylight::error::AppError;
use straylight::orchestrator::{DataShaper, Pipeline, PlanGenerator};
use straylight::provider::ChatClient;
use straylight::registry::store::EndpointStore;
use straylight::registry::EndpointRegistry;
use straylight::sandbox::SandboxExecutor;
use straylight::{logging, server};

#[derive(Debug, Parser)]
#[command(name = "straylight", about = "Describe the data you want; get a live JSON API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the API server in the foreground.
    Serve {
        /// Directory for rotated JSON logs.
        #[arg(long, default_value = "logs")]
        logs_dir: PathBuf,
    },
    /// Generate, execute, shape, and register one endpoint.
    Create {
        /// What data you want, in plain language.
        #[arg(long)]
        description: String,
        /// Fields each record must expose (comma- or newline-separated).
        #[arg(long, default_value = "")]
        fields: String,
        /// JSON object template the response must follow.
        #[arg(long)]
        template: Option<String>,
        /// Target page URL; repeat for multiple sources.
        #[arg(long = "url")]
        urls: Vec<String>,
        /// Informational refresh cadence, e.g. "hourly".
        #[arg(long, default_value = "on-demand")]
        update_frequency: String,
    },
    /// List registered endpoints, newest first.
    List,
    /// Delete a registered endpoint.
    Delete {
        /// The endpoint id to remove.
        endpoint_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { logs_dir } => {
            let _guard = logging::init_production(&logs_dir)?;
            run_serve().await
        }
        Command::Create {
            description,
            fields,
            template,
            urls,
            update_frequency,
        } => {
            logging::init_cli();
            run_create(description, fields, template, urls, update_frequency).await
        }
        Command::List => {
            logging::init_cli();
            run_list().await
        }
        Command::Delete { endpoint_id } => {
            logging::init_cli();
            run_delete(&endpoint_id).await
        }
    }
}

/// Open the store and wrap it in a registry composing `base_url` URLs.
async fn open_registry(config: &Config, base_url: String) -> Result<Arc<EndpointRegistry>> {
    let store = EndpointStore::open(Path::new(&config.store.db_path))
        .await
        .context("failed to open endpoint store")?;
    Ok(Arc::new(EndpointRegistry::new(store, base_url)))
}

async fn run_serve() -> Result<()> {
    let config = Config::load()?;

    let listener = server::bind_with_fallback(&config.server.host, config.server.port).await?;
    let local_addr = listener.local_addr()?;
    let base_url = format!("http://{local_addr}");

    let registry = open_registry(&config, base_url).await?;
    info!(
        endpoints = registry.count().await.unwrap_or(0),
        "restored endpoint registry"
    );

    server::serve(listener, registry).await
}

async fn run_create(
    description: String,
    fields: String,
    template: Option<String>,
    urls: Vec<String>,
    update_frequency: String,
) -> Result<()> {
    let config = Config::load()?;

    let response_template = match template.as_deref() {
        Some(raw) => Some(
            serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("--template is not valid JSON: {e}"))?,
        ),
        None => None,
    };

    let request = straylight::types::ScrapeRequest {
        description,
        desired_fields: parse_fields(&fields),
        response_template,
        target_urls: urls,
        update_frequency,
    };

    let chat: Arc<dyn straylight::provider::ChatApi> = Arc::new(ChatClient::new(&config.llm)?);
    let generator = PlanGenerator::new(
        Arc::clone(&chat),
        config.llm.max_tokens_generation,
        config.scraping.request_timeout_seconds,
        config.scraping.user_agent.clone(),
    );
    let executor = SandboxExecutor::new(&config.scraping)?;
    let shaper = DataShaper::new(Arc::clone(&chat), config.llm.max_tokens_shaping);

    let base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let registry = open_registry(&config, base_url).await?;

    let pipeline = Pipeline::new(
        generator,
        executor,
        shaper,
        registry,
        Duration::from_secs(config.scraping.execution_timeout_seconds),
    );

    match pipeline.generate_and_publish(request).await {
        Ok(outcome) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "endpoint_id": outcome.endpoint.endpoint_id,
                    "access_url": outcome.endpoint.access_url,
                    "records": outcome.parsed.meta.records_parsed,
                    "sources": outcome.execution.meta.target_urls,
                }))?
            );
            Ok(())
        }
        Err(error) => Err(render_app_error(&error)),
    }
}

async fn run_list() -> Result<()> {
    let config = Config::load()?;
    let base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let registry = open_registry(&config, base_url).await?;

    let endpoints = registry.list().await?;
    println!("{}", serde_json::to_string_pretty(&endpoints)?);
    Ok(())
}

async fn run_delete(endpoint_id: &str) -> Result<()> {
    let config = Config::load()?;
    let base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let registry = open_registry(&config, base_url).await?;

    if registry.delete(endpoint_id).await? {
        println!("deleted {endpoint_id}");
        Ok(())
    } else {
        anyhow::bail!("endpoint not found: {endpoint_id}")
    }
}

/// Split the `--fields` argument on newlines and commas.
fn parse_fields(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Render a typed pipeline error as label, description, and remediation hint.
fn render_app_error(error: &AppError) -> anyhow::Error {
    anyhow::anyhow!("[{}] {error}\nhint: {}", error.kind(), error.hint())
}
