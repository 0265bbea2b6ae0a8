//! Configuration loading and management.
//!
//! Loads straylight configuration from `./straylight.toml` (or
//! `$STRAYLIGHT_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default chat-completions base URL.
const DEFAULT_LLM_BASE_URL: &str = "https://api.deepseek.com";

/// Default model identifier.
const DEFAULT_LLM_MODEL: &str = "deepseek-chat";

/// Default browser-like User-Agent baked into page fetches.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

// ── Top-level config ────────────────────────────────────────────

/// Top-level straylight configuration loaded from TOML.
///
/// Path: `./straylight.toml` or `$STRAYLIGHT_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider settings (`[llm]`).
    pub llm: LlmConfig,
    /// Page-fetch settings used by the sandbox (`[scraping]`).
    pub scraping: ScrapingConfig,
    /// Embedded HTTP server settings (`[server]`).
    pub server: ServerConfig,
    /// Persistent store settings (`[store]`).
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$STRAYLIGHT_CONFIG_PATH` or `./straylight.toml`.
    /// If the file does not exist, returns defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: Config =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config file found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("STRAYLIGHT_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("straylight.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in
    /// tests). Invalid numeric values for optional knobs log a warning and
    /// keep the previous value.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // LLM.
        if let Some(v) = env("DEEPSEEK_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = env("DEEPSEEK_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = env("DEEPSEEK_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env("DEEPSEEK_TEMPERATURE") {
            parse_override("DEEPSEEK_TEMPERATURE", &v, &mut self.llm.temperature);
        }
        if let Some(v) = env("DEEPSEEK_MAX_TOKENS") {
            parse_override("DEEPSEEK_MAX_TOKENS", &v, &mut self.llm.max_tokens_shaping);
        }
        if let Some(v) = env("DEEPSEEK_TIMEOUT_SECONDS") {
            parse_override("DEEPSEEK_TIMEOUT_SECONDS", &v, &mut self.llm.timeout_seconds);
        }

        // Scraping.
        if let Some(v) = env("SCRAPING_REQUEST_TIMEOUT") {
            parse_override(
                "SCRAPING_REQUEST_TIMEOUT",
                &v,
                &mut self.scraping.request_timeout_seconds,
            );
        }
        if let Some(v) = env("SCRAPING_USER_AGENT") {
            self.scraping.user_agent = v;
        }

        // Server.
        if let Some(v) = env("STRAYLIGHT_PORT") {
            parse_override("STRAYLIGHT_PORT", &v, &mut self.server.port);
        }

        // Store.
        if let Some(v) = env("STRAYLIGHT_DB_PATH") {
            self.store.db_path = v;
        }
    }

    /// Parse a TOML string into config (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

/// Parse an env override into `target`, warning and keeping the old value on failure.
fn parse_override<T: std::str::FromStr>(var: &str, raw: &str, target: &mut T) {
    match raw.parse() {
        Ok(n) => *target = n,
        Err(_) => tracing::warn!(var, value = %raw, "ignoring invalid env override"),
    }
}

// ── LLM config ──────────────────────────────────────────────────

/// LLM provider settings (`[llm]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Bearer token for the provider. Required before any chat call.
    pub api_key: Option<String>,
    /// Chat-completions base URL.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Sampling temperature for both orchestrators.
    pub temperature: f32,
    /// Token budget for the shaping orchestrator.
    pub max_tokens_shaping: u32,
    /// Token budget for the plan-generation orchestrator.
    pub max_tokens_generation: u32,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_LLM_BASE_URL.to_owned(),
            model: DEFAULT_LLM_MODEL.to_owned(),
            temperature: 0.3,
            max_tokens_shaping: 8000,
            max_tokens_generation: 4000,
            timeout_seconds: 60,
        }
    }
}

impl LlmConfig {
    /// Return the bearer key, failing fast if it is not configured.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming `DEEPSEEK_API_KEY` when absent.
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => anyhow::bail!("DEEPSEEK_API_KEY is not set; refusing to start the LLM client"),
        }
    }
}

// ── Scraping config ─────────────────────────────────────────────

/// Page-fetch settings used by the sandbox (`[scraping]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Per-page HTTP timeout in seconds.
    pub request_timeout_seconds: u64,
    /// User-Agent header sent with page fetches.
    pub user_agent: String,
    /// Wall-clock budget for one full plan execution, in seconds.
    pub execution_timeout_seconds: u64,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            execution_timeout_seconds: 120,
        }
    }
}

// ── Server config ───────────────────────────────────────────────

/// Embedded HTTP server settings (`[server]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Loopback host to bind.
    pub host: String,
    /// Preferred port. On bind conflict the next 10 ports are tried.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

// ── Store config ────────────────────────────────────────────────

/// Persistent store settings (`[store]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "straylight.db".to_owned(),
        }
    }
}
