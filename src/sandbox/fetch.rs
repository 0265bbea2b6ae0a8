//! Page fetching for plan interpretation.
//!
//! One [`reqwest::Client`] per executor, configured with the scraping
//! timeout, the configured User-Agent, and a bounded redirect policy. Only
//! `http`/`https` targets are fetched; anything else is refused before a
//! connection is attempted.

use std::time::Duration;

use url::Url;

use crate::config::ScrapingConfig;

/// Build the HTTP client used for all page fetches.
///
/// # Errors
///
/// Returns an error if the client cannot be constructed.
pub fn build_client(config: &ScrapingConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .user_agent(config.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build scraping HTTP client: {e}"))
}

/// Validate a target URL: parseable, and `http` or `https` only.
///
/// # Errors
///
/// Returns a message suitable for a per-source error field.
pub fn check_target(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid url {raw:?}: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported url scheme {other:?}")),
    }
}

/// Fetch one page and return its body text.
///
/// # Errors
///
/// Returns a message for transport failures and non-success statuses.
pub async fn fetch_page(client: &reqwest::Client, url: &Url) -> Result<String, String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| format!("fetch failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("fetch failed: status {}", status.as_u16()));
    }

    response
        .text()
        .await
        .map_err(|e| format!("fetch failed reading body: {e}"))
}
