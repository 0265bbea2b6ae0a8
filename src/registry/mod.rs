//! Endpoint registry: id generation, creation, and lookups over the store.
//!
//! The registry holds the only write path to the [`EndpointStore`]. Ids are
//! human-readable slugs derived from the description plus a random 4-char
//! suffix; uniqueness is enforced by the transactional insert, with the
//! suffix regenerated on conflict. Access URLs are composed here from a
//! configured base URL so the registry never references the server.

pub mod store;

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::error::AppError;
use crate::types::{EndpointInfo, EndpointRecord, ParsedResponse};
use store::{info_from_parts, EndpointStore, StoreError};

/// Suffix alphabet: lower-case letters and digits.
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random suffix length.
const SUFFIX_LEN: usize = 4;

/// Conflict-regeneration budget per create.
const MAX_ID_ATTEMPTS: u32 = 10;

/// Transient-write retry budget per insert attempt.
const MAX_WRITE_RETRIES: u32 = 3;

/// Tokens dropped when deriving a slug from a description.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "all", "current", "data", "for", "from", "get", "in", "latest", "list",
    "me", "my", "of", "on", "or", "show", "the", "to", "with",
];

/// Registry over the persistent endpoint store.
#[derive(Debug)]
pub struct EndpointRegistry {
    store: EndpointStore,
    base_url: String,
}

impl EndpointRegistry {
    /// Wrap a store, composing access URLs against `base_url`.
    pub fn new(store: EndpointStore, base_url: impl Into<String>) -> Self {
        Self {
            store,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// The full URL a registered endpoint is served at.
    pub fn access_url(&self, endpoint_id: &str) -> String {
        format!("{}/api/data/{endpoint_id}", self.base_url)
    }

    /// Register a shaped response under a fresh endpoint id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::StoreCreation`] for empty input, an unresolved id
    /// conflict after [`MAX_ID_ATTEMPTS`], or a store failure after the
    /// transient-retry budget.
    pub async fn create(
        &self,
        parsed: &ParsedResponse,
        description: &str,
    ) -> Result<EndpointInfo, AppError> {
        let non_empty_object = parsed
            .data
            .as_object()
            .map_or(false, |object| !object.is_empty());
        if !non_empty_object {
            return Err(AppError::StoreCreation(
                "parsed data must be a non-empty JSON object".to_owned(),
            ));
        }

        let stem = slugify(description);
        for attempt in 0..MAX_ID_ATTEMPTS {
            let endpoint_id = format!("{stem}-{}", random_suffix());
            let record = EndpointRecord {
                endpoint_id: endpoint_id.clone(),
                json_data: parsed.data.clone(),
                description: description.to_owned(),
                source_urls: parsed.meta.data_sources.clone(),
                records_count: i64::try_from(parsed.meta.records_parsed).unwrap_or(i64::MAX),
                fields: parsed.meta.fields_extracted.clone(),
                parsing_timestamp: Some(parsed.meta.timestamp),
                created_at: Utc::now(),
            };

            match self.insert_with_retry(&record).await {
                Ok(()) => {
                    info!(endpoint_id = %record.endpoint_id, "endpoint registered");
                    return Ok(EndpointInfo {
                        access_url: self.access_url(&record.endpoint_id),
                        endpoint_id: record.endpoint_id,
                        description: record.description,
                        created_at: record.created_at,
                        records_count: record.records_count,
                    });
                }
                Err(StoreError::IdConflict(id)) => {
                    warn!(endpoint_id = %id, attempt, "endpoint id conflict; regenerating suffix");
                }
                Err(e) => {
                    return Err(AppError::StoreCreation(e.to_string()));
                }
            }
        }

        Err(AppError::StoreCreation(format!(
            "could not find a free endpoint id for {stem:?} after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Insert with exponential backoff on transient store failures.
    ///
    /// Id conflicts are not retried here; the caller regenerates the suffix.
    async fn insert_with_retry(&self, record: &EndpointRecord) -> Result<(), StoreError> {
        let mut last: Option<StoreError> = None;
        for retry in 0..MAX_WRITE_RETRIES {
            if retry > 0 {
                let delay = std::time::Duration::from_millis(100_u64 << retry.min(6));
                tokio::time::sleep(delay).await;
            }
            match self.store.insert(record).await {
                Ok(()) => return Ok(()),
                Err(e @ StoreError::IdConflict(_)) => return Err(e),
                Err(e) => {
                    warn!(retry, error = %e, "endpoint insert failed; retrying");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| StoreError::IdConflict(record.endpoint_id.clone())))
    }

    /// Fetch a full record. `None` when absent; callers translate to 404.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub async fn get(&self, endpoint_id: &str) -> Result<Option<EndpointRecord>, StoreError> {
        self.store.get(endpoint_id).await
    }

    /// List registered endpoints, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub async fn list(&self) -> Result<Vec<EndpointInfo>, StoreError> {
        let rows = self.store.list().await?;
        Ok(rows
            .into_iter()
            .map(|(id, description, created_at, count)| {
                info_from_parts(&self.base_url, id, description, &created_at, count)
            })
            .collect())
    }

    /// Remove an endpoint. Returns `true` iff a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub async fn delete(&self, endpoint_id: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete(endpoint_id).await?;
        if removed {
            info!(endpoint_id, "endpoint deleted");
        }
        Ok(removed)
    }

    /// Number of registered endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.store.count().await
    }
}

/// Derive the slug stem from a description: lower-case, alphanumeric tokens,
/// stop words removed, first three meaningful tokens joined by `-`.
fn slugify(description: &str) -> String {
    let lowered = description.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .take(3)
        .collect();

    if tokens.is_empty() {
        "endpoint".to_owned()
    } else {
        tokens.join("-")
    }
}

/// Four random characters from `[a-z0-9]`.
fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect()
}

/// Whether a string is a well-formed endpoint id (`^[a-z0-9-]+$`).
pub fn is_valid_endpoint_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
