//! SQLite persistence for endpoint records.
//!
//! Single table, schema applied on open. JSON-valued columns are stored as
//! serialized text and must round-trip exactly. No write is acknowledged
//! until its transaction commits.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, trace};

use crate::types::{EndpointInfo, EndpointRecord};

/// Endpoint table schema.
const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS endpoints (
    endpoint_id       TEXT PRIMARY KEY,
    json_data         TEXT NOT NULL,
    description       TEXT,
    source_urls       TEXT,
    records_count     INTEGER,
    fields            TEXT,
    parsing_timestamp TEXT,
    created_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_endpoints_created_at ON endpoints (created_at);
";

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A primary-key conflict on insert.
    #[error("endpoint id already exists: {0}")]
    IdConflict(String),

    /// A persisted column failed to deserialize.
    #[error("corrupt {column} for endpoint {endpoint_id}: {cause}")]
    Corrupt {
        /// Column that failed.
        column: &'static str,
        /// Row identifier.
        endpoint_id: String,
        /// Underlying cause.
        cause: String,
    },
}

/// Row tuple fetched for full records.
type RecordRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
);

/// The sole owner of the endpoints database handle.
pub struct EndpointStore {
    db: SqlitePool,
}

impl EndpointStore {
    /// Open (creating if missing) the database at `path` and apply the schema.
    ///
    /// Opening an existing file restores all previously created endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the file cannot be opened or the
    /// schema cannot be applied.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&db).await?;
        info!(path = %path.display(), "endpoint store opened");
        Ok(Self { db })
    }

    /// Open an in-memory store (tests and ephemeral runs).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on pool or schema failure.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // A single connection: each new in-memory connection is a new database.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&db).await?;
        Ok(Self { db })
    }

    /// Insert a record transactionally.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IdConflict`] when `endpoint_id` is taken, or
    /// [`StoreError::Database`] for any other failure. The row is visible to
    /// readers only after commit.
    pub async fn insert(&self, record: &EndpointRecord) -> Result<(), StoreError> {
        let json_data = record.json_data.to_string();
        let source_urls =
            serde_json::to_string(&record.source_urls).unwrap_or_else(|_| "[]".to_owned());
        let fields = serde_json::to_string(&record.fields).unwrap_or_else(|_| "[]".to_owned());

        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "INSERT INTO endpoints (endpoint_id, json_data, description, source_urls, \
             records_count, fields, parsing_timestamp, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&record.endpoint_id)
        .bind(&json_data)
        .bind(&record.description)
        .bind(&source_urls)
        .bind(record.records_count)
        .bind(&fields)
        .bind(record.parsing_timestamp.map(|t| t.to_rfc3339()))
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                tx.commit().await?;
                trace!(endpoint_id = %record.endpoint_id, "endpoint inserted");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::IdConflict(record.endpoint_id.clone()))
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Fetch a full record by id. Returns `None` when the row is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure or
    /// [`StoreError::Corrupt`] when a JSON column fails to round-trip.
    pub async fn get(&self, endpoint_id: &str) -> Result<Option<EndpointRecord>, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT endpoint_id, json_data, description, source_urls, records_count, \
             fields, parsing_timestamp, created_at \
             FROM endpoints WHERE endpoint_id = ?1",
        )
        .bind(endpoint_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(record_from_row).transpose()
    }

    /// List endpoint summaries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn list(&self) -> Result<Vec<(String, String, String, i64)>, StoreError> {
        let rows: Vec<(String, Option<String>, String, Option<i64>)> = sqlx::query_as(
            "SELECT endpoint_id, description, created_at, records_count \
             FROM endpoints ORDER BY created_at DESC, endpoint_id",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, description, created_at, count)| {
                (
                    id,
                    description.unwrap_or_default(),
                    created_at,
                    count.unwrap_or(0),
                )
            })
            .collect())
    }

    /// Delete a row. Returns `true` iff a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn delete(&self, endpoint_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM endpoints WHERE endpoint_id = ?1")
            .bind(endpoint_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count stored endpoints (health reporting).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM endpoints")
            .fetch_one(&self.db)
            .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }
}

impl std::fmt::Debug for EndpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointStore").finish_non_exhaustive()
    }
}

/// Deserialize a fetched row, enforcing the JSON round-trip property.
fn record_from_row(row: RecordRow) -> Result<EndpointRecord, StoreError> {
    let (endpoint_id, json_data, description, source_urls, records_count, fields, parsing, created) =
        row;

    let json_data = serde_json::from_str(&json_data).map_err(|e| StoreError::Corrupt {
        column: "json_data",
        endpoint_id: endpoint_id.clone(),
        cause: e.to_string(),
    })?;

    let source_urls: Vec<String> = match source_urls {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            column: "source_urls",
            endpoint_id: endpoint_id.clone(),
            cause: e.to_string(),
        })?,
        None => vec![],
    };

    let fields: Vec<String> = match fields {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            column: "fields",
            endpoint_id: endpoint_id.clone(),
            cause: e.to_string(),
        })?,
        None => vec![],
    };

    let parsing_timestamp = parsing.as_deref().and_then(parse_timestamp);
    let created_at = parse_timestamp(&created).ok_or_else(|| StoreError::Corrupt {
        column: "created_at",
        endpoint_id: endpoint_id.clone(),
        cause: "not an RFC 3339 timestamp".to_owned(),
    })?;

    Ok(EndpointRecord {
        endpoint_id,
        json_data,
        description: description.unwrap_or_default(),
        source_urls,
        records_count: records_count.unwrap_or(0),
        fields,
        parsing_timestamp,
        created_at,
    })
}

/// Parse an RFC 3339 timestamp into UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Whether a sqlx error is a SQLite unique/primary-key violation.
fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Build an [`EndpointInfo`] from list-row parts and a base URL.
pub fn info_from_parts(
    base_url: &str,
    endpoint_id: String,
    description: String,
    created_at: &str,
    records_count: i64,
) -> EndpointInfo {
    EndpointInfo {
        access_url: format!("{base_url}/api/data/{endpoint_id}"),
        endpoint_id,
        description,
        created_at: parse_timestamp(created_at).unwrap_or_else(Utc::now),
        records_count,
    }
}
