//! Embedded HTTP server for registered endpoints.
//!
//! One fixed route set; every "new" endpoint is just a new row in the store
//! served through `GET /api/data/{endpoint_id}`, so creation is observable
//! to the next request without a restart. Binds to loopback, falling back
//! across up to ten successive ports on conflict. Store misses become 404,
//! malformed queries 400, internal failures 500 with no detail leaked.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::registry::EndpointRegistry;

/// Ports tried after the preferred one on bind conflict.
const PORT_FALLBACK_RANGE: u16 = 10;

/// Service name reported by the health route.
const SERVICE_NAME: &str = "api-endpoint-server";

/// Shared handler state: a read view of the registry (delete excepted).
#[derive(Clone)]
struct AppState {
    registry: Arc<EndpointRegistry>,
}

/// Build the router over a registry handle.
pub fn router(registry: Arc<EndpointRegistry>) -> Router {
    let state = AppState { registry };
    Router::new()
        .route("/health", get(health))
        .route("/api/data/{endpoint_id}", get(serve_data))
        .route("/api/endpoints", get(list_endpoints))
        .route("/api/endpoints/{endpoint_id}", delete(delete_endpoint))
        .with_state(state)
}

/// Bind `host` on `preferred_port`, falling back across the next
/// [`PORT_FALLBACK_RANGE`] ports on conflict.
///
/// # Errors
///
/// Returns an error when every candidate port refuses to bind.
pub async fn bind_with_fallback(host: &str, preferred_port: u16) -> anyhow::Result<TcpListener> {
    for offset in 0..=PORT_FALLBACK_RANGE {
        let port = preferred_port.saturating_add(offset);
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                if offset > 0 {
                    info!(preferred_port, port, "preferred port taken; using fallback");
                }
                return Ok(listener);
            }
            Err(e) => {
                tracing::debug!(port, error = %e, "bind failed");
            }
        }
    }
    anyhow::bail!(
        "could not bind {host} on any port in {preferred_port}..={}",
        preferred_port.saturating_add(PORT_FALLBACK_RANGE)
    )
}

/// Serve the router on an already-bound listener until the process exits.
///
/// # Errors
///
/// Returns an error if the accept loop fails.
pub async fn serve(listener: TcpListener, registry: Arc<EndpointRegistry>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("api server listening on http://{local_addr}");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let endpoints = state.registry.count().await.unwrap_or(0);
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "endpoints": endpoints,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct DataQuery {
    #[serde(default)]
    metadata: Option<String>,
}

/// Parse the `metadata` flag. `Err` means the value was malformed.
fn parse_metadata_flag(raw: Option<&str>) -> Result<bool, ()> {
    match raw {
        None => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(_) => Err(()),
    }
}

async fn serve_data(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
    Query(query): Query<DataQuery>,
) -> impl IntoResponse {
    let with_metadata = match parse_metadata_flag(query.metadata.as_deref()) {
        Ok(flag) => flag,
        Err(()) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "metadata must be true or false"})),
            );
        }
    };

    match state.registry.get(&endpoint_id).await {
        Ok(Some(record)) => {
            if with_metadata {
                (
                    StatusCode::OK,
                    Json(json!({
                        "data": record.json_data,
                        "metadata": {
                            "description": record.description,
                            "source_urls": record.source_urls,
                            "records_count": record.records_count,
                            "fields": record.fields,
                            "parsing_timestamp": record.parsing_timestamp,
                        },
                        "endpoint_id": record.endpoint_id,
                        "created_at": record.created_at,
                    })),
                )
            } else {
                (StatusCode::OK, Json(record.json_data))
            }
        }
        Ok(None) => endpoint_not_found(&endpoint_id),
        Err(e) => internal_error("endpoint lookup failed", &e),
    }
}

async fn list_endpoints(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.list().await {
        Ok(endpoints) => (StatusCode::OK, Json(json!({"endpoints": endpoints}))),
        Err(e) => internal_error("endpoint listing failed", &e),
    }
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.delete(&endpoint_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "message": "Endpoint deleted successfully",
                "endpoint_id": endpoint_id,
            })),
        ),
        Ok(false) => endpoint_not_found(&endpoint_id),
        Err(e) => internal_error("endpoint delete failed", &e),
    }
}

fn endpoint_not_found(endpoint_id: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found",
            "endpoint_id": endpoint_id,
        })),
    )
}

/// Log the cause, serve a detail-free 500.
fn internal_error(
    context: &str,
    cause: &dyn std::fmt::Display,
) -> (StatusCode, Json<serde_json::Value>) {
    error!(%cause, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
}
