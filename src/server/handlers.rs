//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FusionError;
use crate::fusion::{FusionService, Interpolation, ManifestRequest, Resampler};
use crate::store::{FuseboxRun, RunStore, SeriesStore};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
pub struct AppState<S, R, X> {
    pub service: Arc<FusionService<S, R, X>>,
}

impl<S, R, X> AppState<S, R, X> {
    pub fn new(service: Arc<FusionService<S, R, X>>) -> Self {
        Self { service }
    }
}

impl<S, R, X> Clone for AppState<S, R, X> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// Query parameters for manifest fetches.
#[derive(Debug, Deserialize)]
pub struct ManifestQueryParams {
    /// Comma-separated secondary series identifiers
    #[serde(default)]
    pub secondaries: Option<String>,

    /// Rebuild requested secondaries even when cached
    #[serde(default)]
    pub force: bool,

    /// Manifest-wide interpolation override ("linear" | "nearest")
    #[serde(default)]
    pub interpolation: Option<String>,
}

impl ManifestQueryParams {
    fn secondary_ids(&self) -> Vec<String> {
        self.secondaries
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g. "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Run diagnostics listing.
#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub runs: Vec<FuseboxRun>,
}

// =============================================================================
// Error Mapping
// =============================================================================

impl IntoResponse for FusionError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            FusionError::PrimaryNotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Primary series not found: {id}"),
            ),
            FusionError::Store(message) => {
                warn!("store error during manifest fetch: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    message.clone(),
                )
            }
        };
        (status, Json(ErrorResponse::new(error_type, message))).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
}

/// `GET /fusion/{primary}/manifest?secondaries=a,b&force=true&interpolation=linear`
pub async fn manifest_handler<S, R, X>(
    State(state): State<AppState<S, R, X>>,
    Path(primary): Path<String>,
    Query(params): Query<ManifestQueryParams>,
) -> Response
where
    S: SeriesStore + 'static,
    R: RunStore + 'static,
    X: Resampler + 'static,
{
    let interpolation = match params.interpolation.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<Interpolation>() {
            Ok(interpolation) => Some(interpolation),
            Err(message) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new("invalid_request", message)),
                )
                    .into_response();
            }
        },
    };

    let request = ManifestRequest {
        primary_series_id: primary,
        secondary_series_ids: params.secondary_ids(),
        force: params.force,
        interpolation,
    };

    match state.service.manifest(request).await {
        Ok(manifest) => Json(manifest).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /fusion/{primary}/{secondary}/slices/{sop}`
///
/// Serves the raw ingested slice bytes. Slices exist only after the
/// secondary's descriptor reports `ready`.
pub async fn slice_handler<S, R, X>(
    State(state): State<AppState<S, R, X>>,
    Path((primary, secondary, sop)): Path<(String, String, String)>,
) -> Response
where
    S: SeriesStore + 'static,
    R: RunStore + 'static,
    X: Resampler + 'static,
{
    match state.service.overlay_slice(&primary, &secondary, &sop).await {
        Some(data) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/dicom")],
            data,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                format!("no overlay slice {sop} for {secondary} on {primary}"),
            )),
        )
            .into_response(),
    }
}

/// `DELETE /fusion/{primary}` — drop cached manifest and overlay buffers.
pub async fn clear_handler<S, R, X>(
    State(state): State<AppState<S, R, X>>,
    Path(primary): Path<String>,
) -> StatusCode
where
    S: SeriesStore + 'static,
    R: RunStore + 'static,
    X: Resampler + 'static,
{
    state.service.clear(&primary).await;
    StatusCode::NO_CONTENT
}

/// `GET /runs` — persisted run rows for diagnostics.
pub async fn runs_handler<S, R, X>(State(state): State<AppState<S, R, X>>) -> Response
where
    S: SeriesStore + 'static,
    R: RunStore + 'static,
    X: Resampler + 'static,
{
    match state.service.runs().list().await {
        Ok(runs) => Json(RunsResponse { runs }).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("store_error", err.to_string())),
        )
            .into_response(),
    }
}
