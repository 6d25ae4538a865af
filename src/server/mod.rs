//! HTTP surface for the viewer.
//!
//! A thin axum layer over the fusion service:
//!
//! ```text
//! /health                                              - Health check
//! /fusion/{primary}/manifest?secondaries=a,b           - Build/fetch manifest
//! /fusion/{primary}/{secondary}/slices/{sop}           - Overlay slice bytes
//! /fusion/{primary}                                    - DELETE: clear caches
//! /runs                                                - Run diagnostics
//! ```

mod handlers;
mod routes;

pub use handlers::{
    clear_handler, health_handler, manifest_handler, runs_handler, slice_handler, AppState,
    ErrorResponse, HealthResponse, ManifestQueryParams, RunsResponse,
};
pub use routes::{create_router, RouterConfig};
