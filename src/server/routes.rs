//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get};
use axum::Router;
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::fusion::{FusionService, Resampler};
use crate::store::{RunStore, SeriesStore};

use super::handlers::{
    clear_handler, health_handler, manifest_handler, runs_handler, slice_handler, AppState,
};

/// Configuration for the HTTP router.
#[derive(Clone, Default)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

/// Create the application router over a fusion service.
pub fn create_router<S, R, X>(
    service: Arc<FusionService<S, R, X>>,
    config: RouterConfig,
) -> Router
where
    S: SeriesStore + 'static,
    R: RunStore + 'static,
    X: Resampler + 'static,
{
    let state = AppState::new(service);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/fusion/{primary}/manifest",
            get(manifest_handler::<S, R, X>),
        )
        .route(
            "/fusion/{primary}/{secondary}/slices/{sop}",
            get(slice_handler::<S, R, X>),
        )
        .route("/fusion/{primary}", delete(clear_handler::<S, R, X>))
        .route("/runs", get(runs_handler::<S, R, X>))
        .with_state(state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}
