//! Fusebox - a fusion service for DICOM image series.
//!
//! This binary indexes a DICOM directory, wires the fusion service together
//! and starts the HTTP server.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fusebox::{
    config::Config,
    fusion::{FusionService, ScriptResampler},
    resolver::TransformResolver,
    server::{create_router, RouterConfig},
    store::{JsonRunStore, LocalSeriesStore},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  DICOM root: {}", config.dicom_root.display());
    info!(
        "  Resampler: {} {}",
        config.resample_interpreter.display(),
        config.resample_script.display()
    );
    match &config.helper_binary {
        Some(binary) => info!("  Helper converter: {}", binary.display()),
        None => warn!("  Helper converter: not configured - raw registration matrices only"),
    }
    info!("  Interpolation: {}", config.interpolation);
    info!(
        "  Overlay cache: {}MB",
        config.overlay_cache_bytes / (1024 * 1024)
    );

    // Index the DICOM tree
    info!("");
    info!("Indexing DICOM files...");
    let store = match LocalSeriesStore::scan(&config.dicom_root) {
        Ok(store) => {
            if store.series_count() == 0 {
                warn!("  No image series found under {}", config.dicom_root.display());
            }
            if store.registration_count() == 0 {
                warn!("  No registration objects found; only shared-frame identity fusion will work");
            }
            Arc::new(store)
        }
        Err(e) => {
            error!("  Failed to index {}: {}", config.dicom_root.display(), e);
            return ExitCode::FAILURE;
        }
    };

    // Open run status persistence
    let runs = match JsonRunStore::open(&config.run_store) {
        Ok(runs) => Arc::new(runs),
        Err(e) => {
            error!(
                "Failed to open run store {}: {}",
                config.run_store.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    // Wire the service together
    let resampler = Arc::new(ScriptResampler::new(
        config.resample_interpreter.clone(),
        config.resample_script.clone(),
    ));
    let resolver = TransformResolver::new(store.clone(), config.resolver_options());
    let service = Arc::new(FusionService::new(
        store,
        runs,
        resampler,
        resolver,
        config.fusion_options(),
    ));

    // Build the router
    let mut router_config = RouterConfig::new().with_tracing(!config.no_tracing);
    if let Some(origins) = &config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }
    let router = create_router(service, router_config);

    // Bind and serve
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Fusebox listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!(
        "    curl 'http://{}/fusion/<primary>/manifest?secondaries=<secondary>'",
        addr
    );
    info!("    curl http://{}/runs", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "fusebox=debug,tower_http=debug"
    } else {
        "fusebox=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
