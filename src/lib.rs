//! # Fusebox
//!
//! A fusion service for DICOM image series: given a primary reference
//! volume and one or more secondary overlay volumes (CT+MRI, CT+PET, ...),
//! it discovers the spatial transform between the series' coordinate
//! frames, drives an external resampler, and caches the resampled overlays
//! so repeated viewer requests are cheap.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`geometry`] - Rigid-matrix inversion and world↔pixel projection
//! - [`registration`] - DICOM Spatial Registration deep-scan parsing
//! - [`resolver`] - Transform direction disambiguation, validation and
//!   helper-converter handoff
//! - [`fusion`] - Manifest orchestration, overlay caching and the external
//!   resampler seam
//! - [`store`] - Series store seam, run status persistence, filesystem
//!   DICOM index
//! - [`server`] - Axum-based HTTP surface for the viewer
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fusebox::{
//!     FusionOptions, FusionService, JsonRunStore, LocalSeriesStore, ManifestRequest,
//!     ResolverOptions, ScriptResampler, TransformResolver,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(LocalSeriesStore::scan("/data/dicom").unwrap());
//!     let runs = Arc::new(JsonRunStore::open("/data/runs.json").unwrap());
//!     let resampler = Arc::new(ScriptResampler::new("python3", "/opt/fusebox/resample.py"));
//!     let resolver = TransformResolver::new(store.clone(), ResolverOptions::default());
//!
//!     let service = FusionService::new(
//!         store,
//!         runs,
//!         resampler,
//!         resolver,
//!         FusionOptions::default(),
//!     );
//!
//!     let manifest = service
//!         .manifest(ManifestRequest::new("primary-series", vec!["secondary-series".into()]))
//!         .await
//!         .unwrap();
//!     println!("{} secondaries", manifest.secondaries.len());
//! }
//! ```

pub mod config;
pub mod error;
pub mod fusion;
pub mod geometry;
pub mod registration;
pub mod resolver;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{FusionError, HelperError, ResampleError, ResolveError, StoreError};
pub use fusion::{
    FusionInstanceDescriptor, FusionManifest, FusionOptions, FusionSecondaryDescriptor,
    FusionService, FusionSettings, Interpolation, ManifestRequest, OverlayCache, OverlayKey,
    ResampleConfig, ResampleInstance, ResampleResponse, Resampler, ScriptResampler,
    SecondaryStatus,
};
pub use geometry::{
    invert_rigid, is_identity, is_rigid, nearest_slice, pixel_to_world, transform_point,
    world_to_pixel, ImageGeometry, Matrix4, PixelCoordinate, IDENTITY,
};
pub use registration::{
    parse as parse_registration, select_matrix, ParsedRegistration, RegistrationCandidate,
};
pub use resolver::{
    ResolverOptions, TransformResolution, TransformResolver, TransformSource,
    IDENTITY_REGISTRATION_ID,
};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use store::{
    FuseboxRun, ImageRecord, JsonRunStore, LocalSeriesStore, RunDiagnostics, RunKey, RunStatus,
    RunStore, SeriesRecord, SeriesStore,
};
