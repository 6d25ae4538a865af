//! Fusion manifest service.
//!
//! The orchestrator of the crate. For a primary series and a set of
//! requested secondaries it builds (or returns from cache) a manifest of
//! fused-overlay descriptors:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       FusionService                         │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                   manifest()                          │  │
//! │  │  1. Check cached manifest   3. Resolve transform      │  │
//! │  │  2. Singleflight per        4. Run external resample  │  │
//! │  │     primary series          5. Ingest + cache slices  │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │        │                  │                   │             │
//! │        ▼                  ▼                   ▼             │
//! │  ┌────────────┐   ┌───────────────────┐   ┌──────────┐     │
//! │  │OverlayCache│   │ TransformResolver │   │ RunStore │     │
//! │  └────────────┘   └───────────────────┘   └──────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Guarantees:
//!
//! - at most one concurrent build per primary series (concurrent callers
//!   attach to the in-flight build),
//! - already-ready secondaries are copied, never recomputed, and keep their
//!   manifest position,
//! - changing `interpolation` invalidates the whole manifest for that
//!   primary,
//! - one secondary's resample failure never touches its siblings.

mod manifest;
mod overlay;
mod resample;
mod service;

pub use manifest::{
    FusionInstanceDescriptor, FusionManifest, FusionSecondaryDescriptor, FusionSettings,
    Interpolation, SecondaryStatus,
};
pub use overlay::{OverlayCache, OverlayKey, DEFAULT_OVERLAY_CACHE_CAPACITY};
pub use resample::{
    ResampleConfig, ResampleInstance, ResampleResponse, Resampler, ScriptResampler,
};
pub use service::{FusionOptions, FusionService, ManifestRequest};
