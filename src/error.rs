use std::path::PathBuf;

use thiserror::Error;

/// Errors from the store collaborators (series lookups, run persistence).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error while reading or writing store data
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted run data could not be serialized or deserialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error reported by a backing store implementation
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors from transform resolution between a primary/secondary series pair.
///
/// Failures that have a safe fallback (helper process problems, non-rigid
/// candidates with a usable matrix) are absorbed inside the resolver and do
/// not surface here; these variants are the genuinely unrecoverable cases.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A referenced series does not exist in the store
    #[error("series not found: {0}")]
    SeriesNotFound(String),

    /// Every registration candidate and the identity fallback were exhausted
    #[error(
        "no transform available between series {primary} and {secondary} \
         (primary FoR: {primary_frame_of_reference:?}, secondary FoR: {secondary_frame_of_reference:?})"
    )]
    NoTransformAvailable {
        primary: String,
        secondary: String,
        primary_frame_of_reference: Option<String>,
        secondary_frame_of_reference: Option<String>,
    },

    /// Helper conversion is the only usable path but the Frame of Reference
    /// UIDs it needs are absent
    #[error("missing Frame of Reference UID for helper conversion (primary {primary}, secondary {secondary})")]
    MissingFrameOfReference { primary: String, secondary: String },

    /// Error from the series store
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the external registration-to-transform-file converter.
///
/// These never abort resolution when a raw matrix is available; the resolver
/// downgrades to `matrix-fallback` instead.
#[derive(Debug, Error)]
pub enum HelperError {
    /// No helper binary is configured
    #[error("helper binary is not configured")]
    NotConfigured,

    /// The helper process could not be spawned
    #[error("failed to launch helper process: {0}")]
    Launch(std::io::Error),

    /// The helper exited non-zero
    #[error("helper process failed (status {status:?}): {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    /// The helper exceeded the configured timeout
    #[error("helper process timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    /// The helper exited zero but produced no output file
    #[error("helper produced no output file at {0}")]
    MissingOutput(PathBuf),
}

/// Errors from the external volume resampler.
///
/// Surfaced per-secondary as an `error` descriptor; a resample failure never
/// fails the whole manifest.
#[derive(Debug, Error)]
pub enum ResampleError {
    /// The resampler process could not be spawned
    #[error("failed to launch resampler: {0}")]
    Launch(std::io::Error),

    /// The resampler exited non-zero
    #[error("resampler process failed (status {status:?}): {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    /// The resampler ran but reported an error payload
    #[error("resampler error: {0}")]
    Script(String),

    /// The resampler's stdout could not be parsed as a response
    #[error("invalid resampler response: {0}")]
    InvalidResponse(String),

    /// Filesystem error while preparing input or ingesting output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the fusion manifest service.
///
/// Only whole-request failures appear here; per-secondary problems are
/// reported through descriptor status instead. Cloneable so concurrent
/// requests attached to one in-flight build can all observe the outcome.
#[derive(Debug, Clone, Error)]
pub enum FusionError {
    /// The requested primary series does not exist
    #[error("primary series not found: {0}")]
    PrimaryNotFound(String),

    /// Error from a store collaborator
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for FusionError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}
