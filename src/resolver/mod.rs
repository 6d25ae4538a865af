//! Transform resolution between a primary and a secondary series.
//!
//! Given a `(primary, secondary)` pair, the resolver enumerates every
//! registration object stored for the *patient* (registrations frequently
//! live in a separate study from either series), disambiguates each
//! candidate's direction through the strategy chain, prefers genuinely
//! transformative candidates over coincidental identities, and hands the top
//! candidate to the external converter when one is configured. Helper
//! failure never aborts resolution while a usable matrix exists; the
//! identity fallback applies only when both series share a Frame of
//! Reference.

mod direction;
mod helper;

pub use direction::{
    default_chain, orient_candidate, AssumeStoredDirection, Direction, DirectionStrategy,
    FrameOfReferenceMatch, PairContext, SeriesIdentity, SeriesUidMatch,
};
pub use helper::{HelperConverter, HelperOutcome};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::geometry::{invert_rigid, is_rigid, Matrix4, IDENTITY};
use crate::registration::{self, RegistrationCandidate};
use crate::store::SeriesStore;

/// Registration identity reported when resolution fell back to the identity
/// transform within one shared Frame of Reference.
pub const IDENTITY_REGISTRATION_ID: &str = "identity-frame-of-reference";

/// Looser orthonormality tolerance for re-validating candidates the parser
/// flagged non-rigid.
const REVALIDATION_TOLERANCE: f64 = 1e-2;

/// Default wall-clock bound on one helper conversion.
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Resolution result
// =============================================================================

/// Provenance of the transform representation in a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformSource {
    /// Candidate matrix used directly (as stored or analytically inverted)
    Matrix,
    /// Helper conversion was attempted and failed; raw matrix used instead
    MatrixFallback,
    /// Parser flagged the candidate non-rigid but it re-validated within a
    /// looser tolerance
    MatrixValidated,
    /// Transform file freshly produced by the helper converter
    HelperGenerated,
    /// Transform file reused from the on-disk cache
    HelperCache,
    /// Transform file regenerated over an unusable cache entry
    HelperRegenerated,
}

impl fmt::Display for TransformSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Matrix => "matrix",
            Self::MatrixFallback => "matrix-fallback",
            Self::MatrixValidated => "matrix-validated",
            Self::HelperGenerated => "helper-generated",
            Self::HelperCache => "helper-cache",
            Self::HelperRegenerated => "helper-regenerated",
        };
        f.write_str(text)
    }
}

/// A resolved secondary→primary transform.
///
/// Carries a matrix, a transform file, or both; `transform_source` names the
/// authoritative representation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResolution {
    pub matrix: Option<Matrix4>,
    pub transform_file: Option<PathBuf>,
    pub transform_source: TransformSource,
    /// SOP Instance UID of the registration object used, or
    /// [`IDENTITY_REGISTRATION_ID`]
    pub registration_id: Option<String>,
    /// Whether the stored matrix was analytically inverted
    pub was_inverted: bool,
}

impl TransformResolution {
    /// The identity fallback within one shared Frame of Reference.
    pub fn identity() -> Self {
        Self {
            matrix: Some(IDENTITY),
            transform_file: None,
            transform_source: TransformSource::Matrix,
            registration_id: Some(IDENTITY_REGISTRATION_ID.to_owned()),
            was_inverted: false,
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Construction options for [`TransformResolver`].
pub struct ResolverOptions {
    /// Path of the registration-to-transform-file converter; `None` disables
    /// helper conversion entirely
    pub helper_binary: Option<PathBuf>,

    /// Wall-clock bound on one helper invocation; `None` waits indefinitely
    pub helper_timeout: Option<Duration>,

    /// Directory for the on-disk transform file cache
    pub transform_cache_dir: PathBuf,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            helper_binary: None,
            helper_timeout: Some(DEFAULT_HELPER_TIMEOUT),
            transform_cache_dir: PathBuf::from(".fusebox/transforms"),
        }
    }
}

pub struct TransformResolver<S> {
    store: Arc<S>,
    helper: Option<HelperConverter>,
    chain: Vec<Box<dyn DirectionStrategy>>,
}

/// One candidate with its direction determined.
struct Oriented {
    candidate: RegistrationCandidate,
    direction: Direction,
    strategy: &'static str,
    registration_id: Option<String>,
}

struct SeriesInfo {
    identity: SeriesIdentity,
    patient_id: Option<String>,
}

impl<S: SeriesStore> TransformResolver<S> {
    pub fn new(store: Arc<S>, options: ResolverOptions) -> Self {
        let helper = options.helper_binary.map(|binary| {
            HelperConverter::new(
                binary,
                options.transform_cache_dir.clone(),
                options.helper_timeout,
            )
        });
        Self {
            store,
            helper,
            chain: default_chain(),
        }
    }

    /// Resolve the secondary→primary transform for a series pair.
    ///
    /// `registration_id` pins resolution to one registration object's SOP
    /// Instance UID; otherwise every registration of the patient is
    /// considered.
    pub async fn resolve(
        &self,
        primary_id: &str,
        secondary_id: &str,
        registration_id: Option<&str>,
    ) -> Result<TransformResolution, ResolveError> {
        let primary = self.series_info(primary_id).await?;
        let secondary = self.series_info(secondary_id).await?;
        let pair = PairContext {
            primary: primary.identity,
            secondary: secondary.identity,
        };

        let patient = primary.patient_id.or(secondary.patient_id);
        let registration_paths = match &patient {
            Some(patient) => self.store.registrations_for_patient(patient).await?,
            None => Vec::new(),
        };

        let mut oriented = Vec::new();
        for path in &registration_paths {
            let Some(parsed) = registration::parse(path) else {
                continue;
            };
            if let Some(requested) = registration_id {
                if parsed.sop_instance_uid.as_deref() != Some(requested) {
                    continue;
                }
            }
            for candidate in &parsed.candidates {
                if let Some((direction, strategy)) = orient_candidate(&self.chain, candidate, &pair)
                {
                    debug!(
                        "registration candidate from {} oriented {:?} via {}",
                        path.display(),
                        direction,
                        strategy
                    );
                    oriented.push(Oriented {
                        candidate: candidate.clone(),
                        direction,
                        strategy,
                        registration_id: parsed.sop_instance_uid.clone(),
                    });
                }
            }
        }

        // A genuine transform beats a coincidentally-present identity
        // candidate for the same pair. Among multiple genuine transforms the
        // last-discovered one wins; that pick is unverified against ground
        // truth, so it is logged rather than silently trusted.
        let transformative = oriented
            .iter()
            .filter(|o| !o.candidate.is_identity())
            .count();
        if transformative > 1 {
            warn!(
                "{} non-identity registration candidates apply to {}→{}; using the last-discovered one",
                transformative, secondary_id, primary_id
            );
        }
        let top = oriented
            .iter()
            .rfind(|o| !o.candidate.is_identity())
            .or_else(|| oriented.last());

        if let Some(top) = top {
            debug!(
                "resolving {}→{} with candidate from {} ({})",
                secondary_id,
                primary_id,
                top.candidate.file.display(),
                top.strategy
            );
            if let Some(resolution) = self.resolve_candidate(top, &pair).await? {
                return Ok(resolution);
            }
        }

        // Identity must never be assumed across differing frames.
        if pair.shared_frame() {
            debug!(
                "no usable registration for {}→{}; falling back to identity within shared Frame of Reference",
                secondary_id, primary_id
            );
            return Ok(TransformResolution::identity());
        }

        Err(ResolveError::NoTransformAvailable {
            primary: primary_id.to_owned(),
            secondary: secondary_id.to_owned(),
            primary_frame_of_reference: pair.primary.frame_of_reference.clone(),
            secondary_frame_of_reference: pair.secondary.frame_of_reference.clone(),
        })
    }

    /// Turn the top candidate into a resolution.
    ///
    /// `Ok(None)` means the candidate is unusable (so the caller may still
    /// try the identity fallback); `Err` is reserved for the case with no
    /// safe fallback at all.
    async fn resolve_candidate(
        &self,
        top: &Oriented,
        pair: &PairContext,
    ) -> Result<Option<TransformResolution>, ResolveError> {
        let candidate = &top.candidate;
        let (matrix, was_inverted) = match top.direction {
            Direction::AsIs => (Some(candidate.matrix), false),
            Direction::Inverted => (invert_rigid(&candidate.matrix), true),
        };

        if let Some(helper) = &self.helper {
            let frames = (
                pair.primary.frame_of_reference.as_deref(),
                pair.secondary.frame_of_reference.as_deref(),
            );
            match frames {
                (Some(primary_frame), Some(secondary_frame)) => {
                    let converted = helper
                        .convert(
                            &candidate.file,
                            &pair.primary.id,
                            &pair.secondary.id,
                            primary_frame,
                            secondary_frame,
                        )
                        .await;
                    match converted {
                        Ok(outcome) => {
                            return Ok(Some(TransformResolution {
                                matrix,
                                transform_file: Some(outcome.transform_file),
                                transform_source: outcome.source,
                                registration_id: top.registration_id.clone(),
                                was_inverted,
                            }));
                        }
                        Err(err) => match matrix {
                            Some(matrix) => {
                                warn!(
                                    "helper conversion failed for {}→{}, falling back to raw matrix: {}",
                                    pair.secondary.id, pair.primary.id, err
                                );
                                return Ok(Some(TransformResolution {
                                    matrix: Some(matrix),
                                    transform_file: None,
                                    transform_source: TransformSource::MatrixFallback,
                                    registration_id: top.registration_id.clone(),
                                    was_inverted,
                                }));
                            }
                            None => {
                                warn!(
                                    "helper conversion failed and candidate matrix is not invertible: {}",
                                    err
                                );
                                return Ok(None);
                            }
                        },
                    }
                }
                _ => {
                    if matrix.is_none() {
                        // The matrix cannot be analytically inverted, so a
                        // helper-produced transform file is the only usable
                        // representation; without FoR UIDs there is no safe
                        // fallback.
                        return Err(ResolveError::MissingFrameOfReference {
                            primary: pair.primary.id.clone(),
                            secondary: pair.secondary.id.clone(),
                        });
                    }
                    debug!(
                        "helper conversion skipped for {}→{}: Frame of Reference UIDs unavailable",
                        pair.secondary.id, pair.primary.id
                    );
                }
            }
        }

        let Some(matrix) = matrix else {
            warn!(
                "candidate matrix from {} is not invertible and no helper is configured",
                candidate.file.display()
            );
            return Ok(None);
        };

        let transform_source = if candidate.rigid {
            TransformSource::Matrix
        } else if is_rigid(&matrix, REVALIDATION_TOLERANCE) {
            TransformSource::MatrixValidated
        } else {
            warn!(
                "using non-rigid candidate matrix from {} unmodified",
                candidate.file.display()
            );
            TransformSource::Matrix
        };

        Ok(Some(TransformResolution {
            matrix: Some(matrix),
            transform_file: None,
            transform_source,
            registration_id: top.registration_id.clone(),
            was_inverted,
        }))
    }

    async fn series_info(&self, series_id: &str) -> Result<SeriesInfo, ResolveError> {
        let record = self
            .store
            .series(series_id)
            .await?
            .ok_or_else(|| ResolveError::SeriesNotFound(series_id.to_owned()))?;
        Ok(SeriesInfo {
            identity: SeriesIdentity {
                id: record.id,
                frame_of_reference: record.frame_of_reference_uid,
                series_instance_uid: Some(record.series_instance_uid),
            },
            patient_id: record.patient_id,
        })
    }
}
