//! Candidate matrices extracted from a registration object.

use std::path::PathBuf;

use crate::geometry::{is_identity, Matrix4, IDENTITY_TOLERANCE};

/// One 4×4 matrix discovered somewhere in a registration object, with
/// whatever identifying context surrounded it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationCandidate {
    /// Row-major 4×4 transform as stored in the file, unmodified
    pub matrix: Matrix4,

    /// Frame of Reference UID of the space this matrix maps *from*
    /// (the moving/secondary space), when recorded
    pub source_frame_of_reference: Option<String>,

    /// Frame of Reference UID of the space this matrix maps *to*
    /// (the registered/primary space), when recorded
    pub target_frame_of_reference: Option<String>,

    /// Series Instance UIDs referenced in the same registration item
    pub referenced_series: Vec<String>,

    /// FrameOfReferenceTransformationMatrixType when present (e.g. "RIGID")
    pub matrix_type: Option<String>,

    /// Whether the matrix passed rigid validation (or is an identity);
    /// `false` means the candidate was flagged, not rejected
    pub rigid: bool,

    /// File the candidate came from
    pub file: PathBuf,
}

impl RegistrationCandidate {
    /// Whether the matrix is an exact identity within component tolerance.
    pub fn is_identity(&self) -> bool {
        is_identity(&self.matrix, IDENTITY_TOLERANCE)
    }
}

/// Everything extracted from one Spatial Registration object.
#[derive(Debug, Clone, Default)]
pub struct ParsedRegistration {
    /// SOP Instance UID of the registration object itself
    pub sop_instance_uid: Option<String>,

    /// Top-level Frame of Reference UID (the registered/target space)
    pub frame_of_reference: Option<String>,

    /// Candidate matrices in discovery order, deduplicated
    pub candidates: Vec<RegistrationCandidate>,

    /// Every Frame of Reference UID encountered anywhere in the object,
    /// deduplicated, in discovery order
    pub frame_of_reference_uids: Vec<String>,

    /// Every Series Instance UID encountered anywhere in the object,
    /// deduplicated, in discovery order
    pub series_uids: Vec<String>,

    /// Data-quality observations (non-rigid matrices etc.)
    pub notes: Vec<String>,

    /// Source file
    pub file: PathBuf,
}

impl ParsedRegistration {
    /// Whether the object yielded any usable content at all.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
            && self.frame_of_reference_uids.is_empty()
            && self.series_uids.is_empty()
    }
}

/// Deduplication key for a matrix: every component rounded to six decimals.
///
/// Negative zero normalizes to zero so `-0.0000001` and `0.0000001` collide.
pub fn matrix_dedup_key(matrix: &Matrix4) -> String {
    let mut key = String::with_capacity(16 * 10);
    for component in matrix {
        let rounded = (component * 1e6).round() / 1e6;
        let rounded = if rounded == 0.0 { 0.0 } else { rounded };
        key.push_str(&format!("{rounded:.6},"));
    }
    key
}

/// Matrix selection policy: scan candidates in reverse discovery order, skip
/// exact identities, and return the first genuinely transformative matrix
/// unmodified. Returns `None` when only identities (or nothing) were found.
pub fn select_matrix(parsed: &ParsedRegistration) -> Option<&RegistrationCandidate> {
    parsed
        .candidates
        .iter()
        .rev()
        .find(|candidate| !candidate.is_identity())
}
