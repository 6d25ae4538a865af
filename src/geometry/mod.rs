//! Coordinate math for DICOM patient space.
//!
//! Pure functions, no state. Two concerns live here:
//!
//! - Rigid 4×4 matrix handling: identity/rigidity checks, analytic inversion
//!   of rigid transforms, point application.
//! - World↔pixel projection using DICOM direction cosines, plus the
//!   nearest-slice-by-Z lookup used to pair resampled overlay slices with
//!   primary slices.
//!
//! Degenerate inputs (missing orientation or spacing, non-finite values, a
//! near-singular rotation block) fail by returning `None`, never by
//! panicking, so callers can apply a naive fallback.

mod matrix;
mod projection;

pub use matrix::{
    invert_rigid, is_identity, is_rigid, transform_point, Matrix4, IDENTITY, IDENTITY_TOLERANCE,
    RIGID_TOLERANCE, SINGULARITY_EPSILON,
};
pub use projection::{
    nearest_slice, pixel_to_world, slice_offset, world_to_pixel, ImageGeometry, PixelCoordinate,
};
