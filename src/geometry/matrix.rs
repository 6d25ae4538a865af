//! Rigid 4×4 matrix operations.
//!
//! Matrices are 16-element row-major arrays, the layout used by the DICOM
//! FrameOfReferenceTransformationMatrix attribute.

/// A 4×4 transform in row-major order.
pub type Matrix4 = [f64; 16];

/// The 4×4 identity transform.
pub const IDENTITY: Matrix4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Component-wise tolerance for identity detection.
pub const IDENTITY_TOLERANCE: f64 = 1e-6;

/// Tolerance for orthonormality and determinant checks.
pub const RIGID_TOLERANCE: f64 = 1e-3;

/// Rotation blocks with |det| below this are treated as singular.
pub const SINGULARITY_EPSILON: f64 = 1e-8;

/// Check whether a matrix is the identity within the given component-wise
/// tolerance.
pub fn is_identity(m: &Matrix4, tolerance: f64) -> bool {
    m.iter()
        .zip(IDENTITY.iter())
        .all(|(a, b)| (a - b).abs() <= tolerance)
}

/// Check whether the 3×3 rotation block is rigid: orthonormal with
/// determinant ≈ +1, and a well-formed affine bottom row.
pub fn is_rigid(m: &Matrix4, tolerance: f64) -> bool {
    if !m.iter().all(|v| v.is_finite()) {
        return false;
    }

    // Bottom row must be [0, 0, 0, 1]
    let bottom = [m[12], m[13], m[14], m[15] - 1.0];
    if bottom.iter().any(|v| v.abs() > tolerance) {
        return false;
    }

    // RᵗR ≈ I, component-wise
    let r = rotation(m);
    for i in 0..3 {
        for j in 0..3 {
            let mut dot = 0.0;
            for row in &r {
                dot += row[i] * row[j];
            }
            let expected = if i == j { 1.0 } else { 0.0 };
            if (dot - expected).abs() > tolerance {
                return false;
            }
        }
    }

    (det3(&r) - 1.0).abs() <= tolerance
}

/// Invert a rigid transform analytically: for rotation block `R` and
/// translation `t`, the inverse is `[Rᵗ | −Rᵗ·t]`.
///
/// The formula is applied uniformly to whatever matrix is presented;
/// correctness for non-rigid input is the caller's responsibility. Returns
/// `None` for non-finite input, a near-singular rotation block
/// (`|det| <` [`SINGULARITY_EPSILON`]), or a non-finite result.
pub fn invert_rigid(m: &Matrix4) -> Option<Matrix4> {
    if !m.iter().all(|v| v.is_finite()) {
        return None;
    }

    let r = rotation(m);
    if det3(&r).abs() < SINGULARITY_EPSILON {
        return None;
    }

    let t = [m[3], m[7], m[11]];

    let mut out = IDENTITY;
    for i in 0..3 {
        for j in 0..3 {
            // transpose
            out[i * 4 + j] = r[j][i];
        }
        // −Rᵗ·t
        out[i * 4 + 3] = -(r[0][i] * t[0] + r[1][i] * t[1] + r[2][i] * t[2]);
    }

    if out.iter().all(|v| v.is_finite()) {
        Some(out)
    } else {
        None
    }
}

/// Apply a 4×4 transform to a 3D point (implicit homogeneous w = 1).
pub fn transform_point(m: &Matrix4, p: [f64; 3]) -> [f64; 3] {
    [
        m[0] * p[0] + m[1] * p[1] + m[2] * p[2] + m[3],
        m[4] * p[0] + m[5] * p[1] + m[6] * p[2] + m[7],
        m[8] * p[0] + m[9] * p[1] + m[10] * p[2] + m[11],
    ]
}

fn rotation(m: &Matrix4) -> [[f64; 3]; 3] {
    [
        [m[0], m[1], m[2]],
        [m[4], m[5], m[6]],
        [m[8], m[9], m[10]],
    ]
}

fn det3(r: &[[f64; 3]; 3]) -> f64 {
    r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
        - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
        + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0])
}
