//! World↔pixel projection using DICOM direction cosines.

/// In-plane geometry of one image, taken from ImagePositionPatient,
/// ImageOrientationPatient and PixelSpacing.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    /// ImagePositionPatient: world position of the first (top-left) voxel
    pub position: [f64; 3],

    /// Row direction cosine (first triplet of ImageOrientationPatient)
    pub row_dir: [f64; 3],

    /// Column direction cosine (second triplet of ImageOrientationPatient)
    pub col_dir: [f64; 3],

    /// PixelSpacing\[0\]: spacing between rows, in mm
    pub row_spacing: f64,

    /// PixelSpacing\[1\]: spacing between columns, in mm
    pub col_spacing: f64,
}

impl ImageGeometry {
    /// Unit slice normal: `normalize(cross(rowDir, colDir))`.
    ///
    /// Returns `None` when the direction cosines are degenerate (zero or
    /// non-finite cross product).
    pub fn normal(&self) -> Option<[f64; 3]> {
        let n = cross(self.row_dir, self.col_dir);
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if !len.is_finite() || len == 0.0 {
            return None;
        }
        let unit = [n[0] / len, n[1] / len, n[2] / len];
        unit.iter().all(|v| v.is_finite()).then_some(unit)
    }
}

/// A continuous pixel-space coordinate produced by [`world_to_pixel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCoordinate {
    pub row: f64,
    pub column: f64,
    /// Signed distance from the image plane along the slice normal, in mm
    pub slice_offset: f64,
}

/// Project a world point onto an image's pixel grid.
///
/// `column = dot(world − position, rowDir) / colSpacing`,
/// `row = dot(world − position, colDir) / rowSpacing`,
/// `sliceOffset = dot(world − position, normal)`.
///
/// Returns `None` for degenerate geometry (zero/non-finite spacing, a
/// degenerate normal) or a non-finite result.
pub fn world_to_pixel(geometry: &ImageGeometry, world: [f64; 3]) -> Option<PixelCoordinate> {
    if !spacing_usable(geometry) {
        return None;
    }
    let normal = geometry.normal()?;
    let rel = sub(world, geometry.position);

    let coordinate = PixelCoordinate {
        column: dot(rel, geometry.row_dir) / geometry.col_spacing,
        row: dot(rel, geometry.col_dir) / geometry.row_spacing,
        slice_offset: dot(rel, normal),
    };

    let finite = coordinate.row.is_finite()
        && coordinate.column.is_finite()
        && coordinate.slice_offset.is_finite();
    finite.then_some(coordinate)
}

/// The inverse projection:
/// `position + rowDir·colSpacing·column + colDir·rowSpacing·row`.
pub fn pixel_to_world(geometry: &ImageGeometry, row: f64, column: f64) -> Option<[f64; 3]> {
    if !spacing_usable(geometry) {
        return None;
    }
    let mut world = geometry.position;
    for i in 0..3 {
        world[i] += geometry.row_dir[i] * geometry.col_spacing * column
            + geometry.col_dir[i] * geometry.row_spacing * row;
    }
    world.iter().all(|v| v.is_finite()).then_some(world)
}

/// Signed projection of a world position onto a slice normal.
pub fn slice_offset(position: [f64; 3], normal: [f64; 3]) -> f64 {
    dot(position, normal)
}

/// Index of the slice position numerically closest to `target` along
/// `normal`. Ties resolve to the earliest slice. Returns `None` for an empty
/// list or when every projection is non-finite.
pub fn nearest_slice(positions: &[[f64; 3]], normal: [f64; 3], target: [f64; 3]) -> Option<usize> {
    let target_offset = slice_offset(target, normal);
    let mut best: Option<(usize, f64)> = None;
    for (index, position) in positions.iter().enumerate() {
        let distance = (slice_offset(*position, normal) - target_offset).abs();
        if !distance.is_finite() {
            continue;
        }
        match best {
            Some((_, current)) if current <= distance => {}
            _ => best = Some((index, distance)),
        }
    }
    best.map(|(index, _)| index)
}

fn spacing_usable(geometry: &ImageGeometry) -> bool {
    geometry.row_spacing.is_finite()
        && geometry.col_spacing.is_finite()
        && geometry.row_spacing > 0.0
        && geometry.col_spacing > 0.0
        && geometry.position.iter().all(|v| v.is_finite())
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
