//! Read-only series store seam.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::geometry::ImageGeometry;

/// One image series as known to the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRecord {
    /// Store identifier for the series (the Series Instance UID for the
    /// filesystem-backed store)
    pub id: String,

    /// Series Instance UID
    pub series_instance_uid: String,

    /// Study the series belongs to
    pub study_instance_uid: Option<String>,

    /// Patient the series belongs to
    pub patient_id: Option<String>,

    /// Frame of Reference UID, taken from the series' first image
    pub frame_of_reference_uid: Option<String>,

    /// Modality (CT, MR, PT, ...)
    pub modality: Option<String>,

    /// Series description
    pub description: Option<String>,
}

/// One instance (slice) of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// SOP Instance UID
    pub sop_instance_uid: String,

    /// Local path of the DICOM file
    pub path: PathBuf,

    /// InstanceNumber, when present
    pub instance_number: Option<i32>,

    /// ImagePositionPatient
    pub position: Option<[f64; 3]>,

    /// ImageOrientationPatient (row triplet then column triplet)
    pub orientation: Option<[f64; 6]>,

    /// PixelSpacing (row spacing, column spacing)
    pub pixel_spacing: Option<[f64; 2]>,

    pub rows: Option<u32>,
    pub columns: Option<u32>,
}

impl ImageRecord {
    /// In-plane geometry for projection math, when the image carries
    /// position, orientation and spacing.
    pub fn geometry(&self) -> Option<ImageGeometry> {
        let position = self.position?;
        let orientation = self.orientation?;
        let spacing = self.pixel_spacing?;
        Some(ImageGeometry {
            position,
            row_dir: [orientation[0], orientation[1], orientation[2]],
            col_dir: [orientation[3], orientation[4], orientation[5]],
            row_spacing: spacing[0],
            col_spacing: spacing[1],
        })
    }
}

/// Read-only lookups against the backing store.
///
/// Registration objects are enumerated per *patient*, not per study: a
/// registration frequently lives in a separate study from either series it
/// relates.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Look up a series by its identifier.
    async fn series(&self, series_id: &str) -> Result<Option<SeriesRecord>, StoreError>;

    /// Images of a series, sorted by instance number.
    async fn images(&self, series_id: &str) -> Result<Vec<ImageRecord>, StoreError>;

    /// Paths of every registration object stored for a patient.
    async fn registrations_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<PathBuf>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_requires_all_components() {
        let mut image = ImageRecord {
            sop_instance_uid: "sop.1".into(),
            path: PathBuf::from("a.dcm"),
            instance_number: Some(1),
            position: Some([0.0, 0.0, 0.0]),
            orientation: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            pixel_spacing: Some([0.5, 0.5]),
            rows: Some(512),
            columns: Some(512),
        };
        assert!(image.geometry().is_some());

        image.orientation = None;
        assert!(image.geometry().is_none());
    }
}
