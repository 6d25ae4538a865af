//! Filesystem-backed series store.
//!
//! Indexes a directory tree of DICOM files at startup: image instances are
//! grouped into series records, registration objects (REG modality or the
//! Spatial Registration SOP class family) are grouped per patient. Series
//! identifiers are the Series Instance UIDs themselves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dicom::object::{open_file, FileDicomObject, InMemDicomObject};
use dicom_dictionary_std::tags;
use tracing::{debug, info};

use crate::error::StoreError;

use super::series::{ImageRecord, SeriesRecord, SeriesStore};

/// SOP class prefix shared by the registration storage classes
/// (spatial, spatial fiducials, deformable).
const REGISTRATION_SOP_CLASS_PREFIX: &str = "1.2.840.10008.5.1.4.1.1.66";

pub struct LocalSeriesStore {
    series: HashMap<String, SeriesRecord>,
    images: HashMap<String, Vec<ImageRecord>>,
    registrations: HashMap<String, Vec<PathBuf>>,
}

impl LocalSeriesStore {
    /// Scan a directory tree for `.dcm` files and build the index.
    ///
    /// Unreadable files are skipped with a debug log; only a missing root is
    /// an error.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let mut paths = Vec::new();
        collect_dicom_paths(root, &mut paths)?;
        paths.sort();

        let mut store = Self {
            series: HashMap::new(),
            images: HashMap::new(),
            registrations: HashMap::new(),
        };

        for path in paths {
            let object = match open_file(&path) {
                Ok(object) => object,
                Err(err) => {
                    debug!("skipping unreadable DICOM file {}: {}", path.display(), err);
                    continue;
                }
            };
            store.index_object(&object, &path);
        }

        // Representative geometry comes from the first image, sorted by
        // instance number.
        for images in store.images.values_mut() {
            images.sort_by_key(|image| image.instance_number.unwrap_or(i32::MAX));
        }

        info!(
            "indexed {} series ({} instances), {} patient(s) with registrations under {}",
            store.series.len(),
            store.images.values().map(Vec::len).sum::<usize>(),
            store.registrations.len(),
            root.display()
        );
        Ok(store)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.values().map(Vec::len).sum()
    }

    fn index_object(&mut self, object: &FileDicomObject<InMemDicomObject>, path: &Path) {
        let sop_class = string_value(object, tags::SOP_CLASS_UID);
        let modality = string_value(object, tags::MODALITY);

        let is_registration = modality.as_deref() == Some("REG")
            || sop_class
                .as_deref()
                .is_some_and(|uid| uid.starts_with(REGISTRATION_SOP_CLASS_PREFIX));
        if is_registration {
            let patient = string_value(object, tags::PATIENT_ID).unwrap_or_default();
            self.registrations
                .entry(patient)
                .or_default()
                .push(path.to_path_buf());
            return;
        }

        let Some(series_uid) = string_value(object, tags::SERIES_INSTANCE_UID) else {
            return;
        };
        let Some(sop_instance_uid) = string_value(object, tags::SOP_INSTANCE_UID) else {
            return;
        };

        self.series
            .entry(series_uid.clone())
            .or_insert_with(|| SeriesRecord {
                id: series_uid.clone(),
                series_instance_uid: series_uid.clone(),
                study_instance_uid: string_value(object, tags::STUDY_INSTANCE_UID),
                patient_id: string_value(object, tags::PATIENT_ID),
                frame_of_reference_uid: string_value(object, tags::FRAME_OF_REFERENCE_UID),
                modality: modality.clone(),
                description: string_value(object, tags::SERIES_DESCRIPTION),
            });

        self.images
            .entry(series_uid)
            .or_default()
            .push(ImageRecord {
                sop_instance_uid,
                path: path.to_path_buf(),
                instance_number: int_value(object, tags::INSTANCE_NUMBER),
                position: floats_value::<3>(object, tags::IMAGE_POSITION_PATIENT),
                orientation: floats_value::<6>(object, tags::IMAGE_ORIENTATION_PATIENT),
                pixel_spacing: floats_value::<2>(object, tags::PIXEL_SPACING),
                rows: int_value(object, tags::ROWS).map(|v| v as u32),
                columns: int_value(object, tags::COLUMNS).map(|v| v as u32),
            });
    }
}

#[async_trait]
impl SeriesStore for LocalSeriesStore {
    async fn series(&self, series_id: &str) -> Result<Option<SeriesRecord>, StoreError> {
        Ok(self.series.get(series_id).cloned())
    }

    async fn images(&self, series_id: &str) -> Result<Vec<ImageRecord>, StoreError> {
        Ok(self.images.get(series_id).cloned().unwrap_or_default())
    }

    async fn registrations_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self
            .registrations
            .get(patient_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn collect_dicom_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dicom_paths(&path, out)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn string_value(object: &FileDicomObject<InMemDicomObject>, tag: dicom::core::Tag) -> Option<String> {
    let text = object.element(tag).ok()?.to_str().ok()?;
    let trimmed = text.trim_end_matches(|c| c == '\0' || c == ' ');
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn int_value(object: &FileDicomObject<InMemDicomObject>, tag: dicom::core::Tag) -> Option<i32> {
    object.element(tag).ok()?.to_int::<i32>().ok()
}

fn floats_value<const N: usize>(
    object: &FileDicomObject<InMemDicomObject>,
    tag: dicom::core::Tag,
) -> Option<[f64; N]> {
    let values = object.element(tag).ok()?.to_multi_float64().ok()?;
    if values.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    out.copy_from_slice(&values);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_root_is_an_error() {
        assert!(LocalSeriesStore::scan("/definitely/not/here").is_err());
    }

    #[test]
    fn unreadable_dcm_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("junk.dcm"), b"not a dicom file").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"irrelevant").unwrap();

        let store = LocalSeriesStore::scan(dir.path()).unwrap();
        assert_eq!(store.series_count(), 0);
        assert_eq!(store.registration_count(), 0);
    }

    #[tokio::test]
    async fn unknown_lookups_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSeriesStore::scan(dir.path()).unwrap();

        assert!(store.series("nope").await.unwrap().is_none());
        assert!(store.images("nope").await.unwrap().is_empty());
        assert!(store
            .registrations_for_patient("nope")
            .await
            .unwrap()
            .is_empty());
    }
}
