//! Shared test fixtures: mock store collaborators and a scripted resampler.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use fusebox::error::{ResampleError, StoreError};
use fusebox::fusion::{
    FusionOptions, FusionService, ResampleConfig, ResampleInstance, ResampleResponse, Resampler,
};
use fusebox::resolver::{ResolverOptions, TransformResolver};
use fusebox::store::{FuseboxRun, ImageRecord, RunKey, RunStore, SeriesRecord, SeriesStore};

// =============================================================================
// Series store
// =============================================================================

#[derive(Default)]
pub struct MockSeriesStore {
    pub series: HashMap<String, SeriesRecord>,
    pub images: HashMap<String, Vec<ImageRecord>>,
    pub registrations: Vec<PathBuf>,
}

impl MockSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, record: SeriesRecord, images: Vec<ImageRecord>) -> Self {
        self.images.insert(record.id.clone(), images);
        self.series.insert(record.id.clone(), record);
        self
    }
}

#[async_trait]
impl SeriesStore for MockSeriesStore {
    async fn series(&self, series_id: &str) -> Result<Option<SeriesRecord>, StoreError> {
        Ok(self.series.get(series_id).cloned())
    }

    async fn images(&self, series_id: &str) -> Result<Vec<ImageRecord>, StoreError> {
        Ok(self.images.get(series_id).cloned().unwrap_or_default())
    }

    async fn registrations_for_patient(
        &self,
        _patient_id: &str,
    ) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self.registrations.clone())
    }
}

pub fn series(id: &str, frame: &str) -> SeriesRecord {
    SeriesRecord {
        id: id.to_owned(),
        series_instance_uid: format!("uid.{id}"),
        study_instance_uid: Some("study.1".into()),
        patient_id: Some("patient.1".into()),
        frame_of_reference_uid: Some(frame.to_owned()),
        modality: Some("CT".into()),
        description: None,
    }
}

pub fn image(series_id: &str, index: u32, z: f64) -> ImageRecord {
    ImageRecord {
        sop_instance_uid: format!("{series_id}.sop.{index}"),
        path: PathBuf::from(format!("/data/{series_id}/{index}.dcm")),
        instance_number: Some(index as i32 + 1),
        position: Some([0.0, 0.0, z]),
        orientation: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        pixel_spacing: Some([1.0, 1.0]),
        rows: Some(256),
        columns: Some(256),
    }
}

pub fn axial_stack(series_id: &str, count: u32, spacing: f64) -> Vec<ImageRecord> {
    (0..count)
        .map(|i| image(series_id, i, i as f64 * spacing))
        .collect()
}

// =============================================================================
// Run store
// =============================================================================

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, FuseboxRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn run_storage_key(key: &RunKey) -> String {
    format!(
        "{}::{}::{}",
        key.primary_series_id,
        key.secondary_series_id,
        key.registration_id.as_deref().unwrap_or("-")
    )
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn get(&self, key: &RunKey) -> Result<Option<FuseboxRun>, StoreError> {
        Ok(self.runs.lock().await.get(&run_storage_key(key)).cloned())
    }

    async fn upsert(&self, run: FuseboxRun) -> Result<(), StoreError> {
        self.runs
            .lock()
            .await
            .insert(run_storage_key(&run.key), run);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FuseboxRun>, StoreError> {
        let runs = self.runs.lock().await;
        let mut rows: Vec<FuseboxRun> = runs.values().cloned().collect();
        rows.sort_by_key(|run| run_storage_key(&run.key));
        Ok(rows)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.runs.lock().await.clear();
        Ok(())
    }
}

// =============================================================================
// Resampler
// =============================================================================

/// Resampler double: writes a synthetic slice stack into the requested
/// output directory and counts invocations.
pub struct MockResampler {
    pub calls: AtomicUsize,
    slices: u32,
    slice_spacing: f64,
    delay: Option<Duration>,
    fail_for: Vec<String>,
}

impl MockResampler {
    pub fn new(slices: u32) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            slices,
            slice_spacing: 2.0,
            delay: None,
            fail_for: Vec::new(),
        }
    }

    /// Sleep before responding, to widen concurrency windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail resamples whose secondary Series Instance UID matches.
    pub fn failing_for(mut self, series_instance_uid: impl Into<String>) -> Self {
        self.fail_for.push(series_instance_uid.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resampler for MockResampler {
    async fn resample(&self, config: &ResampleConfig) -> Result<ResampleResponse, ResampleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let secondary_uid = config.metadata["secondarySeries"]["SeriesInstanceUID"]
            .as_str()
            .unwrap_or_default()
            .to_owned();
        if self.fail_for.contains(&secondary_uid) {
            return Err(ResampleError::Script("synthetic resample failure".into()));
        }

        let output = PathBuf::from(&config.output_directory).join("dicom");
        std::fs::create_dir_all(&output).map_err(ResampleError::Io)?;

        let mut instances = Vec::new();
        for index in 0..self.slices {
            let path = output.join(format!("slice_{index:04}.dcm"));
            std::fs::write(&path, vec![index as u8 + 1; 128]).map_err(ResampleError::Io)?;
            let z = index as f64 * self.slice_spacing;
            instances.push(ResampleInstance {
                index,
                sop_instance_uid: format!("derived.{secondary_uid}.{index}"),
                file_name: Some(format!("slice_{index:04}.dcm")),
                file_path: path.display().to_string(),
                instance_number: Some(index + 1),
                image_position_patient: Some(vec![0.0, 0.0, z]),
                slice_location: Some(z),
            });
        }

        Ok(ResampleResponse {
            ok: true,
            series_instance_uid: Some(format!("derived.{secondary_uid}")),
            frame_of_reference_uid: Some("for.A".into()),
            slice_count: Some(self.slices),
            rows: Some(256),
            columns: Some(256),
            pixel_spacing: Some(vec![0.9, 0.9]),
            image_orientation_patient: Some(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            image_position_patient_first: Some(vec![0.0, 0.0, 0.0]),
            image_position_patient_last: Some(vec![
                0.0,
                0.0,
                (self.slices.saturating_sub(1)) as f64 * self.slice_spacing,
            ]),
            output_directory: Some(output.display().to_string()),
            instances,
            ..Default::default()
        })
    }
}

// =============================================================================
// Service assembly
// =============================================================================

pub type TestService = FusionService<MockSeriesStore, MemoryRunStore, MockResampler>;

/// A service over two CT series sharing Frame of Reference "for.A", so
/// transform resolution takes the identity fallback and no registration
/// files are needed on disk.
pub fn shared_frame_service(resampler: MockResampler) -> Arc<TestService> {
    let store = Arc::new(
        MockSeriesStore::new()
            .with_series(series("primary", "for.A"), axial_stack("primary", 5, 3.0))
            .with_series(series("sec-a", "for.A"), axial_stack("sec-a", 4, 4.0))
            .with_series(series("sec-b", "for.A"), axial_stack("sec-b", 4, 4.0)),
    );
    service_over(store, resampler)
}

pub fn service_over(store: Arc<MockSeriesStore>, resampler: MockResampler) -> Arc<TestService> {
    let resolver = TransformResolver::new(store.clone(), ResolverOptions::default());
    Arc::new(FusionService::new(
        store,
        Arc::new(MemoryRunStore::new()),
        Arc::new(resampler),
        resolver,
        FusionOptions::default(),
    ))
}
