//! Fusion manifest orchestration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::error::FusionError;
use crate::geometry::{nearest_slice, ImageGeometry};
use crate::resolver::{
    TransformResolution, TransformResolver, TransformSource, IDENTITY_REGISTRATION_ID,
};
use crate::store::{
    now_millis, FuseboxRun, ImageRecord, RunDiagnostics, RunKey, RunStore, SeriesRecord,
    SeriesStore,
};

use super::manifest::{
    FusionInstanceDescriptor, FusionManifest, FusionSecondaryDescriptor, FusionSettings,
    Interpolation, SecondaryStatus,
};
use super::overlay::{OverlayCache, OverlayKey, DEFAULT_OVERLAY_CACHE_CAPACITY};
use super::resample::{ResampleConfig, ResampleResponse, Resampler};

// =============================================================================
// Requests and options
// =============================================================================

/// Parameters of one manifest fetch.
#[derive(Debug, Clone)]
pub struct ManifestRequest {
    pub primary_series_id: String,

    /// Secondaries to fuse onto the primary, in requested order
    pub secondary_series_ids: Vec<String>,

    /// Rebuild the requested secondaries even when cached
    pub force: bool,

    /// Override the manifest-wide interpolation; a change invalidates the
    /// whole cached manifest for this primary
    pub interpolation: Option<Interpolation>,
}

impl ManifestRequest {
    pub fn new(
        primary_series_id: impl Into<String>,
        secondary_series_ids: Vec<String>,
    ) -> Self {
        Self {
            primary_series_id: primary_series_id.into(),
            secondary_series_ids,
            force: false,
            interpolation: None,
        }
    }
}

/// Construction options for [`FusionService`].
pub struct FusionOptions {
    /// Default manifest settings for new primaries
    pub settings: FusionSettings,

    /// Byte capacity of the overlay slice cache
    pub overlay_cache_capacity: usize,

    /// Root for per-pair temp working directories; system temp when `None`
    pub temp_root: Option<PathBuf>,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            settings: FusionSettings::default(),
            overlay_cache_capacity: DEFAULT_OVERLAY_CACHE_CAPACITY,
            temp_root: None,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// State of an in-flight manifest build, shared with attached waiters.
struct InFlightBuild {
    notify: Notify,
    result: Mutex<Option<Result<FusionManifest, FusionError>>>,
}

/// The fusion manifest service.
///
/// Owns all mutable caches as explicit state with a documented lifecycle:
/// lazily populated, invalidated on settings change or explicit clear, never
/// persisted. After a restart the caches are empty regardless of persisted
/// run rows; only this in-memory state determines whether an overlay is
/// already built.
pub struct FusionService<S, R, X> {
    store: Arc<S>,
    runs: Arc<R>,
    resampler: Arc<X>,
    resolver: TransformResolver<S>,
    defaults: FusionSettings,
    temp_root: Option<PathBuf>,

    /// Cached manifests per primary series
    manifests: RwLock<HashMap<String, FusionManifest>>,

    /// Raw per-slice overlay buffers served to the viewer
    overlays: OverlayCache,

    /// In-flight builds per primary series: the mutual-exclusion primitive
    /// guaranteeing at most one concurrent build per primary
    pending: Mutex<HashMap<String, Arc<InFlightBuild>>>,
}

impl<S, R, X> FusionService<S, R, X>
where
    S: SeriesStore,
    R: RunStore,
    X: Resampler,
{
    pub fn new(
        store: Arc<S>,
        runs: Arc<R>,
        resampler: Arc<X>,
        resolver: TransformResolver<S>,
        options: FusionOptions,
    ) -> Self {
        Self {
            store,
            runs,
            resampler,
            resolver,
            defaults: options.settings,
            temp_root: options.temp_root,
            manifests: RwLock::new(HashMap::new()),
            overlays: OverlayCache::with_capacity(options.overlay_cache_capacity),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Build or return the fusion manifest for a primary series.
    ///
    /// The fetch always succeeds as a whole when the primary exists;
    /// individual secondaries carry their own status/error so the viewer can
    /// display ready overlays while flagging failed ones.
    pub async fn manifest(&self, request: ManifestRequest) -> Result<FusionManifest, FusionError> {
        loop {
            if let Some(manifest) = self.satisfied_from_cache(&request).await {
                return Ok(manifest);
            }

            let state = {
                let mut pending = self.pending.lock().await;
                if let Some(state) = pending.get(&request.primary_series_id) {
                    state.clone()
                } else {
                    let state = Arc::new(InFlightBuild {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    pending.insert(request.primary_series_id.clone(), state.clone());
                    drop(pending);

                    let result = self.build(&request).await;
                    if let Ok(manifest) = &result {
                        self.manifests
                            .write()
                            .await
                            .insert(request.primary_series_id.clone(), manifest.clone());
                    }

                    *state.result.lock().await = Some(result.clone());
                    self.pending.lock().await.remove(&request.primary_series_id);
                    state.notify.notify_waiters();

                    return result;
                }
            };

            // Attach to the in-flight build. Register interest before
            // re-checking the result so a completion between the two cannot
            // be missed.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let finished = { state.result.lock().await.clone() };
            match finished {
                Some(result) => {
                    if let Some(manifest) = self.accept_attached(&request, result)? {
                        return Ok(manifest);
                    }
                    // The attached result does not cover this request; go
                    // around and build the difference.
                }
                None => {
                    notified.await;
                }
            }
        }
    }

    /// The cached manifest for a primary, if any (no build is triggered).
    pub async fn cached_manifest(&self, primary_series_id: &str) -> Option<FusionManifest> {
        self.manifests.read().await.get(primary_series_id).cloned()
    }

    /// One overlay slice buffer, once its secondary is ready.
    pub async fn overlay_slice(
        &self,
        primary_series_id: &str,
        secondary_series_id: &str,
        sop_instance_uid: &str,
    ) -> Option<Bytes> {
        self.overlays
            .get(&OverlayKey::new(
                primary_series_id,
                secondary_series_id,
                sop_instance_uid,
            ))
            .await
    }

    /// Drop the cached manifest and overlay buffers for a primary series.
    pub async fn clear(&self, primary_series_id: &str) {
        self.manifests.write().await.remove(primary_series_id);
        self.overlays.invalidate_primary(primary_series_id).await;
        info!("cleared fusion cache for primary {}", primary_series_id);
    }

    /// Overlay cache statistics: `(current_size, capacity, entry_count)`.
    pub async fn overlay_stats(&self) -> (usize, usize, usize) {
        (
            self.overlays.size().await,
            self.overlays.capacity(),
            self.overlays.len().await,
        )
    }

    pub fn runs(&self) -> &Arc<R> {
        &self.runs
    }

    pub fn resampler(&self) -> &Arc<X> {
        &self.resampler
    }

    async fn satisfied_from_cache(&self, request: &ManifestRequest) -> Option<FusionManifest> {
        if request.force {
            return None;
        }
        let manifests = self.manifests.read().await;
        let manifest = manifests.get(&request.primary_series_id)?;
        let interpolation_matches = request
            .interpolation
            .map(|interpolation| interpolation == manifest.settings.interpolation)
            .unwrap_or(true);
        (interpolation_matches && manifest.covers(&request.secondary_series_ids))
            .then(|| manifest.clone())
    }

    /// Decide whether a result this request attached to satisfies it.
    fn accept_attached(
        &self,
        request: &ManifestRequest,
        result: Result<FusionManifest, FusionError>,
    ) -> Result<Option<FusionManifest>, FusionError> {
        let manifest = result?;
        let interpolation_matches = request
            .interpolation
            .map(|interpolation| interpolation == manifest.settings.interpolation)
            .unwrap_or(true);
        if !request.force
            && interpolation_matches
            && manifest.covers(&request.secondary_series_ids)
        {
            return Ok(Some(manifest));
        }
        Ok(None)
    }

    // =========================================================================
    // Build
    // =========================================================================

    async fn build(&self, request: &ManifestRequest) -> Result<FusionManifest, FusionError> {
        let primary = self
            .store
            .series(&request.primary_series_id)
            .await?
            .ok_or_else(|| FusionError::PrimaryNotFound(request.primary_series_id.clone()))?;
        let primary_images = self.store.images(&request.primary_series_id).await?;

        let previous = self.cached_manifest(&request.primary_series_id).await;
        let interpolation = request
            .interpolation
            .or(previous.as_ref().map(|m| m.settings.interpolation))
            .unwrap_or(self.defaults.interpolation);
        let settings_changed = previous
            .as_ref()
            .is_some_and(|m| m.settings.interpolation != interpolation);

        let mut manifest = match previous {
            Some(_) if settings_changed => {
                info!(
                    "interpolation changed to {} for primary {}; invalidating manifest",
                    interpolation, request.primary_series_id
                );
                self.overlays
                    .invalidate_primary(&request.primary_series_id)
                    .await;
                FusionManifest::new(
                    request.primary_series_id.clone(),
                    FusionSettings {
                        interpolation,
                        preload: self.defaults.preload,
                    },
                )
            }
            Some(manifest) => manifest,
            None => FusionManifest::new(
                request.primary_series_id.clone(),
                FusionSettings {
                    interpolation,
                    preload: self.defaults.preload,
                },
            ),
        };

        // New secondaries appear pending before any work starts
        for secondary_id in &request.secondary_series_ids {
            if manifest.secondary(secondary_id).is_none() {
                manifest
                    .upsert_secondary(FusionSecondaryDescriptor::pending(secondary_id.as_str()));
            }
        }
        self.publish(&manifest).await;

        for secondary_id in &request.secondary_series_ids {
            let already_ready = manifest
                .secondary(secondary_id)
                .is_some_and(|d| d.status == SecondaryStatus::Ready);
            if already_ready && !request.force {
                // Copy, don't recompute
                debug!(
                    "secondary {} already ready for primary {}; reusing",
                    secondary_id, request.primary_series_id
                );
                continue;
            }
            if request.force {
                self.overlays
                    .invalidate_pair(&request.primary_series_id, secondary_id)
                    .await;
            }

            let mut generating = manifest
                .secondary(secondary_id)
                .cloned()
                .unwrap_or_else(|| FusionSecondaryDescriptor::pending(secondary_id.as_str()));
            generating.status = SecondaryStatus::Generating;
            manifest.upsert_secondary(generating);
            self.publish(&manifest).await;

            let descriptor = self
                .build_secondary(&primary, &primary_images, secondary_id, interpolation)
                .await;
            manifest.upsert_secondary(descriptor);
            self.publish(&manifest).await;
        }

        manifest.updated_at = now_millis();
        Ok(manifest)
    }

    /// Build one secondary overlay. Never fails the manifest: every failure
    /// path produces an `error` descriptor and leaves siblings untouched.
    async fn build_secondary(
        &self,
        primary: &SeriesRecord,
        primary_images: &[ImageRecord],
        secondary_id: &str,
        interpolation: Interpolation,
    ) -> FusionSecondaryDescriptor {
        info!(
            "building fusion overlay {} → {}",
            secondary_id, primary.id
        );

        let resolution = match self.resolver.resolve(&primary.id, secondary_id, None).await {
            Ok(resolution) => resolution,
            Err(err) => {
                warn!(
                    "transform resolution failed for {} → {}: {}",
                    secondary_id, primary.id, err
                );
                let key = RunKey::new(&primary.id, secondary_id, None);
                self.record_failure(&key, &err.to_string()).await;
                return FusionSecondaryDescriptor::failed(secondary_id, err.to_string(), None);
            }
        };

        // The identity fallback is not a registration object; run identity
        // records registrationId only for real registrations.
        let registration_id = resolution
            .registration_id
            .clone()
            .filter(|id| id != IDENTITY_REGISTRATION_ID);
        let key = RunKey::new(&primary.id, secondary_id, registration_id);
        self.record_running(&key).await;

        let secondary = match self.store.series(secondary_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let message = format!("secondary series not found: {secondary_id}");
                self.record_failure(&key, &message).await;
                return FusionSecondaryDescriptor::failed(
                    secondary_id,
                    message,
                    resolution.registration_id,
                );
            }
            Err(err) => {
                self.record_failure(&key, &err.to_string()).await;
                return FusionSecondaryDescriptor::failed(
                    secondary_id,
                    err.to_string(),
                    resolution.registration_id,
                );
            }
        };
        let secondary_images = match self.store.images(secondary_id).await {
            Ok(images) => images,
            Err(err) => {
                self.record_failure(&key, &err.to_string()).await;
                return FusionSecondaryDescriptor::failed(
                    secondary_id,
                    err.to_string(),
                    resolution.registration_id,
                );
            }
        };
        if primary_images.is_empty() || secondary_images.is_empty() {
            let message = "series has no image instances".to_owned();
            self.record_failure(&key, &message).await;
            return FusionSecondaryDescriptor::failed(
                secondary_id,
                message,
                resolution.registration_id,
            );
        }

        // Per-pair temp working directory, removed on every exit path when
        // `temp_dir` drops.
        let temp_dir = match self.create_temp_dir() {
            Ok(dir) => dir,
            Err(err) => {
                let message = format!("failed to create temp directory: {err}");
                self.record_failure(&key, &message).await;
                return FusionSecondaryDescriptor::failed(
                    secondary_id,
                    message,
                    resolution.registration_id,
                );
            }
        };
        let output_directory = temp_dir.path().join("out");
        if let Err(err) = std::fs::create_dir_all(&output_directory) {
            let message = format!("failed to create output directory: {err}");
            self.record_failure(&key, &message).await;
            return FusionSecondaryDescriptor::failed(
                secondary_id,
                message,
                resolution.registration_id,
            );
        }

        let config = resample_config(
            primary,
            primary_images,
            &secondary,
            &secondary_images,
            &resolution,
            interpolation,
            &output_directory,
        );

        let response = match self.resampler.resample(&config).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    "resample failed for {} → {}: {}",
                    secondary_id, primary.id, err
                );
                self.record_failure(&key, &err.to_string()).await;
                return FusionSecondaryDescriptor::failed(
                    secondary_id,
                    err.to_string(),
                    resolution.registration_id,
                );
            }
        };

        // Ingest the slice stack into memory; afterwards the in-memory
        // buffers are the sole source of truth and the temp output goes away.
        let primary_normal = primary_images
            .iter()
            .find_map(ImageRecord::geometry)
            .and_then(|g: ImageGeometry| g.normal());
        let mut instances = Vec::with_capacity(response.instances.len());
        for instance in &response.instances {
            let data = match tokio::fs::read(&instance.file_path).await {
                Ok(data) => Bytes::from(data),
                Err(err) => {
                    let message =
                        format!("failed to ingest slice {}: {}", instance.file_path, err);
                    self.record_failure(&key, &message).await;
                    return FusionSecondaryDescriptor::failed(
                        secondary_id,
                        message,
                        resolution.registration_id,
                    );
                }
            };
            self.overlays
                .put(
                    OverlayKey::new(
                        primary.id.as_str(),
                        secondary_id,
                        instance.sop_instance_uid.as_str(),
                    ),
                    data,
                )
                .await;

            instances.push(FusionInstanceDescriptor {
                sop_instance_uid: instance.sop_instance_uid.clone(),
                instance_number: instance.instance_number,
                image_position_patient: position3(instance.image_position_patient.as_deref()),
                slice_location: instance.slice_location,
                primary_sop_instance_uid: nearest_primary_sop(
                    primary_images,
                    primary_normal,
                    position3(instance.image_position_patient.as_deref()),
                ),
            });
        }

        let diagnostics = RunDiagnostics {
            output_directory: response.output_directory.clone(),
            slice_count: response.slice_count,
            rows: response.rows,
            columns: response.columns,
        };
        self.record_ready(&key, diagnostics).await;

        info!(
            "fusion overlay ready: {} → {} ({} slices)",
            secondary_id,
            primary.id,
            instances.len()
        );
        ready_descriptor(secondary_id, &resolution, &response, instances)
    }

    fn create_temp_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("fusebox-");
        match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }

    async fn publish(&self, manifest: &FusionManifest) {
        self.manifests
            .write()
            .await
            .insert(manifest.primary_series_id.clone(), manifest.clone());
    }

    // Run rows are observability only; a store hiccup must never fail a
    // build, so persistence errors are logged and swallowed.

    async fn record_running(&self, key: &RunKey) {
        let previous = match self.runs.get(key).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!("run store lookup failed: {}", err);
                None
            }
        };
        if let Err(err) = self
            .runs
            .upsert(FuseboxRun::running(key.clone(), previous.as_ref()))
            .await
        {
            warn!("run store upsert failed: {}", err);
        }
    }

    async fn record_ready(&self, key: &RunKey, diagnostics: RunDiagnostics) {
        let previous = self.runs.get(key).await.ok().flatten();
        let run = FuseboxRun::running(key.clone(), previous.as_ref()).completed(diagnostics);
        if let Err(err) = self.runs.upsert(run).await {
            warn!("run store upsert failed: {}", err);
        }
    }

    async fn record_failure(&self, key: &RunKey, message: &str) {
        let previous = self.runs.get(key).await.ok().flatten();
        let run = FuseboxRun::running(key.clone(), previous.as_ref()).failed(message);
        if let Err(err) = self.runs.upsert(run).await {
            warn!("run store upsert failed: {}", err);
        }
    }
}

// =============================================================================
// Build helpers
// =============================================================================

fn resample_config(
    primary: &SeriesRecord,
    primary_images: &[ImageRecord],
    secondary: &SeriesRecord,
    secondary_images: &[ImageRecord],
    resolution: &TransformResolution,
    interpolation: Interpolation,
    output_directory: &std::path::Path,
) -> ResampleConfig {
    // Exactly one transform representation is authoritative: the helper's
    // file when provenance says so, the raw matrix otherwise.
    let use_file = matches!(
        resolution.transform_source,
        TransformSource::HelperGenerated
            | TransformSource::HelperCache
            | TransformSource::HelperRegenerated
    );

    ResampleConfig {
        primary: primary_images
            .iter()
            .map(|image| image.path.display().to_string())
            .collect(),
        secondary: secondary_images
            .iter()
            .map(|image| image.path.display().to_string())
            .collect(),
        transform: if use_file {
            None
        } else {
            resolution.matrix.map(|matrix| matrix.to_vec())
        },
        transform_file: if use_file {
            resolution
                .transform_file
                .as_ref()
                .map(|path| path.display().to_string())
        } else {
            None
        },
        invert_transform_file: use_file.then_some(true),
        interpolation,
        output_directory: output_directory.display().to_string(),
        metadata: serde_json::json!({
            "patient": {
                "PatientID": primary.patient_id,
            },
            "study": {
                "StudyInstanceUID": primary.study_instance_uid,
            },
            "primarySeries": {
                "SeriesInstanceUID": primary.series_instance_uid,
                "FrameOfReferenceUID": primary.frame_of_reference_uid,
                "Modality": primary.modality,
            },
            "secondarySeries": {
                "SeriesInstanceUID": secondary.series_instance_uid,
                "FrameOfReferenceUID": secondary.frame_of_reference_uid,
                "Modality": secondary.modality,
            },
            "derivedSeries": {
                "SeriesDescription": format!(
                    "Fused {} {}",
                    secondary.modality.as_deref().unwrap_or("overlay"),
                    secondary.id
                ),
                "ImageType": ["DERIVED", "SECONDARY", "FUSED"],
            },
        }),
    }
}

fn ready_descriptor(
    secondary_id: &str,
    resolution: &TransformResolution,
    response: &ResampleResponse,
    instances: Vec<FusionInstanceDescriptor>,
) -> FusionSecondaryDescriptor {
    FusionSecondaryDescriptor {
        secondary_series_id: secondary_id.to_owned(),
        status: SecondaryStatus::Ready,
        error: None,
        frame_of_reference_uid: response.frame_of_reference_uid.clone(),
        derived_series_instance_uid: response.series_instance_uid.clone(),
        rows: response.rows,
        columns: response.columns,
        pixel_spacing: position2(response.pixel_spacing.as_deref()),
        orientation: position6(response.image_orientation_patient.as_deref()),
        first_position: position3(response.image_position_patient_first.as_deref()),
        last_position: position3(response.image_position_patient_last.as_deref()),
        window_center: response.window_center.clone(),
        window_width: response.window_width.clone(),
        transform_source: Some(resolution.transform_source),
        registration_id: resolution.registration_id.clone(),
        instances,
    }
}

/// The primary slice whose Z-position is numerically closest to a resampled
/// slice, by projection onto the primary's slice normal.
fn nearest_primary_sop(
    primary_images: &[ImageRecord],
    primary_normal: Option<[f64; 3]>,
    target: Option<[f64; 3]>,
) -> Option<String> {
    let target = target?;
    let normal = primary_normal.unwrap_or([0.0, 0.0, 1.0]);

    let mut positions = Vec::with_capacity(primary_images.len());
    let mut sops = Vec::with_capacity(primary_images.len());
    for image in primary_images {
        if let Some(position) = image.position {
            positions.push(position);
            sops.push(image.sop_instance_uid.as_str());
        }
    }

    nearest_slice(&positions, normal, target).map(|index| sops[index].to_owned())
}

fn position2(values: Option<&[f64]>) -> Option<[f64; 2]> {
    fixed_size(values)
}

fn position3(values: Option<&[f64]>) -> Option<[f64; 3]> {
    fixed_size(values)
}

fn position6(values: Option<&[f64]>) -> Option<[f64; 6]> {
    fixed_size(values)
}

fn fixed_size<const N: usize>(values: Option<&[f64]>) -> Option<[f64; N]> {
    let values = values?;
    if values.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    out.copy_from_slice(values);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(sop: &str, z: f64, instance_number: i32) -> ImageRecord {
        ImageRecord {
            sop_instance_uid: sop.to_owned(),
            path: PathBuf::from(format!("{sop}.dcm")),
            instance_number: Some(instance_number),
            position: Some([0.0, 0.0, z]),
            orientation: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            pixel_spacing: Some([1.0, 1.0]),
            rows: Some(512),
            columns: Some(512),
        }
    }

    #[test]
    fn nearest_primary_sop_is_by_z_not_index() {
        // Primary slices every 3mm, resampled slice at z=4.0: closest is the
        // slice at z=3.0, not the one sharing an array index.
        let primary = vec![image("sop.0", 0.0, 1), image("sop.1", 3.0, 2), image("sop.2", 6.0, 3)];
        let normal = Some([0.0, 0.0, 1.0]);

        assert_eq!(
            nearest_primary_sop(&primary, normal, Some([0.0, 0.0, 4.0])),
            Some("sop.1".to_owned())
        );
        assert_eq!(
            nearest_primary_sop(&primary, normal, Some([0.0, 0.0, 100.0])),
            Some("sop.2".to_owned())
        );
        assert_eq!(nearest_primary_sop(&primary, normal, None), None);
    }

    #[test]
    fn nearest_primary_sop_skips_images_without_position() {
        let mut primary = vec![image("sop.0", 0.0, 1), image("sop.1", 3.0, 2)];
        primary[0].position = None;

        assert_eq!(
            nearest_primary_sop(&primary, Some([0.0, 0.0, 1.0]), Some([0.0, 0.0, 0.1])),
            Some("sop.1".to_owned())
        );
    }

    #[test]
    fn resample_config_has_one_authoritative_transform() {
        let primary = SeriesRecord {
            id: "p".into(),
            series_instance_uid: "uid.p".into(),
            study_instance_uid: Some("study".into()),
            patient_id: Some("patient".into()),
            frame_of_reference_uid: Some("for.A".into()),
            modality: Some("CT".into()),
            description: None,
        };
        let secondary = SeriesRecord {
            id: "s".into(),
            series_instance_uid: "uid.s".into(),
            modality: Some("MR".into()),
            ..primary.clone()
        };
        let images = vec![image("sop.0", 0.0, 1)];

        let matrix_resolution = TransformResolution {
            matrix: Some(crate::geometry::IDENTITY),
            transform_file: None,
            transform_source: TransformSource::Matrix,
            registration_id: Some("reg.1".into()),
            was_inverted: false,
        };
        let config = resample_config(
            &primary,
            &images,
            &secondary,
            &images,
            &matrix_resolution,
            Interpolation::Linear,
            std::path::Path::new("/tmp/out"),
        );
        assert!(config.transform.is_some());
        assert!(config.transform_file.is_none());

        let helper_resolution = TransformResolution {
            transform_file: Some(PathBuf::from("/cache/t.h5")),
            transform_source: TransformSource::HelperGenerated,
            ..matrix_resolution
        };
        let config = resample_config(
            &primary,
            &images,
            &secondary,
            &images,
            &helper_resolution,
            Interpolation::Linear,
            std::path::Path::new("/tmp/out"),
        );
        assert!(config.transform.is_none());
        assert_eq!(config.transform_file.as_deref(), Some("/cache/t.h5"));
        assert_eq!(config.invert_transform_file, Some(true));
        assert_eq!(config.metadata["secondarySeries"]["Modality"], "MR");
    }
}
