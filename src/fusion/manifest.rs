//! Manifest and descriptor types served to the viewer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::resolver::TransformSource;
use crate::store::now_millis;

/// Resampling interpolation mode. A manifest-wide setting: changing it
/// invalidates every secondary of the primary it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    Nearest,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => f.write_str("linear"),
            Self::Nearest => f.write_str("nearest"),
        }
    }
}

impl FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "nearest" => Ok(Self::Nearest),
            other => Err(format!(
                "unknown interpolation '{other}' (expected 'linear' or 'nearest')"
            )),
        }
    }
}

/// Manifest-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FusionSettings {
    pub interpolation: Interpolation,
    /// Whether overlay slices should be pushed to the viewer eagerly
    #[serde(default)]
    pub preload: bool,
}

/// Lifecycle of one secondary overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryStatus {
    Pending,
    Generating,
    Ready,
    Error,
}

/// One resampled overlay slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionInstanceDescriptor {
    #[serde(rename = "sopInstanceUID")]
    pub sop_instance_uid: String,

    pub instance_number: Option<u32>,

    pub image_position_patient: Option<[f64; 3]>,

    pub slice_location: Option<f64>,

    /// SOP Instance UID of the primary slice whose Z-position is numerically
    /// closest. Computed, not index-based: resampled slice counts commonly
    /// differ from the primary's.
    #[serde(rename = "primarySopInstanceUID")]
    pub primary_sop_instance_uid: Option<String>,
}

/// One secondary series' overlay descriptor inside a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionSecondaryDescriptor {
    pub secondary_series_id: String,

    pub status: SecondaryStatus,

    /// Failure message when `status == Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "frameOfReferenceUID")]
    pub frame_of_reference_uid: Option<String>,

    /// Series Instance UID of the derived (resampled) series
    #[serde(rename = "derivedSeriesInstanceUID")]
    pub derived_series_instance_uid: Option<String>,

    pub rows: Option<u32>,
    pub columns: Option<u32>,

    /// (row spacing, column spacing) in mm
    pub pixel_spacing: Option<[f64; 2]>,

    /// ImageOrientationPatient of the resampled stack
    pub orientation: Option<[f64; 6]>,

    pub first_position: Option<[f64; 3]>,
    pub last_position: Option<[f64; 3]>,

    pub window_center: Option<Vec<f64>>,
    pub window_width: Option<Vec<f64>>,

    pub transform_source: Option<TransformSource>,

    pub registration_id: Option<String>,

    /// Per-slice descriptors, in resampled stack order
    pub instances: Vec<FusionInstanceDescriptor>,
}

impl FusionSecondaryDescriptor {
    /// A freshly-requested secondary, not yet resolved.
    pub fn pending(secondary_series_id: impl Into<String>) -> Self {
        Self {
            secondary_series_id: secondary_series_id.into(),
            status: SecondaryStatus::Pending,
            error: None,
            frame_of_reference_uid: None,
            derived_series_instance_uid: None,
            rows: None,
            columns: None,
            pixel_spacing: None,
            orientation: None,
            first_position: None,
            last_position: None,
            window_center: None,
            window_width: None,
            transform_source: None,
            registration_id: None,
            instances: Vec::new(),
        }
    }

    /// A secondary whose resolution or resample failed.
    pub fn failed(
        secondary_series_id: impl Into<String>,
        message: impl Into<String>,
        registration_id: Option<String>,
    ) -> Self {
        Self {
            status: SecondaryStatus::Error,
            error: Some(message.into()),
            registration_id,
            ..Self::pending(secondary_series_id)
        }
    }
}

/// Cached description of how a primary series is fused with one or more
/// secondary series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionManifest {
    pub primary_series_id: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub settings: FusionSettings,
    pub secondaries: Vec<FusionSecondaryDescriptor>,
}

impl FusionManifest {
    pub fn new(primary_series_id: impl Into<String>, settings: FusionSettings) -> Self {
        let now = now_millis();
        Self {
            primary_series_id: primary_series_id.into(),
            created_at: now,
            updated_at: now,
            settings,
            secondaries: Vec::new(),
        }
    }

    pub fn secondary(&self, secondary_series_id: &str) -> Option<&FusionSecondaryDescriptor> {
        self.secondaries
            .iter()
            .find(|d| d.secondary_series_id == secondary_series_id)
    }

    /// Replace an existing descriptor in place (previously-seen secondaries
    /// keep their position) or append a new one.
    pub fn upsert_secondary(&mut self, descriptor: FusionSecondaryDescriptor) {
        match self
            .secondaries
            .iter_mut()
            .find(|d| d.secondary_series_id == descriptor.secondary_series_id)
        {
            Some(existing) => *existing = descriptor,
            None => self.secondaries.push(descriptor),
        }
    }

    /// Whether every requested secondary is present and ready, so the cached
    /// manifest satisfies the request without a rebuild.
    pub fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|id| {
            self.secondary(id)
                .is_some_and(|d| d.status == SecondaryStatus::Ready)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(id: &str) -> FusionSecondaryDescriptor {
        FusionSecondaryDescriptor {
            status: SecondaryStatus::Ready,
            ..FusionSecondaryDescriptor::pending(id)
        }
    }

    #[test]
    fn upsert_keeps_position_and_appends_new() {
        let mut manifest = FusionManifest::new("primary.1", FusionSettings::default());
        manifest.upsert_secondary(ready("a"));
        manifest.upsert_secondary(ready("b"));

        // Rebuilding "a" must not move it
        manifest.upsert_secondary(FusionSecondaryDescriptor::failed("a", "resample failed", None));
        manifest.upsert_secondary(ready("c"));

        let order: Vec<&str> = manifest
            .secondaries
            .iter()
            .map(|d| d.secondary_series_id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(manifest.secondary("a").unwrap().status, SecondaryStatus::Error);
    }

    #[test]
    fn covers_requires_every_requested_secondary_ready() {
        let mut manifest = FusionManifest::new("primary.1", FusionSettings::default());
        manifest.upsert_secondary(ready("a"));
        manifest.upsert_secondary(FusionSecondaryDescriptor::failed("b", "boom", None));

        assert!(manifest.covers(&["a".into()]));
        assert!(!manifest.covers(&["a".into(), "b".into()]));
        assert!(!manifest.covers(&["c".into()]));
        assert!(manifest.covers(&[]));
    }

    #[test]
    fn serialization_uses_viewer_facing_keys() {
        let mut descriptor = ready("sec.1");
        descriptor.frame_of_reference_uid = Some("for.A".into());
        descriptor.instances.push(FusionInstanceDescriptor {
            sop_instance_uid: "sop.1".into(),
            instance_number: Some(1),
            image_position_patient: Some([0.0, 0.0, 1.5]),
            slice_location: Some(1.5),
            primary_sop_instance_uid: Some("primary.sop.3".into()),
        });

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["frameOfReferenceUID"], "for.A");
        assert_eq!(json["secondarySeriesId"], "sec.1");
        assert_eq!(json["instances"][0]["sopInstanceUID"], "sop.1");
        assert_eq!(json["instances"][0]["primarySopInstanceUID"], "primary.sop.3");
        // Errors are omitted entirely for healthy descriptors
        assert!(json.get("error").is_none());
    }

    #[test]
    fn interpolation_parses_and_displays() {
        assert_eq!("linear".parse::<Interpolation>(), Ok(Interpolation::Linear));
        assert_eq!(
            "nearest".parse::<Interpolation>(),
            Ok(Interpolation::Nearest)
        );
        assert!("cubic".parse::<Interpolation>().is_err());
        assert_eq!(Interpolation::Linear.to_string(), "linear");
    }
}
