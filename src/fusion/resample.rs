//! External volume resampler invocation.
//!
//! The numerical resampling itself is out of scope; it runs as a child
//! process (a SimpleITK-based script) that reads a JSON config and prints a
//! JSON summary of the derived series on stdout. Diagnostics go to stderr.
//! No timeout is enforced here: a hung resampler blocks only the task
//! awaiting it, and each pair works in its own temp directory.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::ResampleError;

use super::manifest::Interpolation;

/// Cap on captured process output carried inside error values.
const MAX_CAPTURE_CHARS: usize = 2048;

// =============================================================================
// Wire types
// =============================================================================

/// Config handed to the resampler via `--config <file>`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResampleConfig {
    /// Primary (reference) series files, in slice order
    pub primary: Vec<String>,

    /// Secondary (overlay) series files, in slice order
    pub secondary: Vec<String>,

    /// 16 row-major values of the secondary→primary affine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Vec<f64>>,

    /// Resampler-native transform file, when the helper produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform_file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub invert_transform_file: Option<bool>,

    pub interpolation: Interpolation,

    /// Directory the derived DICOM series is written under
    pub output_directory: String,

    /// Patient/study/series tag maps stamped onto the derived series
    pub metadata: serde_json::Value,
}

/// One derived slice in the resampler's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResampleInstance {
    pub index: u32,

    #[serde(rename = "sopInstanceUID")]
    pub sop_instance_uid: String,

    pub file_name: Option<String>,

    /// Path of the written slice, read during ingestion
    pub file_path: String,

    pub instance_number: Option<u32>,

    pub image_position_patient: Option<Vec<f64>>,

    pub slice_location: Option<f64>,
}

/// Summary printed by the resampler on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResampleResponse {
    #[serde(default)]
    pub ok: bool,

    /// Set instead of the other fields when the script failed internally
    pub error: Option<String>,

    pub modality: Option<String>,

    pub series_description: Option<String>,

    #[serde(rename = "studyInstanceUID")]
    pub study_instance_uid: Option<String>,

    #[serde(rename = "seriesInstanceUID")]
    pub series_instance_uid: Option<String>,

    #[serde(rename = "frameOfReferenceUID")]
    pub frame_of_reference_uid: Option<String>,

    pub slice_count: Option<u32>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,

    pub pixel_spacing: Option<Vec<f64>>,

    pub image_orientation_patient: Option<Vec<f64>>,

    pub image_position_patient_first: Option<Vec<f64>>,
    pub image_position_patient_last: Option<Vec<f64>>,

    pub window_center: Option<Vec<f64>>,
    pub window_width: Option<Vec<f64>>,

    pub output_directory: Option<String>,

    #[serde(default)]
    pub instances: Vec<ResampleInstance>,
}

// =============================================================================
// Resampler seam
// =============================================================================

/// The external-resampler seam, mockable in tests.
#[async_trait]
pub trait Resampler: Send + Sync {
    async fn resample(&self, config: &ResampleConfig) -> Result<ResampleResponse, ResampleError>;
}

/// Runs the resampler script through an interpreter:
/// `<python> <script> --config <file>`.
pub struct ScriptResampler {
    interpreter: PathBuf,
    script: PathBuf,
}

impl ScriptResampler {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl Resampler for ScriptResampler {
    async fn resample(&self, config: &ResampleConfig) -> Result<ResampleResponse, ResampleError> {
        let payload = serde_json::to_vec_pretty(config)
            .map_err(|err| ResampleError::InvalidResponse(err.to_string()))?;

        // The config file lives next to the run's output directory so the
        // whole working set disappears together.
        let config_path = PathBuf::from(&config.output_directory)
            .parent()
            .map(|parent| parent.join("resample-config.json"))
            .unwrap_or_else(|| PathBuf::from("resample-config.json"));
        tokio::fs::write(&config_path, payload).await?;

        debug!(
            "running resampler {} {} --config {}",
            self.interpreter.display(),
            self.script.display(),
            config_path.display()
        );

        let output = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg("--config")
            .arg(&config_path)
            .output()
            .await
            .map_err(ResampleError::Launch)?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            stderr.truncate(MAX_CAPTURE_CHARS);
            return Err(ResampleError::Failed {
                status: output.status.code(),
                stderr: stderr.trim().to_owned(),
            });
        }

        parse_response(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the last non-empty stdout line as the response JSON.
fn parse_response(stdout: &str) -> Result<ResampleResponse, ResampleError> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ResampleError::InvalidResponse("empty resampler output".to_owned()))?;

    let response: ResampleResponse = serde_json::from_str(line).map_err(|err| {
        let mut context = line.to_owned();
        context.truncate(MAX_CAPTURE_CHARS);
        ResampleError::InvalidResponse(format!("{err}: {context}"))
    })?;

    if let Some(message) = response.error {
        return Err(ResampleError::Script(message));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResampleConfig {
        ResampleConfig {
            primary: vec!["/tmp/p/0.dcm".into()],
            secondary: vec!["/tmp/s/0.dcm".into()],
            transform: Some(vec![
                1.0, 0.0, 0.0, 10.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
            ]),
            transform_file: None,
            invert_transform_file: None,
            interpolation: Interpolation::Linear,
            output_directory: "/tmp/out".into(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn config_serializes_with_script_facing_keys() {
        let json = serde_json::to_value(config()).unwrap();
        assert_eq!(json["interpolation"], "linear");
        assert_eq!(json["outputDirectory"], "/tmp/out");
        assert!(json["transform"].is_array());
        // None fields are omitted, not null: the script treats presence of
        // transformFile as authoritative
        assert!(json.get("transformFile").is_none());
    }

    #[test]
    fn parses_summary_with_uid_casing() {
        let stdout = r#"
{"ok": true, "modality": "MR", "seriesInstanceUID": "derived.1", "frameOfReferenceUID": "for.A", "sliceCount": 2, "rows": 256, "columns": 256, "pixelSpacing": [0.9, 0.9], "imageOrientationPatient": [1,0,0,0,1,0], "imagePositionPatientFirst": [0,0,0], "imagePositionPatientLast": [0,0,3], "outputDirectory": "/tmp/out/dicom", "instances": [{"index": 0, "sopInstanceUID": "sop.0", "filePath": "/tmp/out/dicom/slice_0000.dcm", "instanceNumber": 1, "imagePositionPatient": [0,0,0], "sliceLocation": 0.0}, {"index": 1, "sopInstanceUID": "sop.1", "filePath": "/tmp/out/dicom/slice_0001.dcm", "instanceNumber": 2, "imagePositionPatient": [0,0,3], "sliceLocation": 3.0}]}
"#;
        let response = parse_response(stdout).unwrap();
        assert!(response.ok);
        assert_eq!(response.series_instance_uid.as_deref(), Some("derived.1"));
        assert_eq!(response.frame_of_reference_uid.as_deref(), Some("for.A"));
        assert_eq!(response.slice_count, Some(2));
        assert_eq!(response.instances.len(), 2);
        assert_eq!(response.instances[1].sop_instance_uid, "sop.1");
        assert_eq!(
            response.instances[1].image_position_patient,
            Some(vec![0.0, 0.0, 3.0])
        );
    }

    #[test]
    fn error_payload_becomes_script_error() {
        let err = parse_response("{\"error\": \"transform must contain 16 values\"}").unwrap_err();
        assert!(matches!(
            err,
            ResampleError::Script(message) if message.contains("16 values")
        ));
    }

    #[test]
    fn diagnostic_lines_before_the_summary_are_ignored() {
        let stdout = "loading series\nresampling\n{\"ok\": true, \"sliceCount\": 1}\n";
        let response = parse_response(stdout).unwrap();
        assert_eq!(response.slice_count, Some(1));
    }

    #[test]
    fn garbage_output_is_invalid_response() {
        assert!(matches!(
            parse_response("not json at all"),
            Err(ResampleError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_response("   \n  \n"),
            Err(ResampleError::InvalidResponse(_))
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &std::path::Path, body: &str) -> PathBuf {
            let path = dir.join("resample.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn config_in(dir: &std::path::Path) -> ResampleConfig {
            let output = dir.join("run").join("out");
            std::fs::create_dir_all(&output).unwrap();
            ResampleConfig {
                output_directory: output.display().to_string(),
                ..super::config()
            }
        }

        #[tokio::test]
        async fn successful_run_parses_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(
                dir.path(),
                "echo 'resampling' >&2; echo '{\"ok\": true, \"sliceCount\": 7}'",
            );
            let resampler = ScriptResampler::new("/bin/sh", script);

            let response = resampler.resample(&config_in(dir.path())).await.unwrap();
            assert_eq!(response.slice_count, Some(7));
        }

        #[tokio::test]
        async fn config_file_is_written_for_the_script() {
            let dir = tempfile::tempdir().unwrap();
            // Prints the --config payload back; $3 is the config path
            let script = write_script(dir.path(), "cat \"$3\" > /dev/null; echo '{\"ok\": true}'");
            let resampler = ScriptResampler::new("/bin/sh", script);

            let config = config_in(dir.path());
            resampler.resample(&config).await.unwrap();

            let config_path = PathBuf::from(&config.output_directory)
                .parent()
                .unwrap()
                .join("resample-config.json");
            let written: serde_json::Value =
                serde_json::from_slice(&std::fs::read(config_path).unwrap()).unwrap();
            assert_eq!(written["interpolation"], "linear");
        }

        #[tokio::test]
        async fn nonzero_exit_is_failure() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(dir.path(), "echo 'sitk crashed' >&2; exit 2");
            let resampler = ScriptResampler::new("/bin/sh", script);

            let err = resampler.resample(&config_in(dir.path())).await.unwrap_err();
            match err {
                ResampleError::Failed { status, stderr } => {
                    assert_eq!(status, Some(2));
                    assert!(stderr.contains("sitk crashed"));
                }
                other => panic!("expected Failed, got {other:?}"),
            }
        }
    }
}
