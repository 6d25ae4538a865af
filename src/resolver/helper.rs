//! External registration-to-transform-file conversion.
//!
//! The helper binary converts a DICOM registration object into a
//! resampler-native transform file:
//!
//! ```text
//! helper --input <regPath> --output <cacheFile> --fixed <FoR> --moving <FoR>
//! ```
//!
//! Success is exit 0 plus a non-empty output file. Results are cached on
//! disk keyed by `(primarySeriesId, secondarySeriesId, primaryFoR,
//! secondaryFoR)`; an empty cache file is treated as unusable and
//! regenerated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::HelperError;

use super::TransformSource;

/// Cap on captured stderr carried inside error values.
const MAX_STDERR_CHARS: usize = 2048;

pub struct HelperConverter {
    binary: PathBuf,
    cache_dir: PathBuf,
    timeout: Option<Duration>,
}

/// A successful conversion: the transform file plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct HelperOutcome {
    pub transform_file: PathBuf,
    pub source: TransformSource,
}

impl HelperConverter {
    pub fn new(
        binary: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            binary: binary.into(),
            cache_dir: cache_dir.into(),
            timeout,
        }
    }

    /// Convert a registration object, reusing the cached transform file when
    /// one exists.
    pub async fn convert(
        &self,
        registration_path: &Path,
        primary_series_id: &str,
        secondary_series_id: &str,
        primary_frame: &str,
        secondary_frame: &str,
    ) -> Result<HelperOutcome, HelperError> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(HelperError::Launch)?;

        let cache_path = self.cache_path(
            primary_series_id,
            secondary_series_id,
            primary_frame,
            secondary_frame,
        );

        let existing = tokio::fs::metadata(&cache_path).await.ok();
        if let Some(metadata) = &existing {
            if metadata.len() > 0 {
                debug!(
                    "reusing cached transform file {} for {}→{}",
                    cache_path.display(),
                    secondary_series_id,
                    primary_series_id
                );
                return Ok(HelperOutcome {
                    transform_file: cache_path,
                    source: TransformSource::HelperCache,
                });
            }
        }
        let regenerating = existing.is_some();

        let mut command = Command::new(&self.binary);
        command
            .arg("--input")
            .arg(registration_path)
            .arg("--output")
            .arg(&cache_path)
            .arg("--fixed")
            .arg(primary_frame)
            .arg("--moving")
            .arg(secondary_frame)
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(duration) => tokio::time::timeout(duration, command.output())
                .await
                .map_err(|_| HelperError::TimedOut {
                    seconds: duration.as_secs(),
                })?,
            None => command.output().await,
        }
        .map_err(HelperError::Launch)?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            stderr.truncate(MAX_STDERR_CHARS);
            return Err(HelperError::Failed {
                status: output.status.code(),
                stderr: stderr.trim().to_owned(),
            });
        }

        match tokio::fs::metadata(&cache_path).await {
            Ok(metadata) if metadata.len() > 0 => Ok(HelperOutcome {
                transform_file: cache_path,
                source: if regenerating {
                    TransformSource::HelperRegenerated
                } else {
                    TransformSource::HelperGenerated
                },
            }),
            _ => Err(HelperError::MissingOutput(cache_path)),
        }
    }

    fn cache_path(
        &self,
        primary_series_id: &str,
        secondary_series_id: &str,
        primary_frame: &str,
        secondary_frame: &str,
    ) -> PathBuf {
        let name = format!(
            "{}__{}__{}__{}.h5",
            sanitize(primary_series_id),
            sanitize(secondary_series_id),
            sanitize(primary_frame),
            sanitize(secondary_frame)
        );
        self.cache_dir.join(name)
    }
}

/// Keep UID-safe characters, replace the rest so the key stays a valid
/// file name.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
