//! Configuration management.
//!
//! Command-line arguments via clap, with `FUSEBOX_`-prefixed environment
//! variable mirrors and sensible defaults.
//!
//! # Environment Variables
//!
//! - `FUSEBOX_HOST` / `FUSEBOX_PORT` - Server bind address
//! - `FUSEBOX_DICOM_ROOT` - Directory tree of DICOM files to index (required)
//! - `FUSEBOX_RESAMPLE_SCRIPT` - Path of the volume resampler script (required)
//! - `FUSEBOX_RESAMPLE_INTERPRETER` - Interpreter for the script (default: python3)
//! - `FUSEBOX_HELPER_BINARY` - Registration-to-transform-file converter (optional)
//! - `FUSEBOX_HELPER_TIMEOUT` - Helper timeout in seconds, 0 disables (default: 120)
//! - `FUSEBOX_TRANSFORM_CACHE` - Transform file cache directory
//! - `FUSEBOX_RUN_STORE` - Run status JSON file
//! - `FUSEBOX_TEMP_DIR` - Root for per-pair temp working directories
//! - `FUSEBOX_INTERPOLATION` - Default interpolation (linear | nearest)
//! - `FUSEBOX_CACHE_OVERLAYS` - Overlay cache capacity in bytes

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::fusion::{FusionOptions, FusionSettings, Interpolation, DEFAULT_OVERLAY_CACHE_CAPACITY};
use crate::resolver::ResolverOptions;

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 4600;

/// Default helper timeout in seconds.
pub const DEFAULT_HELPER_TIMEOUT_SECS: u64 = 120;

/// Fusebox - a fusion service for DICOM image series.
///
/// Indexes a directory of DICOM files, resolves spatial registration
/// transforms between series, drives an external resampler, and serves
/// fusion manifests and overlay slices to a viewer.
#[derive(Parser, Debug, Clone)]
#[command(name = "fusebox")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "FUSEBOX_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "FUSEBOX_PORT")]
    pub port: u16,

    // =========================================================================
    // Data Configuration
    // =========================================================================
    /// Directory tree of DICOM files to index at startup.
    #[arg(long, env = "FUSEBOX_DICOM_ROOT")]
    pub dicom_root: PathBuf,

    /// JSON file for run status persistence.
    #[arg(long, default_value = ".fusebox/runs.json", env = "FUSEBOX_RUN_STORE")]
    pub run_store: PathBuf,

    // =========================================================================
    // External Process Configuration
    // =========================================================================
    /// Path of the volume resampler script.
    #[arg(long, env = "FUSEBOX_RESAMPLE_SCRIPT")]
    pub resample_script: PathBuf,

    /// Interpreter used to run the resampler script.
    #[arg(long, default_value = "python3", env = "FUSEBOX_RESAMPLE_INTERPRETER")]
    pub resample_interpreter: PathBuf,

    /// Registration-to-transform-file converter binary.
    ///
    /// When unset, resolution always uses the raw registration matrices.
    #[arg(long, env = "FUSEBOX_HELPER_BINARY")]
    pub helper_binary: Option<PathBuf>,

    /// Wall-clock bound on one helper conversion, in seconds. 0 disables
    /// the timeout.
    #[arg(long, default_value_t = DEFAULT_HELPER_TIMEOUT_SECS, env = "FUSEBOX_HELPER_TIMEOUT")]
    pub helper_timeout: u64,

    /// Directory for the on-disk transform file cache.
    #[arg(long, default_value = ".fusebox/transforms", env = "FUSEBOX_TRANSFORM_CACHE")]
    pub transform_cache_dir: PathBuf,

    /// Root for per-pair temp working directories (system temp when unset).
    #[arg(long, env = "FUSEBOX_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    // =========================================================================
    // Fusion Configuration
    // =========================================================================
    /// Default interpolation mode for resampling.
    #[arg(long, default_value = "linear", env = "FUSEBOX_INTERPOLATION")]
    pub interpolation: Interpolation,

    /// Overlay slice cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_OVERLAY_CACHE_CAPACITY, env = "FUSEBOX_CACHE_OVERLAYS")]
    pub overlay_cache_bytes: usize,

    /// Eagerly push overlay slices to the viewer.
    #[arg(long, default_value_t = false, env = "FUSEBOX_PRELOAD")]
    pub preload: bool,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated). Any origin when unset.
    #[arg(long, env = "FUSEBOX_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.overlay_cache_bytes == 0 {
            return Err("overlay_cache_bytes must be greater than 0".to_string());
        }

        if self.dicom_root.as_os_str().is_empty() {
            return Err(
                "DICOM root is required. Set --dicom-root or FUSEBOX_DICOM_ROOT".to_string(),
            );
        }

        if self.resample_script.as_os_str().is_empty() {
            return Err(
                "Resampler script is required. Set --resample-script or FUSEBOX_RESAMPLE_SCRIPT"
                    .to_string(),
            );
        }

        if let Some(binary) = &self.helper_binary {
            if binary.as_os_str().is_empty() {
                return Err("helper_binary must not be empty when set".to_string());
            }
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Helper timeout as a duration; `None` disables the timeout.
    pub fn helper_timeout(&self) -> Option<Duration> {
        (self.helper_timeout > 0).then(|| Duration::from_secs(self.helper_timeout))
    }

    /// Resolver options derived from this configuration.
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            helper_binary: self.helper_binary.clone(),
            helper_timeout: self.helper_timeout(),
            transform_cache_dir: self.transform_cache_dir.clone(),
        }
    }

    /// Fusion service options derived from this configuration.
    pub fn fusion_options(&self) -> FusionOptions {
        FusionOptions {
            settings: FusionSettings {
                interpolation: self.interpolation,
                preload: self.preload,
            },
            overlay_cache_capacity: self.overlay_cache_bytes,
            temp_root: self.temp_dir.clone(),
        }
    }
}
