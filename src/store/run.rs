//! Run status persistence.
//!
//! A run row records the observable status of one resample build, keyed by
//! `(primarySeriesId, secondarySeriesId, registrationId|null)`. Rows are
//! created on the first build attempt, updated in place, and never deleted
//! except by an explicit clear.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identity of one resample run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub primary_series_id: String,
    pub secondary_series_id: String,
    /// SOP Instance UID of the registration used, when one was
    pub registration_id: Option<String>,
}

impl RunKey {
    pub fn new(
        primary_series_id: impl Into<String>,
        secondary_series_id: impl Into<String>,
        registration_id: Option<String>,
    ) -> Self {
        Self {
            primary_series_id: primary_series_id.into(),
            secondary_series_id: secondary_series_id.into(),
            registration_id,
        }
    }

    fn storage_key(&self) -> String {
        format!(
            "{}::{}::{}",
            self.primary_series_id,
            self.secondary_series_id,
            self.registration_id.as_deref().unwrap_or("-")
        )
    }
}

/// Run state machine: `running → {ready, error}`, with a cooperative
/// `cancelled` marker. Re-entering `running` preserves the original
/// `startedAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Ready,
    Error,
    Cancelled,
}

/// Diagnostic metadata recorded on a successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub output_directory: Option<String>,
    pub slice_count: Option<u32>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
}

/// One persisted run row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuseboxRun {
    pub key: RunKey,
    pub status: RunStatus,
    pub started_at: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub diagnostics: RunDiagnostics,
}

impl FuseboxRun {
    /// Enter `running`. When a previous row exists for the same identity the
    /// original `started_at` is preserved, so retries keep their first
    /// attempt time.
    pub fn running(key: RunKey, previous: Option<&FuseboxRun>) -> Self {
        let now = now_millis();
        Self {
            key,
            status: RunStatus::Running,
            started_at: previous.map(|run| run.started_at).unwrap_or(now),
            updated_at: now,
            error: None,
            diagnostics: RunDiagnostics::default(),
        }
    }

    pub fn completed(mut self, diagnostics: RunDiagnostics) -> Self {
        self.status = RunStatus::Ready;
        self.updated_at = now_millis();
        self.error = None;
        self.diagnostics = diagnostics;
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = RunStatus::Error;
        self.updated_at = now_millis();
        self.error = Some(message.into());
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.status = RunStatus::Cancelled;
        self.updated_at = now_millis();
        self
    }
}

/// Upsert-by-identity persistence for run rows.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get(&self, key: &RunKey) -> Result<Option<FuseboxRun>, StoreError>;

    async fn upsert(&self, run: FuseboxRun) -> Result<(), StoreError>;

    /// Every stored run, in stable key order.
    async fn list(&self) -> Result<Vec<FuseboxRun>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

// =============================================================================
// JSON-file backed implementation
// =============================================================================

/// Run store persisted to a single JSON file.
///
/// The file is rewritten on every upsert; run volume is small (one row per
/// series pair) so this stays cheap.
pub struct JsonRunStore {
    path: PathBuf,
    runs: Mutex<HashMap<String, FuseboxRun>>,
}

impl JsonRunStore {
    /// Open a run store at the given path, loading any existing rows.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let runs = match std::fs::read(&path) {
            Ok(bytes) => {
                let rows: Vec<FuseboxRun> = serde_json::from_slice(&bytes)?;
                rows.into_iter()
                    .map(|run| (run.key.storage_key(), run))
                    .collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            runs: Mutex::new(runs),
        })
    }

    async fn persist(&self, runs: &HashMap<String, FuseboxRun>) -> Result<(), StoreError> {
        let mut rows: Vec<&FuseboxRun> = runs.values().collect();
        rows.sort_by_key(|run| run.key.storage_key());
        let bytes = serde_json::to_vec_pretty(&rows)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStore for JsonRunStore {
    async fn get(&self, key: &RunKey) -> Result<Option<FuseboxRun>, StoreError> {
        let runs = self.runs.lock().await;
        Ok(runs.get(&key.storage_key()).cloned())
    }

    async fn upsert(&self, run: FuseboxRun) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().await;
        runs.insert(run.key.storage_key(), run);
        self.persist(&runs).await
    }

    async fn list(&self) -> Result<Vec<FuseboxRun>, StoreError> {
        let runs = self.runs.lock().await;
        let mut rows: Vec<FuseboxRun> = runs.values().cloned().collect();
        rows.sort_by_key(|run| run.key.storage_key());
        Ok(rows)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().await;
        runs.clear();
        self.persist(&runs).await
    }
}
