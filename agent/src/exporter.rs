//! Snapshot export
//!
//! Periodically re-queries the sink for a trailing window and writes the rows
//! to `metrics_YYYYMMDD_HHMMSS.txt` as a JSON array. Files are written to a
//! temporary name first and renamed into place, so a reader never sees a
//! partial snapshot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{ExportError, ExportResult};
use crate::sink::{MeasurementSink, TimeRange};

/// File name prefix for snapshot files
pub const SNAPSHOT_PREFIX: &str = "metrics_";

/// Suffix of a snapshot still being written
const TEMP_SUFFIX: &str = ".txt.tmp";

/// File name of the snapshot taken at `at`
pub fn snapshot_file_name(at: DateTime<Utc>) -> String {
    format!("{}{}.txt", SNAPSHOT_PREFIX, at.format("%Y%m%d_%H%M%S"))
}

/// Writes snapshot files into one directory
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    directory: PathBuf,
    window: Duration,
}

impl SnapshotExporter {
    pub fn new(directory: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            directory: directory.into(),
            window,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Export the configured window ending at `now`
    pub async fn export(&self, sink: &dyn MeasurementSink, now: DateTime<Utc>) -> ExportResult<PathBuf> {
        self.export_window(sink, self.window, now).await
    }

    /// Export `[now - window, now]` and return the written path
    pub async fn export_window(
        &self,
        sink: &dyn MeasurementSink,
        window: Duration,
        now: DateTime<Utc>,
    ) -> ExportResult<PathBuf> {
        let rows = sink.query(TimeRange::last(window, now)).await?;
        let payload = serde_json::to_vec_pretty(&rows)?;

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|_| ExportError::DirectoryCreationFailed {
                path: self.directory.display().to_string(),
            })?;

        let path = self.directory.join(snapshot_file_name(now));
        let tmp = path.with_extension("txt.tmp");
        let write_failed = |e: std::io::Error| ExportError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        tokio::fs::write(&tmp, &payload).await.map_err(write_failed)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_failed(e));
        }

        debug!("Snapshot holds {} rows", rows.len());
        info!("Metrics exported to {}", path.display());
        Ok(path)
    }

    /// Delete temporary files left by an export that never reached its rename
    pub async fn remove_stale_temp_files(&self) -> ExportResult<usize> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(ExportError::WriteFailed {
                    path: self.directory.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Unable to remove stale {}: {}", name, e),
            }
        }

        if removed > 0 {
            info!("Removed {} stale snapshot temp files from {}", removed, self.directory.display());
        }
        Ok(removed)
    }
}
