//! Snapshot store for pre-materialized series
//!
//! Snapshots are JSON files on durable storage, one per series, consulted only
//! when the live warehouse cannot answer. A file holds either a bare array of
//! rows or an envelope recording when it was materialized.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::{Row, SeriesScope};

/// Errors from reading or writing snapshot files
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The file exists but could not be read or written
    #[error("Snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file exists but does not hold rows
    #[error("Snapshot {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only access to snapshots, addressed by series scope
pub trait SnapshotStore: Send + Sync {
    /// Returns the snapshot rows, or `None` if no snapshot exists
    fn read(&self, scope: &SeriesScope) -> Result<Option<Vec<Row>>, SnapshotError>;
}

/// Envelope written around snapshot rows
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope<T> {
    /// When the rows were pulled from the warehouse
    materialized_at: DateTime<Utc>,
    /// The rows themselves
    rows: T,
}

/// Either on-disk layout
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Envelope(SnapshotEnvelope<Vec<Row>>),
    Rows(Vec<Row>),
}

/// Snapshot store backed by a directory of JSON files
///
/// Layout under the root directory:
/// - `us.json` for the national series
/// - `states/<Name_With_Underscores>.json` for each state
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    /// Directory holding the snapshot files
    root: PathBuf,
}

impl FileSnapshotStore {
    /// Creates a store in the XDG data directory (`~/.local/share/covidcast/snapshots` on Linux)
    ///
    /// Returns `None` if no home directory can be determined.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "covidcast")?;
        let root = project_dirs.data_dir().join("snapshots");
        Some(Self { root })
    }

    /// Creates a store rooted at a custom directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the snapshot file for `scope`
    pub fn snapshot_path(&self, scope: &SeriesScope) -> PathBuf {
        match scope {
            SeriesScope::National => self.root.join("us.json"),
            SeriesScope::State(key) => self
                .root
                .join("states")
                .join(format!("{}.json", key.storage_stem())),
        }
    }

    /// Materializes `rows` as the snapshot for `scope`
    ///
    /// # Arguments
    /// * `scope` - Which series the rows belong to
    /// * `rows` - Rows in the shape the live query returns
    ///
    /// # Returns
    /// * `Ok(PathBuf)` of the written file
    /// * `Err(SnapshotError)` if directory creation or writing fails
    pub fn write(&self, scope: &SeriesScope, rows: &[Row]) -> Result<PathBuf, SnapshotError> {
        let path = self.snapshot_path(scope);
        let io_err = |source| SnapshotError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let envelope = SnapshotEnvelope {
            materialized_at: Utc::now(),
            rows,
        };
        let json = serde_json::to_string_pretty(&envelope).map_err(|source| SnapshotError::Parse {
            path: path.clone(),
            source,
        })?;

        fs::write(&path, json).map_err(io_err)?;
        Ok(path)
    }

    /// Reads when the snapshot for `scope` was materialized
    ///
    /// Bare-array snapshots carry no timestamp and yield `None`.
    pub fn materialized_at(&self, scope: &SeriesScope) -> Result<Option<DateTime<Utc>>, SnapshotError> {
        Ok(match self.read_file(scope)? {
            Some(SnapshotFile::Envelope(envelope)) => Some(envelope.materialized_at),
            _ => None,
        })
    }

    fn read_file(&self, scope: &SeriesScope) -> Result<Option<SnapshotFile>, SnapshotError> {
        let path = self.snapshot_path(scope);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| SnapshotError::Parse { path, source })
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self, scope: &SeriesScope) -> Result<Option<Vec<Row>>, SnapshotError> {
        Ok(self.read_file(scope)?.map(|file| match file {
            SnapshotFile::Envelope(envelope) => envelope.rows,
            SnapshotFile::Rows(rows) => rows,
        }))
    }
}
