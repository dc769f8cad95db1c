//! SnapshotStore port - opaque storage for task snapshots.
//!
//! The scheduler only needs "save this task set" and "give me the last one".
//! Format and medium belong to the implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::Task;
use crate::error::SnapshotError;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, tasks: &[Task]) -> Result<(), SnapshotError>;

    /// Returns an empty set when nothing has been saved yet.
    async fn load_snapshot(&self) -> Result<Vec<Task>, SnapshotError>;
}

/// On-disk layout of `JsonFileSnapshotStore`.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    tasks: Vec<Task>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// Pretty-printed JSON file. Writes go to a sibling temp file first and are
/// renamed into place, so a crash mid-write leaves the previous snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn save_snapshot(&self, tasks: &[Task]) -> Result<(), SnapshotError> {
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            tasks: tasks.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Vec<Task>, SnapshotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file: SnapshotFile = serde_json::from_slice(&bytes)?;
        Ok(file.tasks)
    }
}

/// Keeps the last snapshot in memory. Useful in tests and for embedding
/// without a disk.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    tasks: Mutex<Vec<Task>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save_snapshot(&self, tasks: &[Task]) -> Result<(), SnapshotError> {
        *self.tasks.lock().await = tasks.to_vec();
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Vec<Task>, SnapshotError> {
        Ok(self.tasks.lock().await.clone())
    }
}
