//! Persistence for execution records.
//!
//! The file store keeps one pretty-printed JSON document per plan and
//! network. Every save replaces the whole file through a temporary sibling
//! and a rename, so a crash leaves either the old or the new record.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ExecutionRecord, RECORD_VERSION};

/// Load and save the execution record of one plan run
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The stored record, if any
    async fn load(&self) -> Result<Option<ExecutionRecord>>;

    /// Replace the stored record
    async fn save(&self, record: &ExecutionRecord) -> Result<()>;
}

/// JSON file record store
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

/// Exclusive lock on a record file, released on drop
#[derive(Debug)]
pub struct RecordLock {
    file: File,
    path: PathBuf,
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "Failed to release record lock");
        }
    }
}

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Path of the lock file guarding this record
    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    /// Take an exclusive lock for the duration of a run.
    ///
    /// Fails immediately if another process holds the lock.
    pub fn lock(&self) -> Result<RecordLock> {
        let path = self.lock_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create record directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "Execution record {} is locked by another run",
                self.path.display()
            )
        })?;

        Ok(RecordLock { file, path })
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn load(&self) -> Result<Option<ExecutionRecord>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read execution record: {}", self.path.display()))?;

        let record: ExecutionRecord = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse execution record: {}", self.path.display()))?;

        if record.version > RECORD_VERSION {
            anyhow::bail!(
                "Execution record {} has version {}, newest supported is {}",
                self.path.display(),
                record.version,
                RECORD_VERSION
            );
        }

        Ok(Some(record))
    }

    async fn save(&self, record: &ExecutionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create record directory: {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(record).context("Failed to serialize execution record")?;
        let tmp = self.sibling(".tmp");

        let mut file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(json.as_bytes())
            .await
            .context("Failed to write execution record")?;
        file.write_all(b"\n").await.context("Failed to write execution record")?;
        file.sync_all().await.context("Failed to sync execution record")?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace execution record: {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Execution record saved");
        Ok(())
    }
}

/// In-process record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    record: Mutex<Option<ExecutionRecord>>,
    saves: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current record
    pub async fn snapshot(&self) -> Option<ExecutionRecord> {
        self.record.lock().await.clone()
    }

    /// Number of saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self) -> Result<Option<ExecutionRecord>> {
        Ok(self.record.lock().await.clone())
    }

    async fn save(&self, record: &ExecutionRecord) -> Result<()> {
        *self.record.lock().await = Some(record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
