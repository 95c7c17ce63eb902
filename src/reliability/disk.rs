use super::cache::{CacheError, CacheQueue, CacheRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const RECORD_EXT: &str = "cache";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub storage_path: PathBuf,
    /// Bytes.
    pub max_disk_usage: u64,
    #[serde(with = "crate::config::serde_helpers")]
    pub retention_period: Duration,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("/var/lib/dataway-writer/cache"),
            max_disk_usage: 1024 * 1024 * 1024,
            retention_period: Duration::from_secs(24 * 3600),
        }
    }
}

/// File-backed overflow queue: one file per cached record. Writes are
/// synchronous and bounded by `max_disk_usage`; draining the directory is
/// left to a separate replayer through `list`/`read`/`remove`.
pub struct DiskQueue {
    config: DiskConfig,
    current_usage: Mutex<u64>,
}

impl DiskQueue {
    pub fn new(config: DiskConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.storage_path)?;
        let current_usage = Self::calculate_disk_usage(&config.storage_path)?;

        Ok(Self {
            config,
            current_usage: Mutex::new(current_usage),
        })
    }

    pub fn current_disk_usage(&self) -> u64 {
        *self.current_usage.lock()
    }

    pub fn disk_usage_percentage(&self) -> f64 {
        (self.current_disk_usage() as f64 / self.config.max_disk_usage as f64) * 100.0
    }

    /// Stored record ids, oldest first.
    pub fn list(&self) -> Result<Vec<String>, CacheError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.config.storage_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                let modified = entry.metadata()?.modified()?;
                records.push((modified, id.to_string()));
            }
        }
        records.sort();
        Ok(records.into_iter().map(|(_, id)| id).collect())
    }

    pub fn read(&self, id: &str) -> Result<CacheRecord, CacheError> {
        let data = fs::read(self.record_path(id))?;
        CacheRecord::decode(&data)
    }

    pub fn remove(&self, id: &str) -> Result<(), CacheError> {
        let path = self.record_path(id);
        let size = fs::metadata(&path)?.len();
        fs::remove_file(&path)?;

        let mut usage = self.current_usage.lock();
        *usage = usage.saturating_sub(size);
        tracing::debug!("removed cached record {id}");
        Ok(())
    }

    /// Delete records older than the retention period. Returns how many were
    /// removed.
    pub fn cleanup_expired(&self) -> Result<u32, CacheError> {
        let now = SystemTime::now();
        let mut deleted = 0;

        for id in self.list()? {
            let modified = fs::metadata(self.record_path(&id))?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.config.retention_period && self.remove(&id).is_ok() {
                deleted += 1;
            }
        }

        if deleted > 0 {
            tracing::info!("cleaned up {deleted} expired cache records");
        }
        Ok(deleted)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.config.storage_path.join(format!("{id}.{RECORD_EXT}"))
    }

    fn calculate_disk_usage(path: &Path) -> Result<u64, CacheError> {
        let mut total = 0u64;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }
}

impl CacheQueue for DiskQueue {
    fn put(&self, record: &[u8]) -> Result<(), CacheError> {
        let size = record.len() as u64;

        // reserve before writing so concurrent puts cannot overshoot the cap
        {
            let mut usage = self.current_usage.lock();
            if *usage + size > self.config.max_disk_usage {
                return Err(CacheError::DiskSpaceExceeded);
            }
            *usage += size;
        }

        let id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = write_record(&self.record_path(&id), record) {
            let mut usage = self.current_usage.lock();
            *usage = usage.saturating_sub(size);
            return Err(e.into());
        }

        tracing::debug!("stored cache record {id} ({size} bytes)");
        Ok(())
    }
}

fn write_record(path: &Path, record: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(record)?;
    file.sync_all()
}
