use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use viralforge_common::error::Result;
use viralforge_store::RefRewriter;

use crate::object_store::ObjectStore;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
/// Migrate until usage drops to this fraction of the threshold.
const TARGET_RATIO: f64 = 0.8;
const PRESIGN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default, Clone, Copy)]
pub struct LifecycleStats {
    pub migrated: usize,
    pub freed_bytes: u64,
    pub failed: usize,
    pub expired_deleted: usize,
}

#[derive(Debug, Clone)]
pub struct DiskFile {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: std::time::SystemTime,
}

/// Migrates rendered outputs from local disk to object storage under a
/// disk-pressure threshold, and garbage-collects the object store by
/// age. Runs as a daily periodic task under the scheduler's
/// single-flight guard.
pub struct StorageLifecycle {
    outputs_dir: PathBuf,
    threshold_bytes: u64,
    retention_days: i64,
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefRewriter>,
    public_base_url: String,
}

impl StorageLifecycle {
    pub fn new(
        outputs_dir: impl Into<PathBuf>,
        threshold_gb: f64,
        retention_days: i64,
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefRewriter>,
        public_base_url: &str,
    ) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
            threshold_bytes: (threshold_gb * GIB) as u64,
            retention_days,
            objects,
            refs,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Walk `outputs/` and migrate oldest files first until usage is at
    /// or below 80% of the threshold.
    pub async fn enforce_threshold(&self) -> Result<LifecycleStats> {
        let files = collect_files(&self.outputs_dir).await?;
        let total: u64 = files.iter().map(|f| f.size).sum();
        info!(
            total_gb = total as f64 / GIB,
            threshold_gb = self.threshold_bytes as f64 / GIB,
            files = files.len(),
            "Storage threshold check"
        );

        let mut stats = LifecycleStats::default();
        if total <= self.threshold_bytes {
            return Ok(stats);
        }

        let to_free = total - (self.threshold_bytes as f64 * TARGET_RATIO) as u64;
        for file in plan_migration(files, to_free) {
            match self.migrate(&file.path).await {
                Ok(()) => {
                    stats.migrated += 1;
                    stats.freed_bytes += file.size;
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(file = %file.path.display(), error = %e, "Migration failed, keeping local file");
                }
            }
        }
        info!(
            migrated = stats.migrated,
            freed_gb = stats.freed_bytes as f64 / GIB,
            failed = stats.failed,
            "Threshold migration complete"
        );
        Ok(stats)
    }

    /// Move one file to the object store. The local file is deleted only
    /// after every database reference has been rewritten to the object
    /// key; a failure at any earlier point leaves disk and database
    /// untouched.
    pub async fn migrate(&self, path: &Path) -> Result<()> {
        let key = basename(path);
        self.objects.put_file(&key, path).await?;

        let local_ref = path.display().to_string();
        if let Err(e) = self.refs.rewrite_refs(&local_ref, &key).await {
            // The reference rewrite rolled back; drop the orphan upload.
            if let Err(cleanup) = self.objects.delete(&key).await {
                warn!(key, error = %cleanup, "Orphan object cleanup failed");
            }
            return Err(e);
        }

        tokio::fs::remove_file(path)
            .await
            .map_err(|e| viralforge_common::ForgeError::Fatal(format!(
                "migrated file delete failed for {}: {e}",
                path.display()
            )))?;
        info!(key, "Migrated to object storage");
        Ok(())
    }

    /// Delete object-store keys older than the retention window.
    pub async fn apply_retention(&self, now: DateTime<Utc>) -> Result<LifecycleStats> {
        let cutoff = now - chrono::Duration::days(self.retention_days);
        let mut stats = LifecycleStats::default();
        for object in self.objects.list().await? {
            if object.last_modified < cutoff {
                match self.objects.delete(&object.key).await {
                    Ok(()) => {
                        stats.expired_deleted += 1;
                        info!(key = %object.key, "Expired object deleted");
                    }
                    Err(e) => {
                        stats.failed += 1;
                        warn!(key = %object.key, error = %e, "Retention delete failed");
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Resolve a stored reference (absolute local path or object key)
    /// to a servable URL.
    pub async fn resolve(&self, reference: &str) -> Result<String> {
        if Path::new(reference).is_absolute() {
            return Ok(format!(
                "{}/outputs/{}",
                self.public_base_url,
                basename(Path::new(reference))
            ));
        }
        self.objects.presign_get(reference, PRESIGN_TTL).await
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Oldest-mtime-first prefix of files whose combined size reaches
/// `to_free`.
pub fn plan_migration(mut files: Vec<DiskFile>, to_free: u64) -> Vec<DiskFile> {
    files.sort_by_key(|f| f.mtime);
    let mut planned = Vec::new();
    let mut freed = 0u64;
    for file in files {
        if freed >= to_free {
            break;
        }
        freed += file.size;
        planned.push(file);
    }
    planned
}

/// Non-symlink files under `dir`, recursively.
pub async fn collect_files(dir: &Path) -> Result<Vec<DiskFile>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| viralforge_common::ForgeError::Fatal(e.to_string()))?
        {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.is_symlink() {
                continue;
            }
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                files.push(DiskFile {
                    path: entry.path(),
                    size: meta.len(),
                    mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                });
            }
        }
    }
    Ok(files)
}
