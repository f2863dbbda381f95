//! Temp file store with TTL cleanup
//!
//! Holds function-generated artifacts (QR codes, fetched media) for later
//! retrieval via `/temp/:fileId`, with:
//! - Per-file and store-wide size limits (oldest files evicted when the
//!   total would overflow)
//! - Per-file TTL expiry, enforced on read and by a periodic sweep
//! - Orphan detection for disk files nothing is tracking
//! - Concurrent-safe operations

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::logging::targets;
use thiserror::Error;
use tokio::fs;
use tokio::sync::watch;
use uuid::Uuid;

/// Default maximum file size (50MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default maximum combined size of all stored files (500MB)
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 500 * 1024 * 1024;

/// Default TTL for stored files (1 hour)
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Default sweep interval (30 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 1800;

/// Default age after which an untracked disk file is treated as an orphan (2 hours)
pub const DEFAULT_ORPHAN_AGE_SECS: u64 = 7200;

/// Errors that can occur during temp store operations
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Metadata for a stored temp file
#[derive(Debug, Clone)]
pub struct TempFileMeta {
    /// Stable identifier used in retrieval URLs
    pub id: String,

    /// Path of the file on disk
    pub path: PathBuf,

    /// Client-facing filename (the disk name is always `{id}{ext}`)
    pub filename: String,

    /// MIME type of the content
    pub mime_type: String,

    /// File size in bytes
    pub size: u64,

    /// When the file was stored
    pub created_at: DateTime<Utc>,

    /// When the file becomes eligible for removal
    pub expires_at: DateTime<Utc>,

    /// How many times the file has been read
    pub access_count: u64,
}

impl TempFileMeta {
    /// Check whether this file has passed its expiry time.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Retrieval URL for this file, relative to the server root.
    pub fn url(&self) -> String {
        format!("/temp/{}", self.id)
    }
}

/// Configuration for the temp store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base directory for storing files
    pub base_dir: PathBuf,

    /// Maximum size of a single file in bytes
    pub max_file_size: u64,

    /// Maximum combined size of all tracked files in bytes
    pub max_total_size: u64,

    /// Default time-to-live for stored files
    pub ttl: Duration,

    /// Interval between sweep runs
    pub sweep_interval: Duration,

    /// Minimum age before an untracked disk file is removed as an orphan
    pub orphan_age: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("switchboard-temp"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            orphan_age: Duration::from_secs(DEFAULT_ORPHAN_AGE_SECS),
        }
    }
}

impl StoreConfig {
    pub fn with_base_dir(mut self, base_dir: PathBuf) -> Self {
        self.base_dir = base_dir;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_max_total_size(mut self, max_total_size: u64) -> Self {
        self.max_total_size = max_total_size;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_orphan_age(mut self, age: Duration) -> Self {
        self.orphan_age = age;
        self
    }
}

/// Per-create options; unset fields fall back to the store config.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub mime_type: Option<String>,
    pub ttl: Option<Duration>,
}

impl CreateOptions {
    pub fn mime(mime_type: impl Into<String>) -> Self {
        CreateOptions {
            mime_type: Some(mime_type.into()),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Result of a sweep run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Tracked entries removed because their TTL elapsed
    pub expired: usize,
    /// Untracked disk files removed
    pub orphans: usize,
}

/// Concurrent-safe temp file store.
///
/// Files are written under a single base directory as `{id}{ext}` and
/// tracked in memory. A file disappears in one of three ways: its TTL
/// elapses (caught on read or by [`TempStore::sweep`]), it is evicted to
/// make room under the total-size cap, or it is deleted explicitly. In all
/// cases a later read reports [`StoreError::NotFound`].
pub struct TempStore {
    config: StoreConfig,
    /// Map of file ID to metadata
    entries: Arc<RwLock<HashMap<String, TempFileMeta>>>,
}

impl TempStore {
    /// Create a new store rooted at `config.base_dir`.
    ///
    /// Creates the directory if needed, adopts any files already present
    /// (so restarts do not leak disk space), and removes entries that are
    /// already expired.
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create base directory: {}", e)))?;

        let store = Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        };

        store.load_existing_entries().await?;
        let _ = store.sweep().await?;

        Ok(store)
    }

    /// Store bytes under a fresh ID and return the file's metadata.
    pub async fn create(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: CreateOptions,
    ) -> Result<TempFileMeta, StoreError> {
        let size = bytes.len() as u64;

        if size > self.config.max_file_size {
            return Err(StoreError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }
        // A file larger than the whole store can never fit, even after
        // evicting everything else.
        if size > self.config.max_total_size {
            return Err(StoreError::FileTooLarge {
                size,
                max: self.config.max_total_size,
            });
        }

        let id = Uuid::new_v4().to_string();
        let mime_type = options
            .mime_type
            .unwrap_or_else(|| mime_for_filename(filename).to_string());
        let disk_name = format!("{}{}", id, extension_for(filename, &mime_type));
        let path = self.config.base_dir.join(&disk_name);

        let now = Utc::now();
        let ttl = options.ttl.unwrap_or(self.config.ttl);
        let meta = TempFileMeta {
            id: id.clone(),
            path: path.clone(),
            filename: filename.to_string(),
            mime_type,
            size,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_TTL_SECS as i64)),
            access_count: 0,
        };

        // Evict and reserve inside one lock section; concurrent creates
        // must never jointly overshoot the total cap.
        let victims = {
            let mut entries = self.entries.write();
            let victims = self.evict_locked(&mut entries, size);
            entries.insert(id.clone(), meta.clone());
            victims
        };
        for (victim_id, victim_path) in victims {
            tracing::info!(target: targets::STORAGE, file_id = %victim_id, "Evicted temp file to stay under size cap");
            remove_file_logged(&victim_path).await;
        }

        if let Err(e) = fs::write(&path, &bytes).await {
            self.entries.write().remove(&id);
            return Err(StoreError::Io(format!("Failed to write file: {}", e)));
        }

        // A concurrent create may have evicted the reservation while the
        // bytes were in flight; the create still succeeded, but the file is
        // gone and must not linger on disk untracked.
        if !self.entries.read().contains_key(&id) {
            remove_file_logged(&path).await;
            return Ok(meta);
        }

        tracing::debug!(
            target: targets::STORAGE,
            file_id = %id,
            path = %path.display(),
            size = size,
            "Stored temp file"
        );

        Ok(meta)
    }

    /// Read a file's bytes and metadata, bumping its access count.
    ///
    /// An expired entry is removed on the spot and reported as not found,
    /// so readers never observe a file past its TTL even between sweeps.
    pub async fn read(&self, file_id: &str) -> Result<(Vec<u8>, TempFileMeta), StoreError> {
        let lookup = {
            let mut entries = self.entries.write();
            match entries.get(file_id).map(|m| m.is_expired()) {
                None => None,
                Some(true) => entries.remove(file_id).map(|meta| (meta, true)),
                Some(false) => entries
                    .get_mut(file_id)
                    .map(|meta| {
                        meta.access_count += 1;
                        meta.clone()
                    })
                    .map(|meta| (meta, false)),
            }
        };

        let (meta, expired) = match lookup {
            Some(pair) => pair,
            None => return Err(StoreError::NotFound(file_id.to_string())),
        };

        if expired {
            remove_file_logged(&meta.path).await;
            return Err(StoreError::NotFound(file_id.to_string()));
        }

        match fs::read(&meta.path).await {
            Ok(bytes) => Ok((bytes, meta)),
            Err(_) => {
                // File vanished from disk (external cleanup); drop the entry.
                self.entries.write().remove(file_id);
                Err(StoreError::NotFound(file_id.to_string()))
            }
        }
    }

    /// Get metadata without touching the access count.
    pub fn metadata(&self, file_id: &str) -> Option<TempFileMeta> {
        let entries = self.entries.read();
        entries
            .get(file_id)
            .filter(|meta| !meta.is_expired())
            .cloned()
    }

    /// Remove a file. Returns `false` if the ID was not tracked.
    pub async fn delete(&self, file_id: &str) -> Result<bool, StoreError> {
        let meta = self.entries.write().remove(file_id);

        if let Some(meta) = meta {
            if meta.path.exists() {
                fs::remove_file(&meta.path)
                    .await
                    .map_err(|e| StoreError::Io(format!("Failed to remove file: {}", e)))?;
            }
            tracing::debug!(target: targets::STORAGE, file_id = %file_id, "Removed temp file");
            return Ok(true);
        }

        Ok(false)
    }

    /// Remove expired entries and orphaned disk files.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let expired: Vec<(String, PathBuf)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, meta)| meta.is_expired())
                .map(|(id, meta)| (id.clone(), meta.path.clone()))
                .collect()
        };

        let mut report = SweepReport {
            expired: expired.len(),
            orphans: 0,
        };

        for (id, path) in expired {
            self.entries.write().remove(&id);
            remove_file_logged(&path).await;
        }

        report.orphans = self.remove_orphans().await?;

        if report.expired > 0 || report.orphans > 0 {
            tracing::info!(
                target: targets::STORAGE,
                expired = report.expired,
                orphans = report.orphans,
                "Swept temp store"
            );
        }

        Ok(report)
    }

    /// Delete disk files in the base directory that no entry tracks and
    /// whose modification time is older than the orphan age.
    async fn remove_orphans(&self) -> Result<usize, StoreError> {
        let mut dir = fs::read_dir(&self.config.base_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read base directory: {}", e)))?;

        let mut removed = 0usize;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if self.entries.read().contains_key(&stem) {
                continue;
            }

            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .unwrap_or_default();
            if age >= self.config.orphan_age {
                if let Err(e) = fs::remove_file(&path).await {
                    tracing::warn!(target: targets::STORAGE, path = %path.display(), error = %e, "Failed to remove orphan file");
                } else {
                    tracing::debug!(target: targets::STORAGE, path = %path.display(), "Removed orphan file");
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// Evict oldest entries until `incoming` more bytes fit under the total
    /// cap. Runs against an already-locked map; returns the victims so the
    /// caller can remove their disk files after dropping the lock.
    fn evict_locked(
        &self,
        entries: &mut HashMap<String, TempFileMeta>,
        incoming: u64,
    ) -> Vec<(String, PathBuf)> {
        let mut total: u64 = entries.values().map(|m| m.size).sum();
        let mut victims = Vec::new();

        while total + incoming > self.config.max_total_size && !entries.is_empty() {
            let oldest = entries
                .iter()
                .min_by_key(|(_, meta)| meta.created_at)
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else { break };
            if let Some(meta) = entries.remove(&id) {
                total -= meta.size;
                victims.push((id, meta.path));
            }
        }
        victims
    }

    /// Number of tracked files.
    pub fn file_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Combined size of tracked files in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries.read().values().map(|m| m.size).sum()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Snapshot of all tracked files.
    pub fn list(&self) -> Vec<TempFileMeta> {
        self.entries.read().values().cloned().collect()
    }

    /// Start the periodic sweep task.
    ///
    /// Runs until the shutdown channel flips to `true`.
    pub fn start_sweep_task(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!(target: targets::STORAGE, error = %e, "Temp store sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Adopt files already present in the base directory.
    ///
    /// Restarted servers pick up previously stored files with their mtime
    /// as the creation time, so the normal TTL accounting applies to them.
    async fn load_existing_entries(&self) -> Result<(), StoreError> {
        let mut dir = fs::read_dir(&self.config.base_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read base directory: {}", e)))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();

            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(e) => {
                    tracing::warn!(target: targets::STORAGE, path = %path.display(), error = %e, "Failed to read file type");
                    continue;
                }
            };
            if file_type.is_dir() {
                continue;
            }

            let disk_meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(target: targets::STORAGE, path = %path.display(), error = %e, "Failed to read file metadata");
                    continue;
                }
            };

            let created_at = disk_meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let id = path
                .file_stem()
                .or_else(|| path.file_name())
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let filename = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| id.clone());

            let meta = TempFileMeta {
                id: id.clone(),
                path: path.clone(),
                mime_type: mime_for_filename(&filename).to_string(),
                filename,
                size: disk_meta.len(),
                created_at,
                expires_at: created_at
                    + chrono::Duration::from_std(self.config.ttl)
                        .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_TTL_SECS as i64)),
                access_count: 0,
            };

            self.entries.write().insert(id, meta);
        }

        Ok(())
    }
}

async fn remove_file_logged(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path).await {
            tracing::warn!(target: targets::STORAGE, path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

/// Pick a disk extension: the original filename's extension when it looks
/// sane, otherwise one derived from the MIME type.
fn extension_for(filename: &str, mime_type: &str) -> String {
    if let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) {
        if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return format!(".{}", ext.to_ascii_lowercase());
        }
    }
    mime_type_to_extension(mime_type).to_string()
}

/// Convert a MIME type to a file extension.
fn mime_type_to_extension(mime_type: &str) -> &'static str {
    let subtype = mime_type.split('/').nth(1).unwrap_or("");
    let subtype = subtype.split(';').next().unwrap_or("").trim();

    match subtype {
        "jpeg" | "jpg" => ".jpg",
        "png" => ".png",
        "gif" => ".gif",
        "webp" => ".webp",
        "svg+xml" => ".svg",
        "json" => ".json",
        "plain" => ".txt",
        "html" => ".html",
        "csv" => ".csv",
        "pdf" => ".pdf",
        "zip" => ".zip",
        "mpeg" => ".mp3",
        "mp4" => ".mp4",
        _ => ".bin",
    }
}

/// Guess a MIME type from a filename extension.
fn mime_for_filename(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "json" => "application/json",
        "txt" => "text/plain",
        "html" => "text/html",
        "csv" => "text/csv",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_store() -> (TempStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default().with_base_dir(dir.path().to_path_buf());
        let store = TempStore::new(config).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (store, _dir) = create_test_store().await;

        let meta = store
            .create(b"hello world".to_vec(), "hello.txt", CreateOptions::default())
            .await
            .unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(meta.mime_type, "text/plain");
        assert_eq!(meta.filename, "hello.txt");
        assert_eq!(meta.access_count, 0);

        let (bytes, read_meta) = store.read(&meta.id).await.unwrap();
        assert_eq!(bytes, b"hello world");
        assert_eq!(read_meta.access_count, 1);

        let (_, read_meta) = store.read(&meta.id).await.unwrap();
        assert_eq!(read_meta.access_count, 2);
    }

    #[tokio::test]
    async fn test_explicit_mime_overrides_filename() {
        let (store, _dir) = create_test_store().await;

        let meta = store
            .create(vec![1, 2, 3], "payload", CreateOptions::mime("image/png"))
            .await
            .unwrap();
        assert_eq!(meta.mime_type, "image/png");
        assert!(meta.path.to_string_lossy().ends_with(".png"));
    }

    #[tokio::test]
    async fn test_file_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default()
            .with_base_dir(dir.path().to_path_buf())
            .with_max_file_size(10);
        let store = TempStore::new(config).await.unwrap();

        let result = store
            .create(vec![0u8; 11], "big.bin", CreateOptions::default())
            .await;
        assert!(matches!(
            result,
            Err(StoreError::FileTooLarge { size: 11, max: 10 })
        ));
        assert_eq!(store.file_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_then_read_not_found() {
        let (store, _dir) = create_test_store().await;

        let meta = store
            .create(b"bytes".to_vec(), "f.bin", CreateOptions::default())
            .await
            .unwrap();
        assert!(store.delete(&meta.id).await.unwrap());
        assert!(!meta.path.exists());

        assert!(matches!(
            store.read(&meta.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.delete(&meta.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_file_not_found_on_read() {
        let (store, _dir) = create_test_store().await;

        let meta = store
            .create(
                b"short lived".to_vec(),
                "s.txt",
                CreateOptions::default().with_ttl(Duration::from_millis(30)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(matches!(
            store.read(&meta.id).await,
            Err(StoreError::NotFound(_))
        ));
        // The expired read also removed the disk file.
        assert!(!meta.path.exists());
        assert_eq!(store.file_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_keeps_fresh() {
        let (store, _dir) = create_test_store().await;

        let old = store
            .create(
                b"old".to_vec(),
                "old.txt",
                CreateOptions::default().with_ttl(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        let fresh = store
            .create(b"fresh".to_vec(), "fresh.txt", CreateOptions::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        let report = store.sweep().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(store.file_count(), 1);
        assert!(!old.path.exists());
        assert!(fresh.path.exists());
    }

    #[tokio::test]
    async fn test_total_cap_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default()
            .with_base_dir(dir.path().to_path_buf())
            .with_max_file_size(60)
            .with_max_total_size(100);
        let store = TempStore::new(config).await.unwrap();

        let first = store
            .create(vec![1u8; 40], "a.bin", CreateOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store
            .create(vec![2u8; 40], "b.bin", CreateOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = store
            .create(vec![3u8; 40], "c.bin", CreateOptions::default())
            .await
            .unwrap();

        // 40 + 40 + 40 > 100, so the oldest file must have been evicted.
        assert_eq!(store.file_count(), 2);
        assert_eq!(store.total_size(), 80);
        assert!(matches!(
            store.read(&first.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.read(&second.id).await.is_ok());
        assert!(store.read(&third.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_for_whole_store_rejected_without_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default()
            .with_base_dir(dir.path().to_path_buf())
            .with_max_file_size(200)
            .with_max_total_size(100);
        let store = TempStore::new(config).await.unwrap();

        let kept = store
            .create(vec![0u8; 50], "keep.bin", CreateOptions::default())
            .await
            .unwrap();

        let result = store
            .create(vec![0u8; 150], "huge.bin", CreateOptions::default())
            .await;
        assert!(matches!(result, Err(StoreError::FileTooLarge { .. })));
        // The rejected create must not have evicted anything.
        assert!(store.read(&kept.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_total_cap_holds_under_concurrent_creates() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default()
            .with_base_dir(dir.path().to_path_buf())
            .with_max_file_size(60)
            .with_max_total_size(100);
        let store = Arc::new(TempStore::new(config).await.unwrap());

        // Two creates that individually fit but jointly overshoot the cap.
        let (first, second) = tokio::join!(
            store.create(vec![1u8; 60], "a.bin", CreateOptions::default()),
            store.create(vec![2u8; 60], "b.bin", CreateOptions::default()),
        );
        first.unwrap();
        second.unwrap();

        assert!(
            store.total_size() <= 100,
            "tracked {} bytes across {} files",
            store.total_size(),
            store.file_count()
        );
        assert_eq!(store.file_count(), 1);

        // Disk agrees with the index: the losing file was cleaned up.
        let on_disk = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(on_disk, store.file_count());
    }

    #[tokio::test]
    async fn test_load_existing_entries_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leftover.txt"), b"from before").unwrap();

        let config = StoreConfig::default().with_base_dir(dir.path().to_path_buf());
        let store = TempStore::new(config).await.unwrap();

        assert_eq!(store.file_count(), 1);
        let (bytes, meta) = store.read("leftover").await.unwrap();
        assert_eq!(bytes, b"from before");
        assert_eq!(meta.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn test_sweep_removes_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default()
            .with_base_dir(dir.path().to_path_buf())
            .with_orphan_age(Duration::ZERO);
        let store = TempStore::new(config).await.unwrap();

        // A file dropped into the directory after startup, tracked by nothing.
        let stray = dir.path().join("stray.bin");
        std::fs::write(&stray, b"stray").unwrap();

        let report = store.sweep().await.unwrap();
        assert_eq!(report.orphans, 1);
        assert!(!stray.exists());
    }

    #[tokio::test]
    async fn test_file_count_and_total_size() {
        let (store, _dir) = create_test_store().await;

        store
            .create(vec![0u8; 10], "a.bin", CreateOptions::default())
            .await
            .unwrap();
        store
            .create(vec![0u8; 20], "b.bin", CreateOptions::default())
            .await
            .unwrap();

        assert_eq!(store.file_count(), 2);
        assert_eq!(store.total_size(), 30);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(mime_type_to_extension("image/png"), ".png");
        assert_eq!(mime_type_to_extension("image/jpeg; charset=utf-8"), ".jpg");
        assert_eq!(mime_type_to_extension("application/x-unknown"), ".bin");
        assert_eq!(extension_for("photo.JPG", "application/octet-stream"), ".jpg");
        assert_eq!(extension_for("no-extension", "image/png"), ".png");
        assert_eq!(extension_for("weird.!!", "application/json"), ".json");
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::default()
            .with_max_file_size(123)
            .with_max_total_size(456)
            .with_ttl(Duration::from_secs(7))
            .with_sweep_interval(Duration::from_secs(8))
            .with_orphan_age(Duration::from_secs(9));
        assert_eq!(config.max_file_size, 123);
        assert_eq!(config.max_total_size, 456);
        assert_eq!(config.ttl, Duration::from_secs(7));
        assert_eq!(config.sweep_interval, Duration::from_secs(8));
        assert_eq!(config.orphan_age, Duration::from_secs(9));
    }
}
