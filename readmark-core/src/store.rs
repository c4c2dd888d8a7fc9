use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{ProgressError, Result};
use crate::record::ProgressRecord;

pub type ProgressMap = BTreeMap<String, ProgressRecord>;

/// Durable storage whose unit of access is a single blob.
pub trait BlobStore: Send + Sync {
    fn read(&self) -> Result<Option<String>>;
    fn write(&self, blob: &str) -> Result<()>;
}

pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, blob: &str) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(blob.as_bytes())?;
        file.sync_all()?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    inner: Mutex<Option<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Some(blob.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.inner.lock().clone()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().clone())
    }

    fn write(&self, blob: &str) -> Result<()> {
        *self.inner.lock() = Some(blob.to_owned());
        Ok(())
    }
}

/// Process-wide progress records with a read-through, write-through cache of the whole
/// mapping. Clones share the backend and the cache. Every call holds the cache lock for its
/// full duration, so durable reads and writes never interleave.
#[derive(Clone)]
pub struct ProgressStore {
    backend: Arc<dyn BlobStore>,
    cache: Arc<Mutex<Option<ProgressMap>>>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self {
            backend,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    /// Full mapping. Durable read failures degrade to an empty mapping and are retried on
    /// the next call.
    pub fn load(&self) -> ProgressMap {
        let mut cache = self.cache.lock();
        if let Err(err) = self.ensure_loaded(&mut cache) {
            warn!(error = %err, "failed to read stored progress");
            return ProgressMap::new();
        }
        cache.clone().unwrap_or_default()
    }

    pub fn get(&self, document_id: &str) -> Option<ProgressRecord> {
        let mut cache = self.cache.lock();
        if let Err(err) = self.ensure_loaded(&mut cache) {
            warn!(error = %err, document_id, "failed to read stored progress");
            return None;
        }
        cache.as_ref().and_then(|map| map.get(document_id).cloned())
    }

    /// Records ordered by most recent read first.
    pub fn records(&self) -> Vec<ProgressRecord> {
        let mut records: Vec<_> = self.load().into_values().collect();
        records.sort_by(|a, b| b.last_read_at.cmp(&a.last_read_at));
        records
    }

    pub fn put(&self, document_id: &str, record: ProgressRecord) -> bool {
        match self.try_put(document_id, record) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, document_id, "failed to persist progress");
                false
            }
        }
    }

    /// Replaces the record for `document_id` and writes the full mapping through. The cache
    /// keeps the new value even when the durable write fails.
    #[instrument(skip(self, record))]
    pub fn try_put(&self, document_id: &str, mut record: ProgressRecord) -> Result<()> {
        record.document_id = document_id.to_owned();
        let mut cache = self.cache.lock();
        if let Err(err) = self.ensure_loaded(&mut cache) {
            warn!(error = %err, "stored progress unreadable, starting from an empty mapping");
        }
        let map = cache.get_or_insert_with(ProgressMap::new);
        map.insert(document_id.to_owned(), record);
        let blob = serde_json::to_string_pretty(&*map)?;
        self.backend.write(&blob)?;
        debug!(entries = map.len(), "progress written through");
        Ok(())
    }

    pub fn remove(&self, document_id: &str) -> bool {
        let mut cache = self.cache.lock();
        let result = self.ensure_loaded(&mut cache).and_then(|()| {
            let map = cache.get_or_insert_with(ProgressMap::new);
            map.remove(document_id);
            let blob = serde_json::to_string_pretty(&*map)?;
            self.backend.write(&blob)
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, document_id, "failed to remove progress");
                false
            }
        }
    }

    /// Drops the cache so the next call re-reads durable storage.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn ensure_loaded(&self, cache: &mut Option<ProgressMap>) -> Result<()> {
        if cache.is_none() {
            *cache = Some(self.read_durable()?);
        }
        Ok(())
    }

    fn read_durable(&self) -> Result<ProgressMap> {
        let Some(blob) = self.backend.read()? else {
            return Ok(ProgressMap::new());
        };
        if blob.trim().is_empty() {
            return Ok(ProgressMap::new());
        }
        let mut map: ProgressMap = serde_json::from_str(&blob)?;
        for (id, record) in map.iter_mut() {
            record.document_id = id.clone();
        }
        debug!(entries = map.len(), "progress loaded from durable storage");
        Ok(map)
    }
}

/// The save effect the auto-save scheduler drives.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn persist(&self, document_id: &str, record: &ProgressRecord) -> Result<()>;
}

/// The durable write runs on the blocking pool, off the async workers.
#[async_trait]
impl ProgressSink for ProgressStore {
    async fn persist(&self, document_id: &str, record: &ProgressRecord) -> Result<()> {
        let store = self.clone();
        let id = document_id.to_owned();
        let mut record = record.clone();
        let written = tokio::task::spawn_blocking(move || {
            record.last_read_at = Utc::now();
            store.put(&id, record)
        })
        .await
        .map_err(|err| io::Error::new(ErrorKind::Other, err))?;
        if written {
            Ok(())
        } else {
            Err(ProgressError::Rejected {
                document_id: document_id.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tempfile::tempdir;

    #[derive(Default)]
    struct FlakyBlobStore {
        inner: MemoryBlobStore,
        reads: AtomicUsize,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl BlobStore for FlakyBlobStore {
        fn read(&self) -> Result<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "read failed").into());
            }
            self.inner.read()
        }

        fn write(&self, blob: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "write failed").into());
            }
            self.inner.write(blob)
        }
    }

    fn record(id: &str, chapter: usize) -> ProgressRecord {
        ProgressRecord::at_position(id, chapter, 10, 0.0, 0.0)
    }

    #[test]
    fn durable_storage_is_read_once() {
        let backend = Arc::new(FlakyBlobStore::default());
        let store = ProgressStore::new(backend.clone());
        assert!(store.load().is_empty());
        assert!(store.get("n1").is_none());
        store.load();
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_failure_yields_empty_mapping_and_retries_later() {
        let backend = Arc::new(FlakyBlobStore::default());
        backend.inner.write(r#"{"n1":{"chapterIndex":4}}"#).unwrap();
        backend.fail_reads.store(true, Ordering::SeqCst);
        let store = ProgressStore::new(backend.clone());

        assert!(store.load().is_empty());
        assert!(store.get("n1").is_none());

        backend.fail_reads.store(false, Ordering::SeqCst);
        assert_eq!(store.get("n1").unwrap().chapter_index, 4);
    }

    #[test]
    fn put_replaces_the_whole_record() {
        let store = ProgressStore::in_memory();
        let mut first = record("n1", 2);
        first.time_spent_seconds = 90;
        assert!(store.put("n1", first));
        assert!(store.put("n1", record("n1", 5)));

        let stored = store.get("n1").unwrap();
        assert_eq!(stored.chapter_index, 5);
        assert_eq!(stored.time_spent_seconds, 0);
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn put_keys_the_record_by_the_given_id() {
        let store = ProgressStore::in_memory();
        assert!(store.put("n2", record("something-else", 1)));
        assert_eq!(store.get("n2").unwrap().document_id, "n2");
    }

    #[test]
    fn failed_write_still_updates_cache() {
        let backend = Arc::new(FlakyBlobStore::default());
        let store = ProgressStore::new(backend.clone());
        assert!(store.put("n1", record("n1", 1)));

        backend.fail_writes.store(true, Ordering::SeqCst);
        assert!(!store.put("n1", record("n1", 6)));
        assert_eq!(store.get("n1").unwrap().chapter_index, 6);

        store.invalidate();
        assert_eq!(store.get("n1").unwrap().chapter_index, 1);
    }

    #[test]
    fn remove_deletes_from_cache_and_storage() {
        let backend = Arc::new(MemoryBlobStore::new());
        let store = ProgressStore::new(backend.clone());
        store.put("n1", record("n1", 1));
        store.put("n2", record("n2", 2));

        assert!(store.remove("n1"));
        assert!(store.get("n1").is_none());

        let reopened = ProgressStore::new(backend);
        assert!(reopened.get("n1").is_none());
        assert!(reopened.get("n2").is_some());
    }

    #[test]
    fn records_are_sorted_most_recent_first() {
        let store = ProgressStore::in_memory();
        let mut older = record("old", 1);
        older.last_read_at = Utc::now() - chrono::Duration::hours(3);
        store.put("old", older);
        store.put("new", record("new", 1));

        let ids: Vec<_> = store.records().into_iter().map(|r| r.document_id).collect();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("progress.json");
        let backend = Arc::new(FileBlobStore::new(path.clone()).unwrap());
        let store = ProgressStore::new(backend);
        let mut saved = ProgressRecord::at_position("n1", 3, 8, 120.0, 0.25);
        saved.time_spent_seconds = 42;
        assert!(store.put("n1", saved.clone()));

        let reopened = ProgressStore::new(Arc::new(FileBlobStore::new(path).unwrap()));
        let restored = reopened.get("n1").unwrap();
        assert_eq!(restored, saved);
    }

    #[test]
    fn corrupt_blob_degrades_to_no_progress() {
        let store = ProgressStore::new(Arc::new(MemoryBlobStore::with_blob("{not json")));
        assert!(store.load().is_empty());
        assert!(store.get("n1").is_none());
    }

    #[tokio::test]
    async fn sink_stamps_last_read_at() {
        let store = ProgressStore::in_memory();
        let mut stale = record("n1", 2);
        stale.last_read_at = Utc::now() - chrono::Duration::days(1);
        store.persist("n1", &stale).await.unwrap();

        let stored = store.get("n1").unwrap();
        assert!(stored.last_read_at > stale.last_read_at);
        assert_eq!(stored.chapter_index, 2);
    }

    #[tokio::test]
    async fn sink_reports_write_failures() {
        let backend = Arc::new(FlakyBlobStore::default());
        backend.fail_writes.store(true, Ordering::SeqCst);
        let store = ProgressStore::new(backend);
        let err = store.persist("n1", &record("n1", 1)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn clones_share_the_cache() {
        let backend = Arc::new(FlakyBlobStore::default());
        let store = ProgressStore::new(backend.clone());
        let shared = store.clone();

        shared.persist("n1", &record("n1", 3)).await.unwrap();
        assert_eq!(store.get("n1").unwrap().chapter_index, 3);
        assert_eq!(backend.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_store_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let backend = FileBlobStore::new(path.clone()).unwrap();
        backend.write("{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
