//! Journaled, crash-safe persistent cache for raw image payloads.
//!
//! An in-memory index (key -> file descriptor) is mirrored to an
//! append-only journal. Writes are queued onto a single-consumer background
//! worker so callers never block on disk I/O; duplicate keys already queued
//! or present are skipped. Entries past their TTL are misses on access and
//! deleted lazily. Every I/O failure is logged and degrades to a cache
//! miss - the disk cache never fails a load.

mod journal;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use journal::{Journal, JournalRecord};

/// Content file extension within the cache directory.
const CONTENT_EXTENSION: &str = "img";

/// Journal compaction floor: never compact below this many records.
const COMPACT_MIN_RECORDS: u64 = 512;

/// Compact once the journal holds this many times the live entry count.
const COMPACT_GROWTH_FACTOR: u64 = 4;

/// One entry in the disk cache index.
#[derive(Debug, Clone)]
struct DiskEntry {
    file_name: String,
    size: u64,
    created: u64,
    ttl: Duration,
    /// Age order within equal `created` seconds; rebuilt from replay order,
    /// not persisted.
    seq: u64,
}

impl DiskEntry {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.created.saturating_add(self.ttl.as_secs())
    }
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, DiskEntry>,
    total_size: u64,
    next_seq: u64,
}

impl Index {
    fn insert(&mut self, key: String, mut entry: DiskEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        if let Some(previous) = self.entries.insert(key, entry.clone()) {
            self.total_size -= previous.size;
        }
        self.total_size += entry.size;
    }

    fn remove(&mut self, key: &str) -> Option<DiskEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.size;
        Some(entry)
    }

    /// The oldest entry by (created, seq), the eviction candidate.
    fn oldest(&self) -> Option<(String, DiskEntry)> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| (entry.created, entry.seq))
            .map(|(key, entry)| (key.clone(), entry.clone()))
    }

    /// Live records sorted by age, for journal compaction.
    fn live_records(&self) -> Vec<JournalRecord> {
        let mut entries: Vec<(&String, &DiskEntry)> = self.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| (entry.created, entry.seq));
        entries
            .into_iter()
            .map(|(key, entry)| JournalRecord::Insert {
                key: key.clone(),
                file: entry.file_name.clone(),
                size: entry.size,
                created: entry.created,
                ttl_secs: entry.ttl.as_secs(),
            })
            .collect()
    }
}

enum WriteCommand {
    Put { key: String, bytes: Bytes, ttl: Duration },
    Remove { key: String, file_name: String },
    Clear,
    Flush { ack: oneshot::Sender<()> },
}

/// Journaled, crash-safe persistent LRU cache.
pub struct DiskCache {
    root: PathBuf,
    index: Arc<Mutex<Index>>,
    queued: Arc<Mutex<HashSet<String>>>,
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl DiskCache {
    /// Opens (creating if needed) a disk cache rooted at `root`, bounded to
    /// `max_size` bytes.
    ///
    /// Recovery replays the journal, discards a torn trailing record,
    /// drops entries whose content file is missing, sweeps expired entries
    /// and orphan files, and compacts the journal when anything was dirty.
    ///
    /// # Errors
    /// Returns an error when the cache directory or journal cannot be
    /// created. Recoverable inconsistencies never fail the open.
    pub async fn new(root: PathBuf, max_size: u64) -> std::io::Result<Self> {
        fs::create_dir_all(&root).await?;

        let (mut journal, replay) = Journal::open(root.join("journal.jsonl")).await?;
        let mut dirty = !replay.clean;

        let mut index = Index::default();
        for record in replay.records {
            match record {
                JournalRecord::Insert { key, file, size, created, ttl_secs } => {
                    index.insert(key, DiskEntry {
                        file_name: file,
                        size,
                        created,
                        ttl: Duration::from_secs(ttl_secs),
                        seq: 0,
                    });
                }
                JournalRecord::Remove { key } => {
                    index.remove(&key);
                }
            }
        }

        // Drop entries whose content file vanished or whose TTL lapsed.
        let now = now_secs();
        let stale: Vec<(String, DiskEntry)> = {
            let mut stale = Vec::new();
            for (key, entry) in &index.entries {
                let missing = fs::metadata(root.join(&entry.file_name)).await.is_err();
                if missing || entry.is_expired(now) {
                    stale.push((key.clone(), entry.clone()));
                }
            }
            stale
        };
        for (key, entry) in stale {
            index.remove(&key);
            let _ = fs::remove_file(root.join(&entry.file_name)).await;
            dirty = true;
        }

        // Files with no index entry are leftovers from a crash between the
        // content write and the journal append.
        if let Ok(mut dir) = fs::read_dir(&root).await {
            let referenced: HashSet<String> =
                index.entries.values().map(|e| e.file_name.clone()).collect();
            while let Ok(Some(dir_entry)) = dir.next_entry().await {
                let path = dir_entry.path();
                if path.extension().is_some_and(|ext| ext == CONTENT_EXTENSION)
                    && let Some(name) = path.file_name().and_then(|n| n.to_str())
                    && !referenced.contains(name)
                {
                    debug!(file = %name, "removing orphan cache file");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }

        // Shrink to budget before serving anything.
        while index.total_size > max_size {
            let Some((key, entry)) = index.oldest() else { break };
            index.remove(&key);
            let _ = fs::remove_file(root.join(&entry.file_name)).await;
            dirty = true;
        }

        if dirty && let Err(err) = journal.compact(&index.live_records()).await {
            warn!(error = %err, "journal compaction failed during recovery");
        }

        let index = Arc::new(Mutex::new(index));
        let queued = Arc::new(Mutex::new(HashSet::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        let writer = Writer {
            root: root.clone(),
            max_size,
            index: index.clone(),
            queued: queued.clone(),
            journal,
            rx,
        };
        tokio::spawn(writer.run());

        Ok(Self { root, index, queued, tx })
    }

    /// Queues `bytes` for persistence under `key` unless the key is already
    /// present or already queued. Returns immediately; the background
    /// worker performs the write.
    #[allow(clippy::unused_async)]
    pub async fn add_to_saving_queue_if_not_exists(&self, key: &str, bytes: Bytes, ttl: Duration) {
        if key.is_empty() {
            return;
        }
        let now = now_secs();
        {
            let index = self.index.lock();
            if index
                .entries
                .get(key)
                .is_some_and(|entry| !entry.is_expired(now))
            {
                trace!(key = %key, "already on disk, skipping save");
                return;
            }
        }
        {
            let mut queued = self.queued.lock();
            if !queued.insert(key.to_string()) {
                trace!(key = %key, "already queued for saving, skipping");
                return;
            }
        }
        let _ = self.tx.send(WriteCommand::Put {
            key: key.to_string(),
            bytes,
            ttl,
        });
    }

    /// Returns true when a non-expired entry for `key` exists.
    #[allow(clippy::unused_async)]
    pub async fn exists(&self, key: &str) -> bool {
        self.live_entry(key).is_some()
    }

    /// The content file path for a non-expired entry.
    #[allow(clippy::unused_async)]
    pub async fn file_path(&self, key: &str) -> Option<PathBuf> {
        self.live_entry(key).map(|entry| self.root.join(entry.file_name))
    }

    /// Opens the content file for reading. I/O failures degrade to a miss.
    pub async fn try_get_stream(&self, key: &str) -> Option<fs::File> {
        let entry = self.live_entry(key)?;
        match fs::File::open(self.root.join(&entry.file_name)).await {
            Ok(file) => {
                trace!(key = %key, "disk cache hit");
                Some(file)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "disk cache entry unreadable, treating as miss");
                self.discard(key, &entry.file_name);
                None
            }
        }
    }

    /// Reads the full payload for a non-expired entry. I/O failures degrade
    /// to a miss.
    pub async fn get_bytes(&self, key: &str) -> Option<Bytes> {
        let entry = self.live_entry(key)?;
        match fs::read(self.root.join(&entry.file_name)).await {
            Ok(bytes) => {
                trace!(key = %key, size = bytes.len(), "disk cache hit");
                Some(Bytes::from(bytes))
            }
            Err(err) => {
                warn!(key = %key, error = %err, "disk cache entry unreadable, treating as miss");
                self.discard(key, &entry.file_name);
                None
            }
        }
    }

    /// Removes the entry for `key`. The index drops it immediately; file
    /// deletion happens on the background worker.
    #[allow(clippy::unused_async)]
    pub async fn remove(&self, key: &str) {
        self.queued.lock().remove(key);
        let removed = self.index.lock().remove(key);
        if let Some(entry) = removed {
            self.discard(key, &entry.file_name);
        } else {
            // A queued-but-unwritten entry may still land; make sure the
            // removal is journaled after it.
            self.discard(key, &file_name_for(key));
        }
    }

    /// Drops every entry and content file.
    #[allow(clippy::unused_async)]
    pub async fn clear(&self) {
        self.queued.lock().clear();
        {
            let mut index = self.index.lock();
            index.entries.clear();
            index.total_size = 0;
        }
        let _ = self.tx.send(WriteCommand::Clear);
        debug!("cleared disk cache");
    }

    /// Waits until the background worker has drained every queued command.
    /// Useful at shutdown and in tests.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriteCommand::Flush { ack }).is_ok() {
            let _ = done.await;
        }
    }

    /// Number of live (possibly expired, not yet swept) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    /// True when the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total content bytes accounted in the index.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.index.lock().total_size
    }

    /// Looks up `key`, lazily discarding an expired entry.
    fn live_entry(&self, key: &str) -> Option<DiskEntry> {
        let entry = self.index.lock().entries.get(key).cloned()?;
        if entry.is_expired(now_secs()) {
            trace!(key = %key, "disk cache entry expired");
            self.index.lock().remove(key);
            self.discard(key, &entry.file_name);
            return None;
        }
        Some(entry)
    }

    fn discard(&self, key: &str, file_name: &str) {
        let _ = self.tx.send(WriteCommand::Remove {
            key: key.to_string(),
            file_name: file_name.to_string(),
        });
    }
}

/// Deterministic content file name for a cache key.
fn file_name_for(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    format!("{}.{CONTENT_EXTENSION}", hex::encode(&digest[..16]))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Single-consumer background worker owning the journal.
struct Writer {
    root: PathBuf,
    max_size: u64,
    index: Arc<Mutex<Index>>,
    queued: Arc<Mutex<HashSet<String>>>,
    journal: Journal,
    rx: mpsc::UnboundedReceiver<WriteCommand>,
}

impl Writer {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                WriteCommand::Put { key, bytes, ttl } => {
                    self.put(&key, &bytes, ttl).await;
                    self.queued.lock().remove(&key);
                }
                WriteCommand::Remove { key, file_name } => {
                    self.remove(&key, &file_name).await;
                }
                WriteCommand::Clear => {
                    self.clear_files().await;
                }
                WriteCommand::Flush { ack } => {
                    let _ = ack.send(());
                }
            }
            self.maybe_compact().await;
        }
    }

    async fn put(&mut self, key: &str, bytes: &Bytes, ttl: Duration) {
        let file_name = file_name_for(key);
        let path = self.root.join(&file_name);

        let write = async {
            let mut file = fs::File::create(&path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        if let Err(err) = write.await {
            warn!(key = %key, error = %err, "failed to write cache file");
            let _ = fs::remove_file(&path).await;
            return;
        }

        let entry = DiskEntry {
            file_name: file_name.clone(),
            size: bytes.len() as u64,
            created: now_secs(),
            ttl,
            seq: 0,
        };
        self.index.lock().insert(key.to_string(), entry.clone());

        // Journal after the content file is durably in place: recovery
        // treats an unjournaled file as an orphan, never the reverse.
        let record = JournalRecord::Insert {
            key: key.to_string(),
            file: file_name,
            size: entry.size,
            created: entry.created,
            ttl_secs: ttl.as_secs(),
        };
        if let Err(err) = self.journal.append(&record).await {
            warn!(key = %key, error = %err, "failed to journal cache insert");
        }
        debug!(key = %key, size = entry.size, "stored in disk cache");

        self.evict_if_needed().await;
    }

    async fn remove(&mut self, key: &str, file_name: &str) {
        // A Put for the same key may have been queued before this removal
        // and landed in the index already; drop it again so the removal
        // wins regardless of command interleaving.
        self.index.lock().remove(key);
        let _ = fs::remove_file(self.root.join(file_name)).await;
        let record = JournalRecord::Remove { key: key.to_string() };
        if let Err(err) = self.journal.append(&record).await {
            warn!(key = %key, error = %err, "failed to journal cache removal");
        }
    }

    async fn clear_files(&mut self) {
        // Same interleaving concern as remove(): a Put queued before the
        // clear may have re-populated the index.
        {
            let mut index = self.index.lock();
            index.entries.clear();
            index.total_size = 0;
        }
        if let Ok(mut dir) = fs::read_dir(&self.root).await {
            while let Ok(Some(entry)) = dir.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == CONTENT_EXTENSION) {
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
        if let Err(err) = self.journal.compact(&[]).await {
            warn!(error = %err, "failed to compact journal after clear");
        }
    }

    async fn evict_if_needed(&mut self) {
        loop {
            let victim = {
                let index = self.index.lock();
                if index.total_size <= self.max_size {
                    return;
                }
                index.oldest()
            };
            let Some((key, entry)) = victim else { return };
            self.index.lock().remove(&key);
            let _ = fs::remove_file(self.root.join(&entry.file_name)).await;
            let record = JournalRecord::Remove { key: key.clone() };
            if let Err(err) = self.journal.append(&record).await {
                warn!(key = %key, error = %err, "failed to journal eviction");
            }
            debug!(key = %key, size = entry.size, "evicted from disk cache");
        }
    }

    async fn maybe_compact(&mut self) {
        let live = self.index.lock().entries.len() as u64;
        let threshold = COMPACT_MIN_RECORDS.max(live * COMPACT_GROWTH_FACTOR);
        if self.journal.record_count() <= threshold {
            return;
        }
        let records = self.index.lock().live_records();
        if let Err(err) = self.journal.compact(&records).await {
            warn!(error = %err, "journal compaction failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;
    const TTL: Duration = Duration::from_secs(3600);

    async fn create_cache(dir: &TempDir, max_size: u64) -> DiskCache {
        DiskCache::new(dir.path().to_path_buf(), max_size)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_queue_write_and_read() {
        let dir = TempDir::new().unwrap();
        let cache = create_cache(&dir, MB).await;

        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"payload"), TTL)
            .await;
        cache.flush().await;

        assert!(cache.exists("k1").await);
        assert_eq!(cache.get_bytes("k1").await.unwrap(), Bytes::from_static(b"payload"));
        let path = cache.file_path("k1").await.unwrap();
        assert!(fs::metadata(&path).await.is_ok());
        assert!(cache.try_get_stream("k1").await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_queued_key_is_skipped() {
        let dir = TempDir::new().unwrap();
        let cache = create_cache(&dir, MB).await;

        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"first"), TTL)
            .await;
        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"second"), TTL)
            .await;
        cache.flush().await;

        assert_eq!(cache.get_bytes("k1").await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_present_key_is_not_requeued() {
        let dir = TempDir::new().unwrap();
        let cache = create_cache(&dir, MB).await;

        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"first"), TTL)
            .await;
        cache.flush().await;
        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"second"), TTL)
            .await;
        cache.flush().await;

        assert_eq!(cache.get_bytes("k1").await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = create_cache(&dir, MB).await;

        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"x"), Duration::ZERO)
            .await;
        cache.flush().await;

        assert!(!cache.exists("k1").await);
        assert!(cache.try_get_stream("k1").await.is_none());
        assert!(cache.get_bytes("k1").await.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = create_cache(&dir, MB).await;

        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"x"), TTL)
            .await;
        cache.flush().await;
        let path = cache.file_path("k1").await.unwrap();

        cache.remove("k1").await;
        assert!(!cache.exists("k1").await);
        cache.flush().await;
        assert!(fs::metadata(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let cache = create_cache(&dir, MB).await;

        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"x"), TTL)
            .await;
        cache
            .add_to_saving_queue_if_not_exists("k2", Bytes::from_static(b"y"), TTL)
            .await;
        cache.flush().await;

        cache.clear().await;
        cache.flush().await;
        assert!(cache.is_empty());
        assert!(!cache.exists("k1").await);
        assert!(!cache.exists("k2").await);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = create_cache(&dir, MB).await;
            cache
                .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"one"), TTL)
                .await;
            cache
                .add_to_saving_queue_if_not_exists("k2", Bytes::from_static(b"two"), TTL)
                .await;
            cache.flush().await;
        }

        let cache = create_cache(&dir, MB).await;
        assert!(cache.exists("k1").await);
        assert!(cache.exists("k2").await);
        assert_eq!(cache.get_bytes("k1").await.unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_recovery_discards_torn_journal_tail() {
        let dir = TempDir::new().unwrap();
        {
            let cache = create_cache(&dir, MB).await;
            cache
                .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"one"), TTL)
                .await;
            cache
                .add_to_saving_queue_if_not_exists("k2", Bytes::from_static(b"two"), TTL)
                .await;
            cache.flush().await;
        }

        // Simulate a crash mid-append: garbage with no trailing newline.
        let journal_path = dir.path().join("journal.jsonl");
        let mut contents = std::fs::read(&journal_path).unwrap();
        contents.extend_from_slice(b"{\"op\":\"insert\",\"key\":\"torn");
        std::fs::write(&journal_path, &contents).unwrap();

        let cache = create_cache(&dir, MB).await;
        assert!(cache.exists("k1").await);
        assert!(cache.exists("k2").await);
        assert_eq!(cache.len(), 2);
        assert!(!cache.exists("torn").await);
    }

    #[tokio::test]
    async fn test_recovery_drops_entry_with_missing_file() {
        let dir = TempDir::new().unwrap();
        {
            let cache = create_cache(&dir, MB).await;
            cache
                .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"one"), TTL)
                .await;
            cache.flush().await;
            let path = cache.file_path("k1").await.unwrap();
            std::fs::remove_file(path).unwrap();
        }

        let cache = create_cache(&dir, MB).await;
        assert!(!cache.exists("k1").await);
    }

    #[tokio::test]
    async fn test_orphan_files_are_swept_on_open() {
        let dir = TempDir::new().unwrap();
        let orphan = dir.path().join("deadbeef.img");
        std::fs::write(&orphan, b"leftover").unwrap();

        let _cache = create_cache(&dir, MB).await;
        assert!(std::fs::metadata(&orphan).is_err());
    }

    #[tokio::test]
    async fn test_eviction_keeps_total_under_budget() {
        let dir = TempDir::new().unwrap();
        let cache = create_cache(&dir, 10).await;

        cache
            .add_to_saving_queue_if_not_exists("k1", Bytes::from_static(b"123456"), TTL)
            .await;
        cache.flush().await;
        cache
            .add_to_saving_queue_if_not_exists("k2", Bytes::from_static(b"123456"), TTL)
            .await;
        cache.flush().await;

        assert!(cache.total_size() <= 10);
        assert!(cache.exists("k2").await);
        assert!(!cache.exists("k1").await);
    }
}
