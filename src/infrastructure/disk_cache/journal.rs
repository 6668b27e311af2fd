//! Append-only journal backing the disk cache index.
//!
//! Each line is one JSON record. The index is rebuilt by replaying the
//! journal on startup; a crash mid-append leaves at worst one incomplete
//! trailing line, which replay discards. Compaction rewrites the journal
//! to a temporary file, flushes it, then atomically replaces the live one,
//! so a crash mid-compaction leaves the previous journal intact.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// One journal mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(super) enum JournalRecord {
    /// An entry was durably written to disk.
    Insert {
        /// Cache key of the entry.
        key: String,
        /// Content file name within the cache directory.
        file: String,
        /// Content size in bytes.
        size: u64,
        /// Creation time, unix seconds.
        created: u64,
        /// Time-to-live in seconds.
        ttl_secs: u64,
    },
    /// An entry was removed.
    Remove {
        /// Cache key of the entry.
        key: String,
    },
}

/// Outcome of replaying a journal file.
pub(super) struct Replay {
    pub records: Vec<JournalRecord>,
    /// False when a torn or corrupt line was encountered; the caller
    /// should compact so the journal is clean again.
    pub clean: bool,
}

pub(super) struct Journal {
    path: PathBuf,
    file: File,
    /// Records currently in the journal file, live or superseded.
    record_count: u64,
}

impl Journal {
    /// Opens (creating if needed) the journal and replays its records.
    pub(super) async fn open(path: PathBuf) -> std::io::Result<(Self, Replay)> {
        let replay = Self::replay(&path).await;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let record_count = replay.records.len() as u64;
        Ok((Self { path, file, record_count }, replay))
    }

    /// Replays a journal file line by line.
    ///
    /// A missing file is an empty journal. An undecodable line ends the
    /// replay: only the trailing line can be torn by an append crash, so
    /// anything after a bad line is not trusted.
    async fn replay(path: &Path) -> Replay {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Replay { records: Vec::new(), clean: true };
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read journal, starting empty");
                return Replay { records: Vec::new(), clean: false };
            }
        };

        let mut records = Vec::new();
        let mut clean = true;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    debug!(error = %err, "discarding undecodable journal tail");
                    clean = false;
                    break;
                }
            }
        }
        Replay { records, clean }
    }

    /// Appends one record and flushes it.
    pub(super) async fn append(&mut self, record: &JournalRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        self.record_count += 1;
        Ok(())
    }

    /// Records in the journal file, including superseded ones.
    pub(super) const fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Rewrites the journal to contain exactly `live` records.
    ///
    /// Writes to `<journal>.tmp`, flushes and syncs, then atomically
    /// renames over the live journal.
    pub(super) async fn compact(&mut self, live: &[JournalRecord]) -> std::io::Result<()> {
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut tmp = File::create(&tmp_path).await?;
        for record in live {
            let mut line = serde_json::to_vec(record)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
            line.push(b'\n');
            tmp.write_all(&line).await?;
        }
        tmp.flush().await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).await?;

        self.file = OpenOptions::new().append(true).open(&self.path).await?;
        self.record_count = live.len() as u64;
        debug!(records = live.len(), "compacted journal");
        Ok(())
    }
}
