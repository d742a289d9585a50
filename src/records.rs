//! Per-file metadata keyed by canonical path, with the JSON sidecar and the
//! sampled 128-bit content fingerprint used for change detection.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::config::Category;
use crate::error::EngineResult;

pub const RECORDS_FILE: &str = "records.json";

/// Indexing state of one file. `path` is canonical (absolute, symlinks
/// resolved) and is the primary key; two paths to the same inode yield two
/// records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub filename: String,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
    /// Slot of this record's vector in the vector store. Always live:
    /// updates tombstone the old slot and point here at the replacement.
    pub vector_slot: u64,
    /// First ~200 characters of extracted text, for display.
    pub preview: String,
    pub category: Category,
    pub word_count: usize,
}

/// In-memory mapping from canonical path to record, persisted as a single
/// human-inspectable JSON document.
#[derive(Debug, Default)]
pub struct RecordTable {
    records: HashMap<String, FileRecord>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(dir: &Path) -> EngineResult<Self> {
        let path = dir.join(RECORDS_FILE);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let records: HashMap<String, FileRecord> = serde_json::from_str(&json)?;
        Ok(Self { records })
    }

    /// Atomic write: temp file then rename, so a crash mid-save never
    /// corrupts the previous checkpoint.
    pub fn save(&self, dir: &Path) -> EngineResult<()> {
        std::fs::create_dir_all(dir)?;
        let target = dir.join(RECORDS_FILE);
        let tmp = target.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    /// Insert or replace. On replace the caller tombstones the previous
    /// record's `vector_slot`.
    pub fn put(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.records.insert(record.path.clone(), record)
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.records.remove(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    /// Highest live slot, used to cross-check the vector store header on
    /// restore.
    pub fn max_slot(&self) -> Option<u64> {
        self.records.values().map(|r| r.vector_slot).max()
    }
}

/// 128-bit content fingerprint. Small files hash in full; larger files hash
/// three `sample/3`-byte windows at the start, middle and end, which catches
/// in-place rewrites that preserve both size and mtime without reading
/// gigabytes. xxh3 is fast and collision-resistant enough for a change
/// signal; this is not a security boundary.
pub fn content_hash(path: &Path, sample_bytes: u64) -> EngineResult<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Xxh3::new();

    if size <= sample_bytes {
        let mut buf = Vec::with_capacity(size as usize);
        file.read_to_end(&mut buf)?;
        hasher.update(&buf);
    } else {
        let window = (sample_bytes / 3) as usize;
        let mut buf = vec![0u8; window];

        read_window(&mut file, 0, &mut buf)?;
        hasher.update(&buf);

        read_window(&mut file, size / 2, &mut buf)?;
        hasher.update(&buf);

        read_window(&mut file, size - window as u64, &mut buf)?;
        hasher.update(&buf);
    }

    Ok(format!("{:032x}", hasher.digest128()))
}

fn read_window(file: &mut File, offset: u64, buf: &mut [u8]) -> EngineResult<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    // A short tail still hashes deterministically.
    buf[filled..].fill(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, slot: u64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            size_bytes: 10,
            mtime: Utc::now(),
            content_hash: "00".repeat(16),
            indexed_at: Utc::now(),
            vector_slot: slot,
            preview: String::new(),
            category: Category::Text,
            word_count: 2,
        }
    }

    #[test]
    fn put_replaces_and_returns_previous() {
        let mut table = RecordTable::new();
        assert!(table.put(record("/a.txt", 0)).is_none());
        let prev = table.put(record("/a.txt", 3)).unwrap();
        assert_eq!(prev.vector_slot, 0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("/a.txt").unwrap().vector_slot, 3);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = RecordTable::new();
        table.put(record("/a.txt", 0));
        table.put(record("/b.txt", 1));
        table.save(dir.path()).unwrap();

        let loaded = RecordTable::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("/b.txt").unwrap().vector_slot, 1);
        assert_eq!(loaded.max_slot(), Some(1));
    }

    #[test]
    fn load_missing_sidecar_is_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let table = RecordTable::load(dir.path()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.max_slot(), None);
    }

    #[test]
    fn small_file_hash_covers_whole_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"hello world").unwrap();
        std::fs::write(&b, b"hello worle").unwrap();

        assert_ne!(
            content_hash(&a, 8192).unwrap(),
            content_hash(&b, 8192).unwrap()
        );
        assert_eq!(
            content_hash(&a, 8192).unwrap(),
            content_hash(&a, 8192).unwrap()
        );
    }

    #[test]
    fn large_file_hash_samples_three_windows() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");

        // 64 bytes with an 18-byte sample: only windows at 0, 32, 58 are read.
        let mut base = vec![b'x'; 64];
        std::fs::write(&a, &base).unwrap();

        base[32] = b'y'; // middle window
        std::fs::write(&b, &base).unwrap();
        assert_ne!(content_hash(&a, 18).unwrap(), content_hash(&b, 18).unwrap());

        // A change outside all windows goes unnoticed by design.
        let mut unsampled = vec![b'x'; 64];
        unsampled[20] = b'z';
        let c = dir.path().join("c");
        std::fs::write(&c, &unsampled).unwrap();
        assert_eq!(content_hash(&a, 18).unwrap(), content_hash(&c, 18).unwrap());
    }

    #[test]
    fn hash_is_stable_across_calls_and_formats_as_hex() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::write(&a, b"stable").unwrap();
        let h = content_hash(&a, 8192).unwrap();
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
