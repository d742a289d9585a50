//! Dense vector index: an append-only table of unit vectors with an exact
//! brute-force inner-product search and a small binary checkpoint format.
//!
//! Vectors are never mutated in place. Updating a file appends a fresh
//! vector and retires the old slot into the tombstone set; search skips
//! tombstoned slots. At the target scale (tens to low hundreds of
//! thousands of vectors) a scan over one contiguous f32 buffer is faster
//! and far simpler than an ANN structure.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// ASCII "VECX", written little-endian.
pub const VECTORS_MAGIC: u32 = 0x5645_4358;
pub const VECTORS_VERSION: u32 = 1;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const TOMBSTONES_FILE: &str = "tombstones.bin";

/// Fixed header preceding the f32 matrix in `vectors.bin`.
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 8;

#[derive(Debug)]
pub struct VectorStore {
    dim: usize,
    /// Row-major `n x dim` matrix, contiguous for cache-friendly scans.
    data: Vec<f32>,
    tombstones: BTreeSet<u64>,
}

impl VectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            tombstones: BTreeSet::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Total slots ever appended, tombstoned or not.
    pub fn len(&self) -> u64 {
        (self.data.len() / self.dim) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn live_len(&self) -> u64 {
        self.len() - self.tombstones.len() as u64
    }

    pub fn tombstone_count(&self) -> u64 {
        self.tombstones.len() as u64
    }

    pub fn is_tombstoned(&self, slot: u64) -> bool {
        self.tombstones.contains(&slot)
    }

    /// Appends a vector and returns its slot. Callers serialize appends
    /// through the pipeline's commit stage.
    pub fn append(&mut self, vector: &[f32]) -> EngineResult<u64> {
        if vector.len() != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let slot = self.len();
        self.data.extend_from_slice(vector);
        Ok(slot)
    }

    /// Retires a slot. Idempotent; unknown slots are ignored.
    pub fn tombstone(&mut self, slot: u64) {
        if slot < self.len() {
            self.tombstones.insert(slot);
        }
    }

    /// Exact top-k by inner product over non-tombstoned slots. Inputs are
    /// unit vectors, so scores are cosine similarities in [-1, 1]. Ties
    /// break toward the lower slot index.
    pub fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<(u64, f32)>> {
        if query.len() != self.dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u64, f32)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .filter(|(slot, _)| !self.tombstones.contains(&(*slot as u64)))
            .map(|(slot, row)| (slot as u64, dot(query, row)))
            .collect();

        scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Writes `vectors.bin` and `tombstones.bin` under `dir`, each via
    /// write-to-temp-then-rename so a crash never leaves a torn file.
    pub fn checkpoint(&self, dir: &Path) -> EngineResult<()> {
        std::fs::create_dir_all(dir)?;

        let vectors_path = dir.join(VECTORS_FILE);
        let tmp = vectors_path.with_extension("bin.tmp");
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            w.write_all(&VECTORS_MAGIC.to_le_bytes())?;
            w.write_all(&VECTORS_VERSION.to_le_bytes())?;
            w.write_all(&(self.dim as u32).to_le_bytes())?;
            w.write_all(&self.len().to_le_bytes())?;
            w.write_all(&self.tombstone_count().to_le_bytes())?;
            for value in &self.data {
                w.write_all(&value.to_le_bytes())?;
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &vectors_path)?;

        let tombstones_path = dir.join(TOMBSTONES_FILE);
        let tmp = tombstones_path.with_extension("bin.tmp");
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            w.write_all(&self.tombstone_count().to_le_bytes())?;
            for slot in &self.tombstones {
                w.write_all(&slot.to_le_bytes())?;
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &tombstones_path)?;

        debug!(
            vectors = self.len(),
            tombstones = self.tombstone_count(),
            "vector store checkpoint written"
        );
        Ok(())
    }

    /// Reloads a checkpoint. A missing `tombstones.bin` is treated as an
    /// empty set; any other disagreement with the header refuses to load.
    pub fn restore(dir: &Path, expected_dim: usize) -> EngineResult<Self> {
        let vectors_path = dir.join(VECTORS_FILE);
        let mut r = BufReader::new(File::open(&vectors_path)?);

        let mut header = [0u8; HEADER_LEN];
        r.read_exact(&mut header)
            .map_err(|_| EngineError::CorruptIndex("vectors.bin header truncated".into()))?;

        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let dim = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        let n = u64::from_le_bytes(header[12..20].try_into().unwrap());
        let tombstone_count = u64::from_le_bytes(header[20..28].try_into().unwrap());

        if magic != VECTORS_MAGIC {
            return Err(EngineError::CorruptIndex(format!(
                "bad magic in vectors.bin: {magic:#010x}"
            )));
        }
        if version != VECTORS_VERSION {
            return Err(EngineError::CorruptIndex(format!(
                "unsupported vectors.bin version {version}"
            )));
        }
        if dim != expected_dim {
            return Err(EngineError::DimensionMismatch {
                expected: expected_dim,
                actual: dim,
            });
        }

        let value_count = (n as usize)
            .checked_mul(dim)
            .ok_or_else(|| EngineError::CorruptIndex("vector count overflow".into()))?;
        let mut data = vec![0f32; value_count];
        let mut buf = [0u8; 4];
        for value in data.iter_mut() {
            r.read_exact(&mut buf)
                .map_err(|_| EngineError::CorruptIndex("vectors.bin data truncated".into()))?;
            *value = f32::from_le_bytes(buf);
        }
        if r.read(&mut buf)? != 0 {
            return Err(EngineError::CorruptIndex(
                "vectors.bin longer than header claims".into(),
            ));
        }

        let tombstones = Self::read_tombstones(&dir.join(TOMBSTONES_FILE), n)?;
        if tombstones.len() as u64 != tombstone_count && !tombstones.is_empty() {
            return Err(EngineError::CorruptIndex(format!(
                "tombstone count mismatch: header says {tombstone_count}, file has {}",
                tombstones.len()
            )));
        }

        debug!(vectors = n, tombstones = tombstones.len(), "vector store restored");
        Ok(Self { dim, data, tombstones })
    }

    fn read_tombstones(path: &Path, n: u64) -> EngineResult<BTreeSet<u64>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        let mut r = BufReader::new(file);

        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)
            .map_err(|_| EngineError::CorruptIndex("tombstones.bin header truncated".into()))?;
        let count = u64::from_le_bytes(buf);

        let mut tombstones = BTreeSet::new();
        for _ in 0..count {
            r.read_exact(&mut buf)
                .map_err(|_| EngineError::CorruptIndex("tombstones.bin truncated".into()))?;
            let slot = u64::from_le_bytes(buf);
            if slot >= n {
                return Err(EngineError::CorruptIndex(format!(
                    "tombstone slot {slot} out of range (n = {n})"
                )));
            }
            tombstones.insert(slot);
        }
        Ok(tombstones)
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    // chunks_exact gives the autovectorizer a fixed trip count per lane.
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: &[f32]) -> Vec<f32> {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        values.iter().map(|v| v / norm).collect()
    }

    #[test]
    fn append_returns_sequential_slots() {
        let mut store = VectorStore::new(3);
        assert_eq!(store.append(&unit(&[1.0, 0.0, 0.0])).unwrap(), 0);
        assert_eq!(store.append(&unit(&[0.0, 1.0, 0.0])).unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn append_rejects_wrong_dimension() {
        let mut store = VectorStore::new(3);
        let err = store.append(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn search_ranks_by_inner_product() {
        let mut store = VectorStore::new(2);
        store.append(&unit(&[1.0, 0.0])).unwrap();
        store.append(&unit(&[0.0, 1.0])).unwrap();
        store.append(&unit(&[1.0, 1.0])).unwrap();

        let hits = store.search(&unit(&[1.0, 0.0]), 3).unwrap();
        assert_eq!(hits[0].0, 0);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].0, 2);
        assert_eq!(hits[2].0, 1);
    }

    #[test]
    fn search_breaks_ties_by_lower_slot() {
        let mut store = VectorStore::new(2);
        store.append(&unit(&[0.0, 1.0])).unwrap();
        store.append(&unit(&[1.0, 0.0])).unwrap();
        store.append(&unit(&[1.0, 0.0])).unwrap();

        let hits = store.search(&unit(&[1.0, 0.0]), 2).unwrap();
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
    }

    #[test]
    fn search_skips_tombstoned_slots() {
        let mut store = VectorStore::new(2);
        store.append(&unit(&[1.0, 0.0])).unwrap();
        store.append(&unit(&[0.9, 0.1])).unwrap();
        store.tombstone(0);
        store.tombstone(0); // idempotent

        let hits = store.search(&unit(&[1.0, 0.0]), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
        assert_eq!(store.tombstone_count(), 1);
    }

    #[test]
    fn search_with_k_above_live_count_returns_all_live() {
        let mut store = VectorStore::new(2);
        store.append(&unit(&[1.0, 0.0])).unwrap();
        store.append(&unit(&[0.0, 1.0])).unwrap();
        let hits = store.search(&unit(&[1.0, 1.0]), 100).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_store_returns_no_hits() {
        let store = VectorStore::new(4);
        assert!(store.search(&[0.5; 4], 10).unwrap().is_empty());
    }

    #[test]
    fn checkpoint_restore_is_observationally_equivalent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(3);
        store.append(&unit(&[1.0, 0.0, 0.0])).unwrap();
        store.append(&unit(&[0.0, 1.0, 0.0])).unwrap();
        store.append(&unit(&[0.0, 0.0, 1.0])).unwrap();
        store.tombstone(1);
        store.checkpoint(dir.path()).unwrap();

        let restored = VectorStore::restore(dir.path(), 3).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.tombstone_count(), 1);

        let q = unit(&[0.7, 0.7, 0.1]);
        assert_eq!(store.search(&q, 3).unwrap(), restored.search(&q, 3).unwrap());
    }

    #[test]
    fn restore_tolerates_missing_tombstones_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(2);
        store.append(&unit(&[1.0, 0.0])).unwrap();
        store.checkpoint(dir.path()).unwrap();
        std::fs::remove_file(dir.path().join(TOMBSTONES_FILE)).unwrap();

        let restored = VectorStore::restore(dir.path(), 2).unwrap();
        assert_eq!(restored.tombstone_count(), 0);
    }

    #[test]
    fn restore_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(2);
        store.append(&unit(&[1.0, 0.0])).unwrap();
        store.checkpoint(dir.path()).unwrap();

        let path = dir.path().join(VECTORS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let err = VectorStore::restore(dir.path(), 2).unwrap_err();
        assert!(matches!(err, EngineError::CorruptIndex(_)));
    }

    #[test]
    fn restore_rejects_truncated_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(2);
        store.append(&unit(&[1.0, 0.0])).unwrap();
        store.checkpoint(dir.path()).unwrap();

        let path = dir.path().join(VECTORS_FILE);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let err = VectorStore::restore(dir.path(), 2).unwrap_err();
        assert!(matches!(err, EngineError::CorruptIndex(_)));
    }

    #[test]
    fn restore_rejects_foreign_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(8);
        store.append(&unit(&[1.0; 8])).unwrap();
        store.checkpoint(dir.path()).unwrap();

        let err = VectorStore::restore(dir.path(), 384).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch { expected: 384, actual: 8 }
        ));
    }
}
