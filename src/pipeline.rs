//! The indexing pipeline: change detection, parallel extract/embed workers
//! over bounded queues, a single serialized commit stage, and periodic
//! durable checkpoints.
//!
//! Stage layout:
//!
//! ```text
//! candidates -> classify (rayon) -> work queue -> W workers (extract+embed)
//!            -> commit queue -> commit thread (append, tombstone, record)
//!            -> checkpoint every K commits and at pipeline end
//! ```
//!
//! Only the commit thread touches the vector store and record table
//! mutably, so an update's append/tombstone/record rewrite is one critical
//! section: concurrent readers observe all-old or all-new, never a mix.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::change::{self, Change, Inspection};
use crate::config::EngineConfig;
use crate::embed::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::extract::{self, Extractor};
use crate::records::{FileRecord, RecordTable};
use crate::scanner;
use crate::store::VectorStore;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndexStats {
    pub total_candidates: usize,
    pub processed: usize,
    pub skipped_unchanged: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

/// Everything the pipeline borrows from the engine for one run.
pub struct PipelineContext<'a> {
    pub config: &'a EngineConfig,
    pub extractor: &'a dyn Extractor,
    pub embedder: &'a dyn Embedder,
    pub store: &'a RwLock<VectorStore>,
    pub records: &'a RwLock<RecordTable>,
    pub cancel: &'a AtomicBool,
}

struct WorkItem {
    path: PathBuf,
    canonical: String,
    inspection: Option<Inspection>,
}

/// The unit the commit stage applies atomically.
struct CommitMsg {
    record: FileRecord,
    vector: Vec<f32>,
}

pub fn run(ctx: PipelineContext<'_>, candidates: Vec<PathBuf>) -> EngineResult<IndexStats> {
    let start = Instant::now();
    let total_candidates = candidates.len();

    let errors = AtomicUsize::new(0);
    let (work, skipped_unchanged) = classify_candidates(&ctx, candidates, &errors);

    info!(
        total = total_candidates,
        to_process = work.len(),
        unchanged = skipped_unchanged,
        "change detection complete"
    );

    let processed = AtomicUsize::new(0);
    let fatal: Mutex<Option<EngineError>> = Mutex::new(None);

    if !work.is_empty() {
        let queue_cap = ctx.config.max_workers.max(1) * 2;
        let (work_tx, work_rx) = bounded::<WorkItem>(queue_cap);
        let (commit_tx, commit_rx) = bounded::<CommitMsg>(queue_cap);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                commit_stage(&ctx, commit_rx, &processed, &fatal);
            });

            for _ in 0..ctx.config.max_workers.max(1) {
                let work_rx = work_rx.clone();
                let commit_tx = commit_tx.clone();
                scope.spawn(|| {
                    worker_stage(&ctx, work_rx, commit_tx, &errors);
                });
            }
            drop(commit_tx);
            drop(work_rx);

            feed_work(&ctx, work, work_tx);
        });
    }

    // Always leave a durable, mutually consistent set of sidecars behind,
    // including on a fresh empty index and after cancellation.
    checkpoint(&ctx)?;

    let stats = IndexStats {
        total_candidates,
        processed: processed.load(Ordering::Relaxed),
        skipped_unchanged,
        errors: errors.load(Ordering::Relaxed),
        duration_ms: start.elapsed().as_millis() as u64,
    };

    if let Some(err) = fatal.lock().take() {
        return Err(err);
    }
    if ctx.cancel.load(Ordering::Relaxed) {
        info!(
            processed = stats.processed,
            errors = stats.errors,
            "indexing cancelled; committed work checkpointed"
        );
        return Err(EngineError::Cancelled);
    }

    info!(
        processed = stats.processed,
        unchanged = stats.skipped_unchanged,
        errors = stats.errors,
        duration_ms = stats.duration_ms,
        "indexing complete"
    );
    Ok(stats)
}

/// Stage 1: canonicalize and classify every candidate in parallel. Each
/// file is stat'd and hashed exactly once; the inspection is carried
/// forward so workers do not repeat the work.
fn classify_candidates(
    ctx: &PipelineContext<'_>,
    candidates: Vec<PathBuf>,
    errors: &AtomicUsize,
) -> (Vec<WorkItem>, usize) {
    let table = ctx.records.read();
    let skipped = AtomicUsize::new(0);

    let work: Vec<WorkItem> = candidates
        .into_par_iter()
        .filter_map(|path| {
            let canonical = match scanner::canonicalize(&path) {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot canonicalize candidate");
                    errors.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            };
            let (change, inspection) =
                change::classify(&path, &canonical, &table, ctx.config.hash_sample_bytes);
            match change {
                Change::Unchanged => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Change::New | Change::Modified => Some(WorkItem {
                    path,
                    canonical,
                    inspection,
                }),
            }
        })
        .collect();

    (work, skipped.load(Ordering::Relaxed))
}

/// Pushes work into the bounded queue, polling the cancel flag so a full
/// queue never wedges shutdown.
fn feed_work(ctx: &PipelineContext<'_>, work: Vec<WorkItem>, work_tx: Sender<WorkItem>) {
    'outer: for item in work {
        let mut pending = item;
        loop {
            if ctx.cancel.load(Ordering::Relaxed) {
                break 'outer;
            }
            match work_tx.send_timeout(pending, Duration::from_millis(100)) {
                Ok(()) => break,
                Err(crossbeam_channel::SendTimeoutError::Timeout(back)) => pending = back,
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => break 'outer,
            }
        }
    }
}

/// Stage 2/3: drain the work queue, extract and embed, push commit
/// messages. Per-file failures are logged and counted, never fatal.
fn worker_stage(
    ctx: &PipelineContext<'_>,
    work_rx: Receiver<WorkItem>,
    commit_tx: Sender<CommitMsg>,
    errors: &AtomicUsize,
) {
    loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            return;
        }
        let item = match work_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        match process_file(ctx, item) {
            Ok(msg) => {
                if commit_tx.send(msg).is_err() {
                    // Commit stage is gone (fatal error); stop drawing work.
                    return;
                }
            }
            Err(e) => {
                errors.fetch_add(1, Ordering::Relaxed);
                if e.is_per_file() {
                    debug!(error = %e, "file skipped");
                } else {
                    warn!(error = %e, "file skipped");
                }
            }
        }
    }
}

fn process_file(ctx: &PipelineContext<'_>, item: WorkItem) -> EngineResult<CommitMsg> {
    let WorkItem {
        path,
        canonical,
        inspection,
    } = item;

    // Classification tolerates inspection failures; retry here so the
    // error surfaces per-file instead of silently dropping the path.
    let inspection = match inspection {
        Some(i) => i,
        None => change::inspect(&path, ctx.config.hash_sample_bytes)?,
    };

    extract::check_size(&path, inspection.size_bytes, ctx.config.max_file_size_bytes())?;

    let extract_started = Instant::now();
    let extracted = ctx.extractor.extract(&path)?.ok_or_else(|| {
        EngineError::Unsupported(path.display().to_string())
    })?;
    let extract_elapsed = extract_started.elapsed();
    if extract_elapsed.as_secs() >= ctx.config.extraction_timeout_secs {
        return Err(EngineError::Timeout {
            path: canonical,
            stage: "extract",
            elapsed_ms: extract_elapsed.as_millis() as u64,
        });
    }

    let text = extract::truncate_for_embedding(&extracted.content);
    let embed_started = Instant::now();
    let vector = ctx.embedder.embed(text)?;
    let embed_elapsed = embed_started.elapsed();
    if embed_elapsed.as_secs() >= ctx.config.embedding_timeout_secs {
        return Err(EngineError::Timeout {
            path: canonical,
            stage: "embed",
            elapsed_ms: embed_elapsed.as_millis() as u64,
        });
    }

    let filename = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();

    Ok(CommitMsg {
        record: FileRecord {
            path: canonical,
            filename,
            size_bytes: inspection.size_bytes,
            mtime: inspection.mtime,
            content_hash: inspection.content_hash,
            indexed_at: Utc::now(),
            vector_slot: 0, // assigned at commit
            preview: extract::preview_of(&extracted.content),
            category: extracted.category,
            word_count: extracted.word_count,
        },
        vector,
    })
}

/// Stage 4: the only writer. Applies each commit atomically under the
/// store and table write locks, checkpointing every `checkpoint_every`
/// commits. Runs until the workers hang up, which also drains in-flight
/// messages after a cancellation.
fn commit_stage(
    ctx: &PipelineContext<'_>,
    commit_rx: Receiver<CommitMsg>,
    processed: &AtomicUsize,
    fatal: &Mutex<Option<EngineError>>,
) {
    let mut since_checkpoint = 0usize;

    for msg in commit_rx.iter() {
        let result = apply_commit(ctx, msg);
        match result {
            Ok(path) => {
                processed.fetch_add(1, Ordering::Relaxed);
                since_checkpoint += 1;
                debug!(path = %path, "committed");

                if since_checkpoint >= ctx.config.checkpoint_every {
                    if let Err(e) = checkpoint(ctx) {
                        warn!(error = %e, "checkpoint failed, aborting run");
                        *fatal.lock() = Some(e);
                        return;
                    }
                    since_checkpoint = 0;
                }
            }
            Err(e) => {
                // Append can only fail structurally (dimension drift);
                // that poisons the run, not just the file.
                warn!(error = %e, "commit failed, aborting run");
                *fatal.lock() = Some(e);
                return;
            }
        }
    }
}

fn apply_commit(ctx: &PipelineContext<'_>, msg: CommitMsg) -> EngineResult<String> {
    let CommitMsg { mut record, vector } = msg;

    let mut store = ctx.store.write();
    let mut records = ctx.records.write();

    let slot = store.append(&vector)?;
    record.vector_slot = slot;
    let path = record.path.clone();
    if let Some(previous) = records.put(record) {
        store.tombstone(previous.vector_slot);
    }
    Ok(path)
}

/// Flushes the vector store, tombstones and record table. An I/O failure
/// here is fatal to the run: a half-written checkpoint set must never be
/// mistaken for progress.
pub fn checkpoint(ctx: &PipelineContext<'_>) -> EngineResult<()> {
    let dir: &Path = &ctx.config.index_dir;
    ctx.store.read().checkpoint(dir)?;
    ctx.records.read().save(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::extract::PlainTextExtractor;

    struct Harness {
        config: EngineConfig,
        extractor: PlainTextExtractor,
        embedder: HashingEmbedder,
        store: RwLock<VectorStore>,
        records: RwLock<RecordTable>,
        cancel: AtomicBool,
    }

    impl Harness {
        fn new(index_dir: &Path) -> Self {
            let embedder = HashingEmbedder::default();
            Self {
                config: EngineConfig::with_index_dir(index_dir),
                extractor: PlainTextExtractor::new(),
                store: RwLock::new(VectorStore::new(embedder.dim())),
                records: RwLock::new(RecordTable::new()),
                embedder,
                cancel: AtomicBool::new(false),
            }
        }

        fn ctx(&self) -> PipelineContext<'_> {
            PipelineContext {
                config: &self.config,
                extractor: &self.extractor,
                embedder: &self.embedder,
                store: &self.store,
                records: &self.records,
                cancel: &self.cancel,
            }
        }
    }

    fn write_files(dir: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
        files
            .iter()
            .map(|(name, content)| {
                let path = dir.join(name);
                std::fs::write(&path, content).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn fresh_run_commits_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(&dir.path().join("index"));
        let paths = write_files(
            dir.path(),
            &[("a.txt", "alpha content"), ("b.txt", "beta content")],
        );

        let stats = run(harness.ctx(), paths).unwrap();
        assert_eq!(stats.total_candidates, 2);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped_unchanged, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(harness.store.read().len(), 2);
        assert_eq!(harness.records.read().len(), 2);
    }

    #[test]
    fn second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(&dir.path().join("index"));
        let paths = write_files(dir.path(), &[("a.txt", "alpha"), ("b.txt", "beta")]);

        run(harness.ctx(), paths.clone()).unwrap();
        let stats = run(harness.ctx(), paths).unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.skipped_unchanged, 2);
        assert_eq!(harness.store.read().len(), 2);
    }

    #[test]
    fn modification_appends_and_tombstones_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(&dir.path().join("index"));
        let paths = write_files(dir.path(), &[("a.txt", "original content here")]);

        run(harness.ctx(), paths.clone()).unwrap();
        let old_slot = harness.records.read().iter().next().unwrap().vector_slot;

        std::fs::write(&paths[0], "completely different words now").unwrap();
        let stats = run(harness.ctx(), paths).unwrap();
        assert_eq!(stats.processed, 1);

        let store = harness.store.read();
        let records = harness.records.read();
        assert_eq!(store.len(), 2);
        assert_eq!(store.tombstone_count(), 1);
        assert!(store.is_tombstoned(old_slot));
        let record = records.iter().next().unwrap();
        assert_ne!(record.vector_slot, old_slot);
        assert!(!store.is_tombstoned(record.vector_slot));
    }

    #[test]
    fn unsupported_files_count_as_errors_without_records() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(&dir.path().join("index"));
        let mut paths = write_files(dir.path(), &[("a.txt", "fine")]);
        let binary = dir.path().join("img.png");
        std::fs::write(&binary, [1u8, 2, 3]).unwrap();
        paths.push(binary);

        let stats = run(harness.ctx(), paths).unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(harness.records.read().len(), 1);
    }

    #[test]
    fn oversize_file_is_skipped_and_prior_record_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = Harness::new(&dir.path().join("index"));
        let paths = write_files(dir.path(), &[("a.txt", "small enough")]);
        run(harness.ctx(), paths.clone()).unwrap();

        // Grow the file past the (now tiny) limit: classified Modified,
        // then refused before extraction.
        std::fs::write(&paths[0], "grown well past the new limit").unwrap();
        harness.config.max_file_size_mb = 0;
        let stats = run(harness.ctx(), paths).unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.errors, 1);
        assert_eq!(harness.records.read().len(), 1, "prior record retained");
        assert_eq!(harness.store.read().tombstone_count(), 0);
    }

    #[test]
    fn checkpoint_set_is_written_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        let harness = Harness::new(&index_dir);
        let paths = write_files(dir.path(), &[("a.txt", "content")]);
        run(harness.ctx(), paths).unwrap();

        assert!(index_dir.join("vectors.bin").exists());
        assert!(index_dir.join("tombstones.bin").exists());
        assert!(index_dir.join("records.json").exists());
    }

    #[test]
    fn cancelled_run_checkpoints_and_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        let harness = Harness::new(&index_dir);
        harness.cancel.store(true, Ordering::Relaxed);
        let paths = write_files(dir.path(), &[("a.txt", "content")]);

        let err = run(harness.ctx(), paths).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(index_dir.join("vectors.bin").exists());
    }
}
