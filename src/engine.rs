//! The engine owns every piece of index state (vector store, record
//! table, search history, access counters) as explicit values constructed
//! at startup. Front-ends talk to this surface and nothing else.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{self, EngineConfig};
use crate::embed::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::explain::{self, SearchAnalytics, SearchHistoryEntry};
use crate::extract::Extractor;
use crate::pipeline::{self, IndexStats, PipelineContext};
use crate::query;
use crate::rank::{self, Candidate, RankedResult};
use crate::records::{RECORDS_FILE, RecordTable};
use crate::scanner;
use crate::store::{VECTORS_FILE, VectorStore};

pub const HISTORY_FILE: &str = "history.json";
pub const ACCESS_FILE: &str = "access.json";

/// Snapshot of index-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_files: usize,
    pub total_size_mb: f64,
    pub vectors: u64,
    pub live_vectors: u64,
    pub tombstones: u64,
    pub categories: HashMap<String, usize>,
    pub indexed_last_7_days: usize,
    pub index_dir: PathBuf,
}

pub struct Engine {
    config: EngineConfig,
    extractor: Box<dyn Extractor>,
    embedder: Box<dyn Embedder>,
    store: RwLock<VectorStore>,
    records: RwLock<RecordTable>,
    history: Mutex<VecDeque<SearchHistoryEntry>>,
    access: Mutex<HashMap<String, u64>>,
    cancel: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("records", &self.records)
            .field("history", &self.history)
            .field("access", &self.access)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Engine {
    /// Opens (or freshly creates) the index under `config.index_dir`.
    ///
    /// A fresh start is an index directory with neither `vectors.bin` nor
    /// `records.json`. Anything partial, or a store whose header disagrees
    /// with the record table, refuses to start rather than silently
    /// rebuilding.
    pub fn open(
        config: EngineConfig,
        extractor: Box<dyn Extractor>,
        embedder: Box<dyn Embedder>,
    ) -> EngineResult<Self> {
        std::fs::create_dir_all(&config.index_dir)?;
        let dir = config.index_dir.as_path();

        let have_vectors = dir.join(VECTORS_FILE).exists();
        let have_records = dir.join(RECORDS_FILE).exists();

        let (store, records) = match (have_vectors, have_records) {
            (false, false) => (VectorStore::new(embedder.dim()), RecordTable::new()),
            (true, true) => {
                let store = VectorStore::restore(dir, embedder.dim())?;
                let records = RecordTable::load(dir)?;
                validate_consistency(&store, &records)?;
                (store, records)
            }
            (true, false) => {
                return Err(EngineError::CorruptIndex(
                    "vectors.bin present but records.json missing".into(),
                ));
            }
            (false, true) => {
                return Err(EngineError::CorruptIndex(
                    "records.json present but vectors.bin missing".into(),
                ));
            }
        };

        info!(
            index_dir = %dir.display(),
            files = records.len(),
            vectors = store.len(),
            tombstones = store.tombstone_count(),
            dim = store.dim(),
            "engine opened"
        );

        let history = Mutex::new(load_history(dir));
        let access = Mutex::new(load_access(dir));

        Ok(Self {
            history,
            access,
            config,
            extractor,
            embedder,
            store: RwLock::new(store),
            records: RwLock::new(records),
            cancel: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Requests cooperative cancellation of a running `index` call. Workers
    /// notice at queue boundaries; committed work is checkpointed.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Indexes an explicit path set. Directories are expanded through the
    /// configured discovery filters; files are taken as-is.
    pub fn index(&self, paths: Vec<PathBuf>, workers: Option<usize>) -> EngineResult<IndexStats> {
        self.cancel.store(false, Ordering::Relaxed);

        let mut run_config = self.config.clone();
        if let Some(workers) = workers {
            run_config.max_workers = workers.max(1);
        }

        let candidates = self.collect_candidates(paths, &run_config);
        pipeline::run(self.pipeline_ctx(&run_config), candidates)
    }

    /// Indexes the configured `include_dirs`.
    pub fn index_configured(&self, workers: Option<usize>) -> EngineResult<IndexStats> {
        self.index(self.config.include_dirs.clone(), workers)
    }

    fn collect_candidates(&self, paths: Vec<PathBuf>, run_config: &EngineConfig) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        for path in paths {
            if path.is_dir() {
                let mut scan_config = run_config.clone();
                scan_config.include_dirs = vec![path];
                candidates.extend(scanner::discover(&scan_config));
            } else {
                candidates.push(path);
            }
        }
        candidates
    }

    fn pipeline_ctx<'a>(&'a self, run_config: &'a EngineConfig) -> PipelineContext<'a> {
        PipelineContext {
            config: run_config,
            extractor: self.extractor.as_ref(),
            embedder: self.embedder.as_ref(),
            store: &self.store,
            records: &self.records,
            cancel: &self.cancel,
        }
    }

    /// Ranked semantic search. Fans out over query expansions, fetching 2k
    /// raw hits per variant, dedupes by path keeping the best semantic
    /// score, then re-ranks with the full signal set.
    pub fn search(&self, raw_query: &str, k: usize) -> EngineResult<Vec<RankedResult>> {
        let query = raw_query.trim();
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query = if query.len() > config::MAX_SEARCH_QUERY_LENGTH {
            warn!(len = query.len(), "query truncated to maximum length");
            let mut end = config::MAX_SEARCH_QUERY_LENGTH;
            while !query.is_char_boundary(end) {
                end -= 1;
            }
            &query[..end]
        } else {
            query
        };

        let plan = query::plan(query);

        // Best raw inner product per path across every expansion.
        let mut best: HashMap<String, f32> = HashMap::new();
        {
            let store = self.store.read();
            let records = self.records.read();
            let by_slot: HashMap<u64, &str> = records
                .iter()
                .map(|r| (r.vector_slot, r.path.as_str()))
                .collect();

            for expansion in &plan.expansions {
                let vector = match self.embedder.embed(expansion) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(expansion = %expansion, error = %e, "expansion not embeddable");
                        continue;
                    }
                };
                for (slot, score) in store.search(&vector, 2 * k)? {
                    let Some(path) = by_slot.get(&slot) else {
                        continue;
                    };
                    best.entry(path.to_string())
                        .and_modify(|s| *s = s.max(score))
                        .or_insert(score);
                }
            }
        }

        let candidates = {
            let records = self.records.read();
            let access = self.access.lock();
            best.into_iter()
                .filter_map(|(path, semantic_raw)| {
                    let record = records.get(&path)?;
                    Some(Candidate {
                        filename: record.filename.clone(),
                        category: record.category,
                        modified_at: record.mtime,
                        semantic_raw,
                        access_count: Some(access.get(&path).copied().unwrap_or(0)),
                        preview: record.preview.clone(),
                        word_count: record.word_count,
                        size_bytes: record.size_bytes,
                        path,
                    })
                })
                .collect::<Vec<_>>()
        };

        let mut results = rank::rank(candidates, query, &plan.intent, Utc::now());
        results.truncate(k);
        explain::annotate(&mut results, query, &plan.intent);

        self.remember_search(query, &plan.intent, results.len());
        Ok(results)
    }

    fn remember_search(&self, query: &str, intent: &query::Intent, result_count: usize) {
        {
            let mut history = self.history.lock();
            history.push_back(SearchHistoryEntry {
                query: query.to_string(),
                timestamp: Utc::now(),
                detected_intents: intent.labels(),
                result_count,
            });
            while history.len() > config::HISTORY_LIMIT {
                history.pop_front();
            }
            if let Err(e) = save_json(&self.config.index_dir, HISTORY_FILE, &*history) {
                warn!(error = %e, "failed to persist search history");
            }
        }
    }

    /// Up to five proactive suggestions: context-hint hits first, then
    /// time-of-day seed queries, deduplicated by path.
    pub fn suggest(&self, context_hint: Option<&str>) -> EngineResult<Vec<RankedResult>> {
        let mut suggestions: Vec<RankedResult> = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        let take = |results: Vec<RankedResult>,
                    limit: usize,
                    suggestions: &mut Vec<RankedResult>,
                    seen: &mut Vec<String>| {
            for result in results.into_iter().take(limit) {
                if suggestions.len() >= 5 {
                    break;
                }
                if !seen.contains(&result.path) {
                    seen.push(result.path.clone());
                    suggestions.push(result);
                }
            }
        };

        if let Some(hint) = context_hint {
            take(self.search(hint, 3)?, 2, &mut suggestions, &mut seen);
        }

        let hour = chrono::Local::now().hour();
        let seeds: &[&str] = if (9..=17).contains(&hour) {
            &["meeting", "report", "project", "status"]
        } else {
            &["notes", "ideas", "learning", "personal"]
        };
        for seed in seeds {
            if suggestions.len() >= 5 {
                break;
            }
            take(self.search(seed, 2)?, 2, &mut suggestions, &mut seen);
        }

        suggestions.truncate(5);
        Ok(suggestions)
    }

    /// Tracks a user-driven open of `path`, persisted immediately.
    pub fn record_access(&self, path: &Path) {
        let canonical = scanner::canonicalize(path)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string_lossy().into_owned());

        let mut access = self.access.lock();
        *access.entry(canonical).or_insert(0) += 1;
        if let Err(e) = save_json(&self.config.index_dir, ACCESS_FILE, &*access) {
            warn!(error = %e, "failed to persist access counters");
        }
    }

    pub fn stats(&self) -> EngineStats {
        let store = self.store.read();
        let records = self.records.read();
        let now = Utc::now();

        let mut categories: HashMap<String, usize> = HashMap::new();
        let mut total_size = 0u64;
        let mut recent = 0usize;
        for record in records.iter() {
            *categories.entry(record.category.as_str().to_string()).or_insert(0) += 1;
            total_size += record.size_bytes;
            if (now - record.indexed_at).num_days() <= 7 {
                recent += 1;
            }
        }

        EngineStats {
            total_files: records.len(),
            total_size_mb: total_size as f64 / (1024.0 * 1024.0),
            vectors: store.len(),
            live_vectors: store.live_len(),
            tombstones: store.tombstone_count(),
            categories,
            indexed_last_7_days: recent,
            index_dir: self.config.index_dir.clone(),
        }
    }

    pub fn analytics(&self) -> SearchAnalytics {
        explain::analytics(&self.history.lock(), &self.access.lock(), Utc::now())
    }

    /// Removes every record whose path no longer resolves, tombstoning the
    /// corresponding slots, and checkpoints. Returns the removal count.
    pub fn cleanup(&self) -> EngineResult<usize> {
        let stale: Vec<String> = {
            let records = self.records.read();
            records
                .iter()
                .filter(|r| !Path::new(&r.path).exists())
                .map(|r| r.path.clone())
                .collect()
        };

        if !stale.is_empty() {
            let mut store = self.store.write();
            let mut records = self.records.write();
            for path in &stale {
                if let Some(record) = records.remove(path) {
                    store.tombstone(record.vector_slot);
                }
            }
            store.checkpoint(&self.config.index_dir)?;
            records.save(&self.config.index_dir)?;
            info!(removed = stale.len(), "cleanup removed stale records");
        }

        Ok(stale.len())
    }
}

fn validate_consistency(store: &VectorStore, records: &RecordTable) -> EngineResult<()> {
    if let Some(max_slot) = records.max_slot() {
        if max_slot >= store.len() {
            return Err(EngineError::CorruptIndex(format!(
                "record table points at slot {max_slot} but store holds {} vectors",
                store.len()
            )));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for record in records.iter() {
        if store.is_tombstoned(record.vector_slot) {
            return Err(EngineError::CorruptIndex(format!(
                "live record {} points at tombstoned slot {}",
                record.path, record.vector_slot
            )));
        }
        if !seen.insert(record.vector_slot) {
            return Err(EngineError::CorruptIndex(format!(
                "slot {} referenced by more than one record",
                record.vector_slot
            )));
        }
    }
    Ok(())
}

fn load_history(dir: &Path) -> VecDeque<SearchHistoryEntry> {
    match std::fs::read_to_string(dir.join(HISTORY_FILE)) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable search history, starting empty");
            VecDeque::new()
        }),
        Err(_) => VecDeque::new(),
    }
}

fn load_access(dir: &Path) -> HashMap<String, u64> {
    match std::fs::read_to_string(dir.join(ACCESS_FILE)) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable access counters, starting empty");
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

fn save_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> EngineResult<()> {
    std::fs::create_dir_all(dir)?;
    let target = dir.join(name);
    let tmp = target.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    std::fs::rename(&tmp, &target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::extract::PlainTextExtractor;

    fn open_engine(index_dir: &Path) -> Engine {
        Engine::open(
            EngineConfig::with_index_dir(index_dir),
            Box::new(PlainTextExtractor::new()),
            Box::new(HashingEmbedder::default()),
        )
        .unwrap()
    }

    #[test]
    fn fresh_open_then_reopen_after_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        {
            let engine = open_engine(&index_dir);
            let file = dir.path().join("a.txt");
            std::fs::write(&file, "quarterly revenue numbers").unwrap();
            engine.index(vec![file], None).unwrap();
        }
        let engine = open_engine(&index_dir);
        assert_eq!(engine.stats().total_files, 1);
        assert_eq!(engine.stats().vectors, 1);
    }

    #[test]
    fn partial_sidecar_set_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        {
            let engine = open_engine(&index_dir);
            let file = dir.path().join("a.txt");
            std::fs::write(&file, "content words").unwrap();
            engine.index(vec![file], None).unwrap();
        }
        std::fs::remove_file(index_dir.join(RECORDS_FILE)).unwrap();

        let err = Engine::open(
            EngineConfig::with_index_dir(&index_dir),
            Box::new(PlainTextExtractor::new()),
            Box::new(HashingEmbedder::default()),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::CorruptIndex(_)));
    }

    #[test]
    fn record_table_pointing_past_store_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        {
            let engine = open_engine(&index_dir);
            let file = dir.path().join("a.txt");
            std::fs::write(&file, "content words").unwrap();
            engine.index(vec![file], None).unwrap();
        }
        // Rewrite records.json with an out-of-range slot.
        let records_path = index_dir.join(RECORDS_FILE);
        let json = std::fs::read_to_string(&records_path).unwrap();
        let json = json.replace("\"vector_slot\": 0", "\"vector_slot\": 99");
        std::fs::write(&records_path, json).unwrap();

        let err = Engine::open(
            EngineConfig::with_index_dir(&index_dir),
            Box::new(PlainTextExtractor::new()),
            Box::new(HashingEmbedder::default()),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::CorruptIndex(_)));
    }

    #[test]
    fn empty_index_search_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir.path().join("index"));
        assert!(engine.search("anything at all", 10).unwrap().is_empty());
        assert!(engine.search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn access_counters_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        let target = dir.path().join("a.txt");
        std::fs::write(&target, "words").unwrap();
        {
            let engine = open_engine(&index_dir);
            engine.record_access(&target);
            engine.record_access(&target);
        }
        let engine = open_engine(&index_dir);
        let analytics = engine.analytics();
        assert_eq!(analytics.top_accessed.len(), 1);
        assert_eq!(analytics.top_accessed[0].access_count, 2);
    }

    #[test]
    fn search_records_history_for_analytics() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir.path().join("index"));
        engine.search("find recent notes", 5).unwrap();
        engine.search("budget report", 5).unwrap();

        let analytics = engine.analytics();
        assert_eq!(analytics.total_searches, 2);
        assert_eq!(analytics.searches_last_7_days, 2);
        assert_eq!(analytics.intent_frequencies["find"], 2);
        assert_eq!(analytics.intent_frequencies["recent"], 1);
    }
}
