//! Weighted score fusion over the per-candidate signal bag. Every signal is
//! an explicit value in [0, 1] with a neutral default; no signal is allowed
//! to fall back implicitly.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Category;
use crate::query::{FileTypeHint, Intent};

pub const WEIGHT_SEMANTIC: f64 = 0.40;
pub const WEIGHT_RECENCY: f64 = 0.20;
pub const WEIGHT_FILE_TYPE: f64 = 0.15;
pub const WEIGHT_FILENAME: f64 = 0.15;
pub const WEIGHT_ACCESS: f64 = 0.10;

/// One search hit before ranking: the deduplicated best semantic score for
/// a path plus the record facts the signals need.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: String,
    pub filename: String,
    pub category: Category,
    pub modified_at: DateTime<Utc>,
    /// Best raw inner product across all expansion queries, in [-1, 1].
    pub semantic_raw: f32,
    /// `None` when no access tracking is available at all.
    pub access_count: Option<u64>,
    pub preview: String,
    pub word_count: usize,
    pub size_bytes: u64,
}

/// Component scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Signals {
    pub semantic: f64,
    pub recency: f64,
    pub file_type: f64,
    pub filename: f64,
    pub access: f64,
}

impl Signals {
    pub fn compute(candidate: &Candidate, query: &str, intent: &Intent, now: DateTime<Utc>) -> Self {
        Self {
            semantic: semantic_score(candidate.semantic_raw),
            recency: recency_score(candidate.modified_at, intent, now),
            file_type: file_type_score(candidate.category, &intent.file_type_hints),
            filename: filename_score(&candidate.filename, query),
            access: access_score(candidate.access_count),
        }
    }

    pub fn final_score(&self) -> f64 {
        let sum = self.semantic * WEIGHT_SEMANTIC
            + self.recency * WEIGHT_RECENCY
            + self.file_type * WEIGHT_FILE_TYPE
            + self.filename * WEIGHT_FILENAME
            + self.access * WEIGHT_ACCESS;
        sum.clamp(0.0, 1.0)
    }
}

/// A fully ranked hit as returned to front-ends. The explanation is filled
/// in by the explainer after ranking.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub path: String,
    pub filename: String,
    pub score: f64,
    pub signals: Signals,
    pub explanation: String,
    pub preview: String,
    pub category: Category,
    pub modified_at: DateTime<Utc>,
    pub word_count: usize,
    pub size_bytes: u64,
}

/// Scores and orders candidates. Ordering is deterministic: final score
/// descending, ties by larger semantic score, then lexicographic path.
pub fn rank(
    candidates: Vec<Candidate>,
    query: &str,
    intent: &Intent,
    now: DateTime<Utc>,
) -> Vec<RankedResult> {
    let mut results: Vec<RankedResult> = candidates
        .into_iter()
        .map(|c| {
            let signals = Signals::compute(&c, query, intent, now);
            RankedResult {
                score: signals.final_score(),
                signals,
                path: c.path,
                filename: c.filename,
                explanation: String::new(),
                preview: c.preview,
                category: c.category,
                modified_at: c.modified_at,
                word_count: c.word_count,
                size_bytes: c.size_bytes,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.signals.semantic.total_cmp(&a.signals.semantic))
            .then_with(|| a.path.cmp(&b.path))
    });
    results
}

/// Raw inner product rescaled from [-1, 1] into [0, 1].
fn semantic_score(raw: f32) -> f64 {
    (((raw as f64) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Step function of file age, only active when the query asked for recent
/// material; otherwise neutral.
fn recency_score(modified_at: DateTime<Utc>, intent: &Intent, now: DateTime<Utc>) -> f64 {
    if !intent.needs_recent_files {
        return 0.5;
    }
    let age_days = (now - modified_at).num_days().max(0);
    match age_days {
        0 => 1.0,
        1 => 0.8,
        2..=7 => 0.6,
        8..=30 => 0.4,
        _ => 0.2,
    }
}

fn file_type_score(category: Category, hints: &[FileTypeHint]) -> f64 {
    if hints.is_empty() {
        return 0.5;
    }
    let matched = hints.iter().any(|hint| match hint {
        FileTypeHint::Document => matches!(category, Category::Document | Category::Text),
        FileTypeHint::Data => category == Category::Data,
        FileTypeHint::Code => category == Category::Code,
        FileTypeHint::Text => category == Category::Text,
    });
    if matched { 1.0 } else { 0.3 }
}

/// Exact token overlap scores |overlap| / |query tokens|; failing that,
/// each query token appearing as a substring of the filename contributes
/// 0.5, normalized and clipped to 1.0.
fn filename_score(filename: &str, query: &str) -> f64 {
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let filename_lower = filename.to_lowercase();
    let filename_tokens = tokens(&filename_lower);

    let overlap = query_tokens
        .iter()
        .filter(|t| filename_tokens.contains(t))
        .count();
    if overlap > 0 {
        return overlap as f64 / query_tokens.len() as f64;
    }

    let substring_hits = query_tokens
        .iter()
        .filter(|t| filename_lower.contains(t.as_str()))
        .count();
    (0.5 * substring_hits as f64 / query_tokens.len() as f64).min(1.0)
}

fn access_score(count: Option<u64>) -> f64 {
    match count {
        None => 0.5,
        Some(0) => 0.3,
        Some(1..=2) => 0.6,
        Some(3..=5) => 0.8,
        Some(_) => 1.0,
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}
