//! Per-path change classification against the record table.
//!
//! The hash comparison is mandatory, not an optimization: some tools
//! rewrite files with a preserved mtime, and mtime resolution varies by
//! filesystem. Size and mtime only serve as cheap pre-checks.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::EngineResult;
use crate::records::{self, RecordTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Record exists and size, mtime and content hash all agree.
    Unchanged,
    /// No record for this path.
    New,
    /// Record exists but the file differs (or could not be inspected).
    Modified,
}

/// Snapshot of the filesystem facts gathered while classifying, reused by
/// the pipeline so each file is stat'd and hashed once per run.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    pub content_hash: String,
}

pub fn inspect(path: &Path, hash_sample_bytes: u64) -> EngineResult<Inspection> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta.modified().map(DateTime::<Utc>::from)?;
    Ok(Inspection {
        size_bytes: meta.len(),
        mtime,
        content_hash: records::content_hash(path, hash_sample_bytes)?,
    })
}

/// Classifies a candidate path. Any I/O error during inspection classifies
/// as `Modified` so the file is re-indexed rather than silently dropped;
/// the inspection is then retried (and the error surfaced per-file) in the
/// extraction stage.
pub fn classify(
    path: &Path,
    canonical: &str,
    table: &RecordTable,
    hash_sample_bytes: u64,
) -> (Change, Option<Inspection>) {
    let Some(record) = table.get(canonical) else {
        return match inspect(path, hash_sample_bytes) {
            Ok(info) => (Change::New, Some(info)),
            Err(e) => {
                warn!(path = %canonical, error = %e, "inspection failed, re-indexing");
                (Change::New, None)
            }
        };
    };

    let info = match inspect(path, hash_sample_bytes) {
        Ok(info) => info,
        Err(e) => {
            warn!(path = %canonical, error = %e, "inspection failed, re-indexing");
            return (Change::Modified, None);
        }
    };

    let unchanged = info.size_bytes == record.size_bytes
        && info.mtime <= record.mtime
        && info.content_hash == record.content_hash;

    if unchanged {
        (Change::Unchanged, Some(info))
    } else {
        (Change::Modified, Some(info))
    }
}
