//! Content extraction boundary.
//!
//! Format-specific extractors live outside the engine; this module defines
//! the contract they satisfy plus the built-in plain-text adapter covering
//! the text, code and data extension families. Rich-document formats (PDF,
//! Office) return `Ok(None)` here and are left to external adapters.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::config::{self, Category};
use crate::error::{EngineError, EngineResult};

/// Successful extraction output. `content` is UTF-8; the pipeline truncates
/// it to [`config::MAX_EMBED_BYTES`] before vectorization.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub content: String,
    pub word_count: usize,
    pub category: Category,
    pub size_mb: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Adapter contract for format-specific extractors.
///
/// `Ok(None)` is a silent skip (unsupported type, empty content, encoding
/// defeat); `Err` is a hard failure. The pipeline treats both as skip and
/// keeps any prior record searchable.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> EngineResult<Option<ExtractedText>>;
}

/// Built-in extractor for files that are text on disk already.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn supports(category: Category) -> bool {
        matches!(category, Category::Text | Category::Code | Category::Data)
    }
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> EngineResult<Option<ExtractedText>> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let category = Category::from_extension(&ext);
        if !Self::supports(category) {
            return Ok(None);
        }

        let meta = std::fs::metadata(path)?;
        let bytes = std::fs::read(path)?;
        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            // Not valid UTF-8; salvage what we can rather than dropping the
            // file (mirrors multi-encoding fallback readers).
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        let content = content.trim().to_string();
        if content.is_empty() {
            return Ok(None);
        }

        Ok(Some(ExtractedText {
            word_count: content.split_whitespace().count(),
            category,
            size_mb: meta.len() as f64 / (1024.0 * 1024.0),
            created_at: meta.created().ok().map(DateTime::from),
            modified_at: meta.modified().ok().map(DateTime::from),
            content,
        }))
    }
}

/// Caps text fed to the embedder, respecting char boundaries.
pub fn truncate_for_embedding(content: &str) -> &str {
    if content.len() <= config::MAX_EMBED_BYTES {
        return content;
    }
    let mut end = config::MAX_EMBED_BYTES;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// First ~200 characters of extracted text, for record previews.
pub fn preview_of(content: &str) -> String {
    content.chars().take(200).collect()
}

/// Validates extraction output into the per-file error taxonomy: oversize
/// files are refused before any read happens.
pub fn check_size(path: &Path, size_bytes: u64, max_file_size_bytes: u64) -> EngineResult<()> {
    if size_bytes > max_file_size_bytes {
        return Err(EngineError::Oversize {
            path: path.display().to_string(),
            size_mb: size_bytes as f64 / (1024.0 * 1024.0),
        });
    }
    Ok(())
}
