use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Embedded text is truncated to this many bytes before vectorization so a
/// single giant file cannot stall an embedding worker.
pub const MAX_EMBED_BYTES: usize = 1024 * 1024;

/// Bounded search history kept for analytics.
pub const HISTORY_LIMIT: usize = 1000;

/// Extensions treated as plain prose.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "mdx", "rst", "log"];

/// Extensions treated as source code.
pub const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "html", "css", "scss",
    "java", "cpp", "c", "h", "hpp", "go", "rs", "php", "rb", "swift", "kt",
    "scala", "sh", "bash", "zsh", "sql", "vue", "svelte", "lua", "zig",
];

/// Extensions treated as structured data.
pub const DATA_EXTENSIONS: &[&str] = &[
    "json", "xml", "yaml", "yml", "toml", "csv", "tsv", "ini", "cfg", "conf",
];

/// Extensions treated as rich documents. Extracting these needs an external
/// adapter; the built-in extractor skips them.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "rtf", "odt", "xlsx", "xls"];

/// File category, derived from the extension alone. The pipeline never
/// sniffs MIME types, so the assignment is stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Text,
    Document,
    Code,
    Data,
    Other,
}

impl Category {
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if TEXT_EXTENSIONS.contains(&ext) {
            Category::Text
        } else if CODE_EXTENSIONS.contains(&ext) {
            Category::Code
        } else if DATA_EXTENSIONS.contains(&ext) {
            Category::Data
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            Category::Document
        } else {
            Category::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Text => "text",
            Category::Document => "document",
            Category::Code => "code",
            Category::Data => "data",
            Category::Other => "other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding vectors.bin, tombstones.bin, records.json,
    /// history.json and access.json.
    pub index_dir: PathBuf,
    /// Roots scanned when no explicit path set is given.
    pub include_dirs: Vec<PathBuf>,
    /// Directory names (or substrings of names) pruned during discovery.
    pub exclude_dirs: Vec<String>,
    /// Filename glob patterns skipped during discovery.
    pub skip_patterns: Vec<String>,
    /// Files larger than this are never extracted.
    pub max_file_size_mb: u64,
    /// Per-directory candidate cap during discovery.
    pub max_files_per_dir: usize,
    /// Extract/embed worker count.
    pub max_workers: usize,
    /// Commits between durable checkpoints.
    pub checkpoint_every: usize,
    /// Sample size for the content fingerprint.
    pub hash_sample_bytes: u64,
    /// Wall-clock cap for a single extraction.
    pub extraction_timeout_secs: u64,
    /// Wall-clock cap for a single embedding.
    pub embedding_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            include_dirs: default_include_dirs(),
            exclude_dirs: vec![
                "node_modules".into(),
                ".git".into(),
                "target".into(),
                "dist".into(),
                "build".into(),
                "__pycache__".into(),
                ".cache".into(),
                "venv".into(),
                ".venv".into(),
                ".Trash".into(),
            ],
            skip_patterns: vec![
                "*.tmp".into(),
                "*.temp".into(),
                "*.bak".into(),
                "*.swp".into(),
                "*.lock".into(),
                "*.so".into(),
                "*.dylib".into(),
                "*.dll".into(),
                "*.zip".into(),
                "*.tar".into(),
                "*.gz".into(),
                "*.db".into(),
                "*.sqlite".into(),
            ],
            max_file_size_mb: 50,
            max_files_per_dir: 1000,
            max_workers: 4,
            checkpoint_every: 10,
            hash_sample_bytes: 8192,
            extraction_timeout_secs: 30,
            embedding_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn with_index_dir(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            ..Self::default()
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn default_index_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SEMDEX_INDEX_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .map(|d| d.join("semdex"))
        .unwrap_or_else(|| PathBuf::from(".semdex"))
}

fn default_include_dirs() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    ["Documents", "Desktop", "Downloads", "Projects"]
        .iter()
        .map(|d| home.join(d))
        .collect()
}
