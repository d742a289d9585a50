use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("Extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    #[error("File exceeds size limit: {path} ({size_mb:.1} MB)")]
    Oversize { path: String, size_mb: f64 },

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Timed out after {elapsed_ms}ms in {stage} for {path}")]
    Timeout {
        path: String,
        stage: &'static str,
        elapsed_ms: u64,
    },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Indexing cancelled")]
    Cancelled,
}

impl EngineError {
    /// Per-file errors are swallowed into run statistics; everything else
    /// aborts the operation that hit it.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            EngineError::Unsupported(_)
                | EngineError::ExtractionFailed { .. }
                | EngineError::Oversize { .. }
                | EngineError::EmbeddingFailed(_)
                | EngineError::Timeout { .. }
        )
    }

    /// Process exit code for the CLI wrapper.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::CorruptIndex(_) => 2,
            EngineError::Io(_) => 3,
            EngineError::Cancelled => 130,
            _ => 1,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
