//! Vectorization boundary.
//!
//! The engine only assumes the contract: a fixed dimension, L2-unit
//! outputs, and determinism on identical input. Two implementations ship
//! here: a dependency-free feature-hashing embedder (deterministic, used
//! by the test suite and as an offline fallback) and, behind the
//! `onnx-embedder` feature, a sentence-transformer adapter.

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{EngineError, EngineResult};

/// Dimension of the default embedding space. Matches all-MiniLM-L6-v2 so
/// the hashing fallback and the ONNX embedder produce interchangeable
/// index layouts.
pub const DEFAULT_DIM: usize = 384;

pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    /// Returns an L2-unit vector of `dim()` floats. Must be deterministic
    /// on identical input; the store does not re-check normalization.
    fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}

/// Signed feature-hashing bag of words: each token hashes to one bucket
/// with a hash-derived sign, counts accumulate, the result is normalized.
/// No model weights, fully deterministic, and overlapping vocabularies
/// still produce positive inner products.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vector = vec![0f32; self.dim];
        for token in tokenize(text) {
            let h = xxh3_64(token.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(vector)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

pub fn l2_normalize(mut vector: Vec<f32>) -> EngineResult<Vec<f32>> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(EngineError::EmbeddingFailed(
            "text produced a zero-norm vector".into(),
        ));
    }
    for v in &mut vector {
        *v /= norm;
    }
    Ok(vector)
}

#[cfg(feature = "onnx-embedder")]
pub use onnx::FastEmbedder;

#[cfg(feature = "onnx-embedder")]
mod onnx {
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use parking_lot::Mutex;

    use super::{DEFAULT_DIM, Embedder, l2_normalize};
    use crate::error::{EngineError, EngineResult};

    /// all-MiniLM-L6-v2 via fastembed's ONNX runtime. Weights download on
    /// first use and cache locally. The model is behind a mutex because the
    /// session is not shareable across threads.
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedder {
        pub fn new() -> EngineResult<Self> {
            let model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                    .with_show_download_progress(false),
            )
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn dim(&self) -> usize {
            DEFAULT_DIM
        }

        fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
            let mut out = self
                .model
                .lock()
                .embed(vec![text], None)
                .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;
            let vector = out
                .pop()
                .ok_or_else(|| EngineError::EmbeddingFailed("empty model output".into()))?;
            if vector.len() != DEFAULT_DIM {
                return Err(EngineError::DimensionMismatch {
                    expected: DEFAULT_DIM,
                    actual: vector.len(),
                });
            }
            l2_normalize(vector)
        }
    }
}
