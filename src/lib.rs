//! semdex: a local, incremental semantic search index over your files.
//!
//! The [`engine::Engine`] owns all index state and exposes the full
//! command surface (index, search, suggest, stats, cleanup, access
//! tracking). Content extraction and vectorization are adapter traits so
//! front-ends can plug in their own formats and models.

pub mod change;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod explain;
pub mod extract;
pub mod pipeline;
pub mod query;
pub mod rank;
pub mod records;
pub mod scanner;
pub mod store;

pub use config::{Category, EngineConfig};
pub use embed::{Embedder, HashingEmbedder};
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, EngineResult};
pub use extract::{ExtractedText, Extractor, PlainTextExtractor};
pub use pipeline::IndexStats;
pub use rank::RankedResult;
