use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use semdex::engine::Engine;
use semdex::error::EngineError;
use semdex::extract::PlainTextExtractor;
use semdex::{Embedder, EngineConfig};

#[derive(Parser)]
#[command(name = "semdex", version, about = "Local semantic file search")]
struct Cli {
    /// Index directory (default: platform data dir, or $SEMDEX_INDEX_DIR)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and index paths (defaults to the configured include dirs)
    Index {
        /// Files or directories to index
        paths: Vec<PathBuf>,
        /// Parallel worker count
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Search the index
    Search {
        query: String,
        /// Number of results
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Proactive file suggestions
    Suggest {
        /// Optional context hint
        hint: Option<String>,
    },
    /// Record a user-driven open of a file (feeds the access signal)
    RecordAccess { path: PathBuf },
    /// Index statistics and search analytics
    Stats,
    /// Drop records for files that no longer exist
    Cleanup,
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "semdex=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let mut config = EngineConfig::default();
    if let Some(dir) = cli.index_dir {
        config.index_dir = dir;
    }

    let embedder: Box<dyn Embedder> = default_embedder();
    let engine = match Engine::open(config, Box::new(PlainTextExtractor::new()), embedder) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("failed to open index: {e}");
            return e.exit_code();
        }
    };

    match cli.command {
        Command::Index { paths, workers } => {
            // Ctrl-C flips the cooperative cancel flag; the pipeline drains
            // committed work and writes a final checkpoint before exiting.
            let cancel_engine = engine.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, finishing committed work");
                    cancel_engine.request_cancel();
                }
            });

            let worker = engine.clone();
            let result = tokio::task::spawn_blocking(move || {
                if paths.is_empty() {
                    worker.index_configured(workers)
                } else {
                    worker.index(paths, workers)
                }
            })
            .await
            .expect("indexing task panicked");

            match result {
                Ok(stats) => {
                    println!(
                        "indexed {} of {} candidates ({} unchanged, {} errors) in {} ms",
                        stats.processed,
                        stats.total_candidates,
                        stats.skipped_unchanged,
                        stats.errors,
                        stats.duration_ms
                    );
                    0
                }
                Err(e) => report(e),
            }
        }
        Command::Search { query, k } => match engine.search(&query, k) {
            Ok(results) => {
                if results.is_empty() {
                    println!("no results");
                }
                for (i, result) in results.iter().enumerate() {
                    println!("{:2}. {}  [{:.3}]", i + 1, result.path, result.score);
                    println!("    {}", result.explanation);
                }
                0
            }
            Err(e) => report(e),
        },
        Command::Suggest { hint } => match engine.suggest(hint.as_deref()) {
            Ok(results) => {
                for result in &results {
                    println!("{}  [{:.3}]", result.path, result.score);
                }
                0
            }
            Err(e) => report(e),
        },
        Command::RecordAccess { path } => {
            engine.record_access(&path);
            0
        }
        Command::Stats => {
            let stats = engine.stats();
            let analytics = engine.analytics();
            match serde_json::to_string_pretty(&serde_json::json!({
                "index": stats,
                "search": analytics,
            })) {
                Ok(json) => {
                    println!("{json}");
                    0
                }
                Err(e) => report(EngineError::Serde(e)),
            }
        }
        Command::Cleanup => match engine.cleanup() {
            Ok(removed) => {
                println!("removed {removed} stale records");
                0
            }
            Err(e) => report(e),
        },
    }
}

fn report(e: EngineError) -> i32 {
    error!("{e}");
    e.exit_code()
}

// The two embedders share dimension but not a vector space, so there is
// no silent fallback between them: an index is built and queried with one.
#[cfg(feature = "onnx-embedder")]
fn default_embedder() -> Box<dyn Embedder> {
    match semdex::embed::FastEmbedder::new() {
        Ok(embedder) => Box::new(embedder),
        Err(e) => {
            error!("ONNX embedder unavailable: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(not(feature = "onnx-embedder"))]
fn default_embedder() -> Box<dyn Embedder> {
    Box::new(semdex::embed::HashingEmbedder::default())
}
