use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use transcript_core::config::default_data_dir;
use transcript_core::{EngineConfig, JsonSessionStore, NoopMirror, TranscriptSearchEngine};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Rebuild, verify and query the transcript search index", long_about = None)]
struct Cli {
    /// Directory of session documents (<session-id>.json)
    #[arg(long, default_value = "./sessions")]
    sessions: PathBuf,
    /// Index data directory (defaults to the per-user application data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop the index and reindex every session from the session directory
    Rebuild,
    /// Compare indexed sessions with the session directory; exits non-zero on mismatch
    Verify {
        /// Rebuild when the check fails
        #[arg(long, default_value_t = false)]
        repair: bool,
    },
    /// Print token, session and segment counts
    Stats,
    /// Run a query and print ranked sessions as JSON
    Search {
        #[arg(long)]
        q: String,
        /// Maximum results to print
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// Print matching segments of a single session as JSON
    Matches {
        #[arg(long)]
        session: String,
        #[arg(long)]
        q: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let store = Arc::new(JsonSessionStore::new(&cli.sessions));
    let engine = TranscriptSearchEngine::open(EngineConfig::with_data_dir(&data_dir), store, Arc::new(NoopMirror));

    match cli.command {
        Commands::Rebuild => {
            let report = engine.rebuild_all().await?;
            tracing::info!(indexed = report.indexed, errors = report.errors, data_dir = %data_dir.display(), "index rebuilt");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Verify { repair } => {
            if !engine.verify_index_integrity() {
                if !repair {
                    bail!("index does not match {}", cli.sessions.display());
                }
                let report = engine.rebuild_all().await?;
                tracing::info!(indexed = report.indexed, errors = report.errors, "index repaired");
                if !engine.verify_index_integrity() {
                    bail!("index still inconsistent after rebuild ({} sessions failed)", report.errors);
                }
            }
            println!("ok");
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&engine.get_index_stats())?);
        }
        Commands::Search { q, k } => {
            let start = std::time::Instant::now();
            let mut results = engine.search(&q);
            results.truncate(k.max(1));
            tracing::debug!(took_ms = start.elapsed().as_millis() as u64, hits = results.len(), "search complete");
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Matches { session, q } => {
            println!("{}", serde_json::to_string_pretty(&engine.get_matches_in_session(&session, &q))?);
        }
    }
    Ok(())
}
