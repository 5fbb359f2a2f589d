use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};
use transcript_core::config::default_data_dir;
use transcript_core::{DirectoryMirror, EngineConfig, JsonSessionStore, NoopMirror, SystemSearchMirror, TranscriptSearchEngine};

#[derive(Parser)]
struct Args {
    /// Directory of session documents (<session-id>.json)
    #[arg(long, default_value = "./sessions")]
    sessions: PathBuf,
    /// Index data directory (defaults to the per-user application data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Mirror session content into this directory for desktop search
    #[arg(long)]
    mirror_dir: Option<PathBuf>,
    /// Debounce window for transcript updates, in milliseconds
    #[arg(long, default_value_t = 500)]
    debounce_ms: u64,
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = EngineConfig {
        debounce: std::time::Duration::from_millis(args.debounce_ms),
        ..EngineConfig::with_data_dir(args.data_dir.clone().unwrap_or_else(default_data_dir))
    };
    let store = Arc::new(JsonSessionStore::new(&args.sessions));
    let mirror: Arc<dyn SystemSearchMirror> = match &args.mirror_dir {
        Some(dir) => Arc::new(DirectoryMirror::new(dir)),
        None => Arc::new(NoopMirror),
    };
    let engine = TranscriptSearchEngine::open(config, store, mirror);

    // The snapshot may be missing, corrupt or stale; resync from the session store in the background.
    if !engine.verify_index_integrity() {
        let engine = engine.clone();
        tokio::spawn(async move {
            match engine.rebuild_all().await {
                Ok(report) => tracing::info!(indexed = report.indexed, errors = report.errors, "startup rebuild finished"),
                Err(err) => tracing::error!(error = %format!("{err:#}"), "startup rebuild failed"),
            }
        });
    }

    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app: Router = build_app(engine.clone(), admin_token);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let report = engine.flush_updates().await;
    tracing::info!(processed = report.processed, failed = report.failed, "pending updates flushed, shutting down");
    Ok(())
}
