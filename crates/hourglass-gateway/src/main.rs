use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use hourglass_core::config::HourglassConfig;
use hourglass_scheduler::{ExecutorRegistry, JobService, JobStore, SchedulerEngine};
use tracing::{info, warn};

mod app;
mod http;

/// Job scheduling service: HTTP API plus the background scheduler engine.
#[derive(Debug, Parser)]
#[command(name = "hourglass-gateway", version, about)]
struct Cli {
    /// Path to hourglass.toml (defaults to ~/.hourglass/hourglass.toml).
    #[arg(short, long, env = "HOURGLASS_CONFIG")]
    config: Option<String>,

    /// Override `server.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `server.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override `database.path`.
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hourglass_gateway=info,hourglass_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // a missing file yields defaults; a malformed or invalid one is fatal
    let mut config = HourglassConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("config load failed: {e}"))?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    config
        .database
        .ensure_parent_dir()
        .map_err(|e| anyhow::anyhow!("cannot create database directory: {e}"))?;
    let db_path = &config.database.path;
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = Arc::new(JobStore::new(db)?);
    info!(jobs = store.count()?, "job store ready");

    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        Arc::new(ExecutorRegistry::with_builtins()),
        &config.scheduler,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, JobService::new(store)));
    let router = app::build_router(state);

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!("Hourglass gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop and let in-flight runs finish
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        warn!("scheduler engine task ended abnormally: {e}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
