//! ghost: memory-aware chat service.

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ghost_protocol::{api, db, db_call, embed_backfill, AppState};

#[derive(Parser)]
#[command(name = "ghost", version, about = "Memory-aware chat service with tool calling")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3917", env = "GHOST_PORT")]
    port: u16,

    /// SQLite database path (`:memory:` for a throwaway store)
    #[arg(short, long, default_value = "ghost.db", env = "GHOST_DB")]
    db: String,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mdb = db::MemoryDB::open(&args.db).expect("failed to open database");
    let state = AppState::from_env(mdb);
    let app = api::router(state.clone());

    // retention purge of soft-deleted memories
    let purge_mins = env_u64("GHOST_PURGE_MINS", 60);
    let retention_days = env_u64("GHOST_RETENTION_DAYS", 30);
    if purge_mins > 0 {
        let bg = state.clone();
        tokio::spawn(async move {
            let interval = Duration::from_secs(purge_mins.saturating_mul(60));
            let retention_ms = (retention_days.saturating_mul(86_400_000)).min(i64::MAX as u64) as i64;
            loop {
                let cutoff = db::now_ms().saturating_sub(retention_ms);
                match db_call(&bg.db, move |db| db.purge_deleted(cutoff)).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(n)) => info!(purged = n, retention_days, "purged deleted memories"),
                    Ok(Err(e)) | Err(e) => warn!(error = %e, "purge failed"),
                }
                tokio::time::sleep(interval).await;
            }
        });
        info!(every_mins = purge_mins, retention_days, "background purge enabled");
    }

    // expire finished tool executions
    let sweep_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let n = sweep_state.tracker.sweep();
            if n > 0 {
                tracing::debug!(expired = n, "tool executions swept");
            }
        }
    });

    // embed memories stored while the embedding backend was unavailable
    if state.embed.is_some() {
        let bf = state.clone();
        tokio::spawn(async move {
            loop {
                match embed_backfill(&bf, 64).await {
                    Ok(0) => break,
                    Ok(n) => info!(embedded = n, "embedding backfill"),
                    Err(e) => {
                        warn!(error = %e, "embedding backfill failed");
                        break;
                    }
                }
            }
        });
    }

    let providers = state
        .llm
        .as_ref()
        .map(|c| c.providers.iter().map(|p| p.provider.name()).collect::<Vec<_>>().join(","))
        .unwrap_or_else(|| "none".into());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        providers = %providers,
        embeddings = state.embed.is_some(),
        auth = state.api_key.is_some(),
        approval = state.require_approval,
        "ghost starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
