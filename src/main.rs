use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use media_worker::app;
use media_worker::config::settings::AppConfig;
use media_worker::infrastructure::engine::FfmpegEngine;
use media_worker::infrastructure::fetch::HttpFetcher;
use media_worker::infrastructure::storage::Workspace;
use media_worker::infrastructure::store::InMemoryJobStore;
use media_worker::modules::job::repository::JobRepository;
use media_worker::state::AppState;
use media_worker::workers::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("media_worker=info,tower_http=info")),
        )
        .init();

    info!("Starting media worker...");

    let config = AppConfig::new().context("invalid configuration")?;
    info!(
        "⚙️ {} worker slot(s), formats [{}]",
        config.worker_slots,
        config.formats.descriptors().join(", ")
    );

    let workspace = Workspace::new(&config.work_dir);
    workspace
        .ensure_root()
        .await
        .with_context(|| format!("cannot create working directory {:?}", config.work_dir))?;

    let store: Arc<dyn JobRepository> = Arc::new(InMemoryJobStore::new());
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch_user_agent)?);
    let engine = Arc::new(FfmpegEngine::new(&config.ffmpeg_bin));

    let scheduler = Scheduler::start(
        SchedulerConfig::from(&config),
        store.clone(),
        fetcher,
        engine,
        workspace,
    );

    let port = config.server_port;
    let state = AppState::new(config, store, scheduler.clone());
    let app = app::create_app(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("🌐 Server running on http://{}", addr);
    info!("📚 Swagger UI at http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}
