use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use issue_mirror::config::AppConfig;
use issue_mirror::coordinator::{CoordinatorRegistry, FileStateStore};
use issue_mirror::github::{HttpImageFetcher, OctocrabHistory};
use issue_mirror::orchestrator::SyncOrchestrator;
use issue_mirror::server::{AppState, build_router};
use issue_mirror::tracker::AsanaClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,issue_mirror=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;

    let tracker = Arc::new(AsanaClient::new(config.asana.clone()).context("building tracker client")?);
    let fetcher = Arc::new(
        HttpImageFetcher::new(config.github_token.clone()).context("building image fetcher")?,
    );
    let history = Arc::new(
        OctocrabHistory::from_token(config.github_token.clone()).context("building GitHub client")?,
    );
    let orchestrator = Arc::new(SyncOrchestrator::new(tracker, fetcher, &config.sync));

    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .with_context(|| format!("creating state directory {}", config.state_dir.display()))?;
    let store = Arc::new(FileStateStore::new(&config.state_dir));

    let registry = Arc::new(CoordinatorRegistry::new(orchestrator, store, config.coordinator));
    let sweeper = registry.spawn_sweeper();

    let app = build_router(AppState::new(
        registry.clone(),
        history,
        config.webhook_secret.as_bytes().to_vec(),
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        project = %config.sync.project,
        state_dir = %config.state_dir.display(),
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    registry.shutdown();
    sweeper.await.context("joining sweeper")?;
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
