use anyhow::Result;
use examforge_server::{logging, router, shutdown, telemetry, AppState, Config};
use examforge_storage::DataLayer;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    logging::init_logging(&config.log_level, config.log_format)?;

    let addr = config.addr()?;
    let shutdown_timeout = config.shutdown_timeout();
    info!(environment = %config.data.environment, "Starting ExamForge data layer");

    let metrics = telemetry::install_recorder()?;
    let data = Arc::new(DataLayer::builder(config.data).build()?);

    if let Err(e) = data.migrate().await {
        error!(error = %e, "Schema migration failed");
        return Err(e.into());
    }
    data.start().await;

    let app = router(AppState {
        data: data.clone(),
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    if tokio::time::timeout(shutdown_timeout, data.shutdown()).await.is_err() {
        warn!(timeout_secs = shutdown_timeout.as_secs(), "Data layer shutdown timed out");
    }
    info!("Server stopped");
    Ok(())
}
