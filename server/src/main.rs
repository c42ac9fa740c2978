mod config;
mod interceptors;
mod logging;
mod services;

use anyhow::Context;
use clap::Parser;
use config::{Args, ServerConfig};
use joblib::{store, JobCatalog, RunController};
use services::AppState;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.log_level)?;
    let config = ServerConfig::load(&args)?;

    let state = build_state(&config)?;
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    info!(
        addr = %config.listen,
        commands_dir = %config.commands_dir.display(),
        store = ?config.store,
        "starting"
    );
    serve(listener, state).await
}

/// Open the log store and wire up the controller. A store that cannot be
/// opened is the one startup failure that stops the server.
fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let store = store::open(&config.store).context("failed to open run log store")?;
    let catalog = JobCatalog::new(&config.catalog()).context("invalid job catalog settings")?;
    Ok(AppState {
        controller: RunController::new(catalog, store, config.on_disconnect),
        page_size: config.page_size,
    })
}

async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = services::router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
