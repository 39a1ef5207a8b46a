//! Malaria Inference Server
//!
//! HTTP API that serves a classifier bundle exported by `malaria_detect`:
//! image analysis, health and model information.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::state::AppState;

/// Malaria Inference Server
#[derive(Parser, Debug)]
#[command(name = "malaria-server")]
#[command(version)]
#[command(about = "HTTP inference API for the malaria cell classifier")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "MALARIA_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "MALARIA_HOST")]
    host: String,

    /// Directory holding malaria_model.mpk / malaria_model.json
    #[arg(long, default_value = "reports", env = "MALARIA_MODEL_DIR")]
    model_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Malaria Inference Server v{}", env!("CARGO_PKG_VERSION"));

    let model_dir = cli.model_dir.clone();
    let state = tokio::task::spawn_blocking(move || AppState::load(&model_dir)).await?;
    info!("  Model dir: {:?}", state.model_dir);
    info!("  Device:    {}", state.device);
    if !state.model_loaded() {
        warn!("Serving without a model; /analyze will report \"Model not loaded\"");
    }

    let app = routes::router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
