mod cli;
mod config;
mod relay;
mod websocket;

use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{cli::Cli, config::Config, relay::RelayState, websocket::websocket_handler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = cli.apply(Config::from_env());

    let app = Router::new()
        .route("/", get(websocket_handler))
        .with_state(RelayState::new())
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!("pier relay listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("relay server stopped")?;
    Ok(())
}
