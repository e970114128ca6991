use clap::Parser;
use pier_client_core::telemetry::logging;
use pier_client_core::terminal::{app, cli::Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&cli.logging.to_config()) {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }

    if let Err(err) = app::run(cli).await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }

    // The stdin reader can still be parked in a blocking read.
    std::process::exit(0);
}
