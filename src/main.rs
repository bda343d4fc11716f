/// Holdingpen server entry point
///
/// Loads configuration from the environment and serves:
/// - Object and action API at /api/objects/*
/// - External callbacks at /callback/workflows/*
/// - Error-chain diagnostics at /api/diagnostics/error-chains
/// - Health check at /healthz

use holdingpen::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
