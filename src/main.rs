/// Chainflow: trigger-driven onchain workflow automation engine
///
/// Main entry point. Loads configuration from the environment and starts
/// the HTTP server with the workflow API, trigger scheduler and execution
/// engine.

use chainflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Execution trigger and audit API at /api/workflows/{id}/execute,
///   /api/executions/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    start_server(config).await?;
    Ok(())
}
