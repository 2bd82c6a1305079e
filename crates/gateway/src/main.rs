//! coggate — the cognitive gateway binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use cg_gateway::{api, bootstrap};

#[derive(Parser, Debug)]
#[command(name = "coggate", about = "Cognitive gateway: turn orchestrator over LLM endpoints and tools")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "coggate.toml")]
    config: PathBuf,

    /// Log output as JSON instead of human-readable lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Arc::new(cg_domain::config::Config::load(&cli.config)?);
    let state = bootstrap::build_app_state(config.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "coggate listening");

    axum::serve(listener, api::router(state)).await?;
    Ok(())
}
