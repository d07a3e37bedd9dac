mod config;
mod errors;
mod routes;
mod state;

use anyhow::Context;
use clap::Parser;
use config::CoordinatorConfig;
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "graphmesh-coordinator")]
#[command(about = "Graphmesh coordination service", long_about = None)]
struct Cli {
    /// Path to the configuration file (default: ~/.graphmesh/coordinator.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Write a default configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
        None => CoordinatorConfig::default_path()?,
    };

    if cli.generate_config {
        let config = CoordinatorConfig::default();
        config.save(&config_path)?;
        println!("wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let mut config = if config_path.exists() {
        CoordinatorConfig::load(&config_path)
            .with_context(|| format!("loading configuration from {}", config_path.display()))?
    } else {
        CoordinatorConfig::default()
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let state = Arc::new(AppState::new(Duration::from_secs(config.stale_after_secs)));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("coordinator shutting down");
        })
        .await
        .context("serving")?;
    Ok(())
}
