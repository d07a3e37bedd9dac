use anyhow::Context;
use clap::Parser;
use graphmesh_agent::config::AgentConfig;
use graphmesh_agent::coordination::HttpCoordination;
use graphmesh_agent::manager::PeerManager;
use graphmesh_agent::observability::{init_production_logging, init_simple_logging};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "graphmesh-agent")]
#[command(about = "Graphmesh peer agent", long_about = None)]
struct Cli {
    /// Path to the configuration file (default: ~/.graphmesh/agent.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Write a default configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
        None => AgentConfig::default_path()?,
    };

    if cli.generate_config {
        init_simple_logging("info")?;
        let config = AgentConfig::default();
        config.save(&config_path)?;
        println!("wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
        .to_string();
    if config.logging.log_to_file {
        let log_dir = config
            .logging
            .log_dir
            .as_deref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).into_owned()));
        init_production_logging(&level, log_dir)?;
    } else {
        init_simple_logging(&level)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.peer.worker_threads)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async move {
        let coordination = Arc::new(HttpCoordination::new(
            config.coordination.url.clone(),
            config.request_timeout(),
        )?);
        let manager = PeerManager::start(config, coordination).await?;
        tracing::info!(
            peer_id = %manager.peer_id(),
            addr = %manager.addr(),
            "agent running; press ctrl-c to stop"
        );

        tokio::signal::ctrl_c()
            .await
            .context("waiting for ctrl-c")?;
        manager.shutdown().await;
        Ok(())
    })
}
