use crate::config::parse::{load_config, ConfigError};
use crate::orchestrator::{self, OrchestratorError};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

/// Entry point for the default (no-subcommand) CLI behavior: load and
/// validate the config, then hand off to the orchestrator until a shutdown
/// signal arrives.
pub async fn run(config_path: Option<PathBuf>, do_not_send: bool) -> Result<(), RunError> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: no config file found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logmetrics-collector/config.yml");
            eprintln!("  /etc/logmetrics-collector/config.yml");
            eprintln!(
                "\nUse -c/--config <path> to specify a config file, or run \
                 'logmetrics-collector config init' to generate one."
            );
            std::process::exit(1);
        }
    };

    info!(config_path = %config_path.display(), "loading configuration");
    let config = load_config(&config_path)?;
    info!(log_groups = config.log_groups.len(), "configuration loaded");

    orchestrator::run(config, do_not_send).await?;
    info!("shutdown complete");
    Ok(())
}
