mod config;
pub mod run;

use crate::cli::{Cli, Commands};
use crate::config::HostConfig;
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = HostConfig::load(cli.config.as_deref())?;
	tracing::debug!(app_id = %config.app_id, node_dir = %config.bridge.node_dir, "Loaded host config");

	match cli.command {
		Commands::Run(args) => run::execute(args, config).await,
		Commands::Config => config::execute(&config),
	}
}
