use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "nodebridge")]
#[command(about = "Run a Node.js project behind a nodebridge host")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Capacitor-style config file (JSON) with a `plugins.CapacitorNodeJS` section
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start the engine, forward events, and print inbound events as JSON lines
	Run(RunArgs),

	/// Print the effective bridge configuration
	Config,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
	/// Directory containing the Node.js project directory
	#[arg(long, value_name = "DIR")]
	pub base_dir: Option<PathBuf>,

	/// Project directory name under the base directory (overrides `nodeDir`)
	#[arg(long, value_name = "NAME")]
	pub node_dir: Option<String>,

	/// Entry script relative to the project directory
	#[arg(long, value_name = "FILE")]
	pub script: Option<String>,

	/// Modules directory appended to NODE_PATH
	#[arg(long, value_name = "DIR")]
	pub modules_dir: Option<PathBuf>,

	/// Writable data directory exposed as DATADIR
	#[arg(long, value_name = "DIR")]
	pub data_dir: Option<PathBuf>,

	/// Environment entry for the engine (repeatable)
	#[arg(short, long = "env", value_name = "KEY=VALUE")]
	pub env: Vec<String>,

	/// Start the engine manually with the given options (overrides `startMode`)
	#[arg(long)]
	pub manual: bool,

	/// Event name to print when received (repeatable)
	#[arg(short, long = "listen", value_name = "EVENT")]
	pub listen: Vec<String>,

	/// Event to send once ready, optionally with JSON arguments (repeatable)
	#[arg(short, long = "send", value_name = "EVENT[=JSON]")]
	pub send: Vec<String>,

	/// Seconds to wait for the engine's ready signal
	#[arg(long, value_name = "SECS", default_value_t = 30)]
	pub ready_timeout: u64,

	/// Arguments passed to the entry script
	#[arg(last = true, value_name = "ARGS")]
	pub args: Vec<String>,
}

impl RunArgs {
	/// Returns true if any option only honored by a manual start was given.
	pub fn has_start_options(&self) -> bool {
		self.node_dir.is_some() || self.script.is_some() || !self.env.is_empty() || !self.args.is_empty()
	}
}
