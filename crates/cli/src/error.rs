use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("invalid config {}: {source}", path.display())]
	Config {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("engine did not signal readiness within {0}s")]
	ReadyTimeout(u64),

	#[error("engine exited before it was ready (exit code {})", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
	EngineExited { code: Option<i32> },

	#[error(transparent)]
	Bridge(#[from] nodebridge::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Process exit code for this error.
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::InvalidArgument(_) | CliError::Config { .. } => 2,
			CliError::Bridge(e) if e.is_launch() => 3,
			CliError::ReadyTimeout(_) | CliError::EngineExited { .. } => 4,
			_ => 1,
		}
	}
}
