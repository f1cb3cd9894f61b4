//! Host configuration read from a Capacitor-style config document.

use std::path::{Path, PathBuf};

use anyhow::Context;
use nodebridge::BridgeConfig;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CliError, Result};

/// App id used for the data directory when the config names none.
pub const DEFAULT_APP_ID: &str = "nodebridge";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
	pub app_id: String,
	/// `webDir`, resolved against the config file's directory.
	pub web_dir: Option<PathBuf>,
	#[serde(flatten)]
	pub bridge: BridgeConfig,
}

impl Default for HostConfig {
	fn default() -> Self {
		Self {
			app_id: DEFAULT_APP_ID.to_string(),
			web_dir: None,
			bridge: BridgeConfig::default(),
		}
	}
}

impl HostConfig {
	/// Loads `path`, or returns defaults when no file is given.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let Some(path) = path else {
			return Ok(Self::default());
		};

		let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
		let document: Value = serde_json::from_str(&contents).map_err(|source| CliError::Config {
			path: path.to_path_buf(),
			source,
		})?;

		let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
		Self::from_document(&document, config_dir).map_err(|source| CliError::Config {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Reads `appId`, `webDir`, and the plugin section of `document`.
	pub fn from_document(document: &Value, config_dir: &Path) -> std::result::Result<Self, serde_json::Error> {
		let bridge = BridgeConfig::from_capacitor_config(document)?;
		let app_id = document
			.get("appId")
			.and_then(Value::as_str)
			.filter(|id| !id.is_empty())
			.unwrap_or(DEFAULT_APP_ID)
			.to_string();
		let web_dir = document
			.get("webDir")
			.and_then(Value::as_str)
			.map(|dir| config_dir.join(dir));

		Ok(Self {
			app_id,
			web_dir,
			bridge,
		})
	}

	/// Per-user data directory for this app.
	pub fn default_data_dir(&self) -> PathBuf {
		dirs::data_dir()
			.unwrap_or_else(std::env::temp_dir)
			.join(&self.app_id)
	}
}
