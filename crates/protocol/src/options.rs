//! Option and configuration structs for the host-facing API.
//!
//! These types use camelCase serde names so they can be read straight from a
//! host configuration document or a JSON call payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default directory of the embedded Node.js project, relative to the host's
/// web asset directory.
pub const DEFAULT_NODE_DIR: &str = "nodejs";

/// Entry file used when neither the start options nor `package.json` name one.
pub const DEFAULT_ENTRY_FILE: &str = "index.js";

/// Config sections searched, in order, under `plugins`.
pub const CONFIG_SECTIONS: [&str; 2] = ["CapacitorNodeJS", "NodeJS"];

/// Environment variables passed to the subprocess.
pub type NodeEnv = BTreeMap<String, String>;

/// How the Node.js engine is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
	/// The engine starts as soon as the bridge is launched.
	#[default]
	Auto,
	/// The engine starts only through an explicit `start` call.
	Manual,
}

/// Options for starting the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
	/// Project directory relative to the asset directory. Defaults to the
	/// configured `nodeDir`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub node_dir: Option<String>,

	/// Entry module relative to the project root. Defaults to the `main` field
	/// of `package.json`, then `index.js`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub script: Option<String>,

	/// Arguments passed to the entry module.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub args: Vec<String>,

	/// Extra environment variables. Entries with empty keys or values are
	/// dropped when the process is spawned.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub env: NodeEnv,
}

impl StartOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the project directory.
	pub fn node_dir(mut self, node_dir: impl Into<String>) -> Self {
		self.node_dir = Some(node_dir.into());
		self
	}

	/// Sets the entry script.
	pub fn script(mut self, script: impl Into<String>) -> Self {
		self.script = Some(script.into());
		self
	}

	/// Appends an argument.
	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	/// Sets an environment variable.
	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.insert(key.into(), value.into());
		self
	}
}

/// Bridge settings read from the host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
	/// Project directory relative to the asset directory.
	pub node_dir: String,
	/// Startup mode of the engine.
	pub start_mode: StartMode,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			node_dir: DEFAULT_NODE_DIR.to_string(),
			start_mode: StartMode::Auto,
		}
	}
}

impl BridgeConfig {
	/// Reads the bridge section of a Capacitor-style config document.
	///
	/// Looks under `plugins.CapacitorNodeJS`, then `plugins.NodeJS`. A document
	/// without either section yields the defaults.
	pub fn from_capacitor_config(document: &Value) -> Result<Self, serde_json::Error> {
		let section = CONFIG_SECTIONS
			.iter()
			.find_map(|name| document.get("plugins").and_then(|p| p.get(*name)));

		match section {
			Some(section) => serde_json::from_value(section.clone()),
			None => Ok(Self::default()),
		}
	}

	/// Sets the project directory.
	pub fn node_dir(mut self, node_dir: impl Into<String>) -> Self {
		self.node_dir = node_dir.into();
		self
	}

	/// Sets the start mode.
	pub fn start_mode(mut self, start_mode: StartMode) -> Self {
		self.start_mode = start_mode;
		self
	}
}

/// Host request to send an event to the subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
	pub event_name: String,
	/// Missing arguments are sent as an empty list.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub args: Option<Vec<Value>>,
}

impl EventPayload {
	pub fn new(event_name: impl Into<String>, args: Vec<Value>) -> Self {
		Self {
			event_name: event_name.into(),
			args: Some(args),
		}
	}

	/// Creates a payload without arguments.
	pub fn bare(event_name: impl Into<String>) -> Self {
		Self {
			event_name: event_name.into(),
			args: None,
		}
	}
}

/// Data handed to host listeners when an event arrives from the subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCallbackData {
	pub args: Vec<Value>,
}
