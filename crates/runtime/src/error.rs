//! Error types for the nodebridge runtime.

use std::path::PathBuf;

use nodebridge_protocol::CodecError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the nodebridge runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// A required argument was empty or missing.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// `start` was called after the engine had already been started.
	#[error("The Node.js engine has already been started.")]
	AlreadyStarted,

	/// An operation needs the engine to be started first.
	#[error("The Node.js engine has not been started yet.")]
	NotStarted,

	/// The engine was started but has not signaled readiness.
	#[error("The Node.js engine is not ready yet.")]
	NotReady,

	/// `start` was called while the bridge is configured for automatic startup.
	#[error("Manual startup of the Node.js engine is not enabled.")]
	ManualStartDisabled,

	/// A payload could not be encoded or decoded.
	#[error("Malformed payload: {0}")]
	MalformedPayload(String),

	/// No link to the subprocess has been established.
	#[error("Transport unavailable: {0}")]
	TransportUnavailable(String),

	/// Transport-level I/O failure.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Waiting for an event took too long.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// An internal channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Node.js executable could not be located.
	#[error("Node.js executable not found. Install Node.js or set NODEBRIDGE_NODE_EXE.")]
	NodeNotFound,

	/// Failed to launch the subprocess.
	#[error("Failed to launch the Node.js engine: {0}")]
	LaunchFailed(String),

	/// The Node.js project directory does not exist.
	#[error("Unable to access the Node.js project at {}. (No such directory)", .0.display())]
	ProjectNotFound(PathBuf),

	/// The entry script of the project does not exist.
	#[error("Unable to access main script of the Node.js project at {}. (No such file)", .0.display())]
	EntryNotFound(PathBuf),

	/// `package.json` of the project could not be read.
	#[error("Failed to read the package.json file of the Node.js project: {0}")]
	PackageJson(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl From<CodecError> for Error {
	fn from(err: CodecError) -> Self {
		Error::MalformedPayload(err.to_string())
	}
}

impl Error {
	/// Returns true for lifecycle ordering violations.
	pub fn is_lifecycle(&self) -> bool {
		matches!(
			self,
			Error::AlreadyStarted | Error::NotStarted | Error::NotReady | Error::ManualStartDisabled
		)
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if the subprocess link is missing or broken.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			Error::TransportUnavailable(_) | Error::TransportError(_) | Error::ChannelClosed
		)
	}

	/// Returns true if the engine could not be launched.
	pub fn is_launch(&self) -> bool {
		matches!(
			self,
			Error::NodeNotFound
				| Error::LaunchFailed(_)
				| Error::ProjectNotFound(_)
				| Error::EntryNotFound(_)
				| Error::PackageJson(_)
		)
	}
}
