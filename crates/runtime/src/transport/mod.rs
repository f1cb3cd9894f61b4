//! Transports moving opaque [`ChannelMessage`]s between host and subprocess.
//!
//! A transport knows nothing about events or listeners: it delivers
//! `(channelName, channelMessage)` pairs and fans inbound messages out to the
//! callbacks registered for that channel name.
//!
//! Implementations:
//!
//! - [`PipeTransport`]: framed JSON over a byte stream (child stdio)
//! - [`InProcessTransport`]: two linked endpoints inside one process
//! - [`NativeTransport`]: adapter over a platform [`NativeBinding`]
//! - [`UnavailableTransport`]: fallback where no engine can run
//!
//! [`select_transport`] picks one for a [`Platform`].

use std::sync::Arc;

use dashmap::DashMap;
use nodebridge_protocol::ChannelMessage;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

mod memory;
mod native;
mod pipe;

pub use memory::InProcessTransport;
pub use native::{NativeBinding, NativeReceive, NativeTransport, UnavailableTransport};
pub use pipe::{Framing, MAX_FRAME_LEN, PipeTransport};

/// Callback invoked for every inbound message on a registered channel.
pub type ChannelCallback = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

/// Callback invoked once when the transport loses its link.
pub type DisconnectCallback = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

/// Why a transport stopped delivering messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
	/// The peer closed the link (EOF, dropped endpoint).
	Closed,
	/// The link broke with an I/O error.
	Failed(String),
}

impl std::fmt::Display for DisconnectReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DisconnectReason::Closed => f.write_str("closed"),
			DisconnectReason::Failed(reason) => write!(f, "failed: {reason}"),
		}
	}
}

/// Byte streams linking the host to a spawned subprocess: the IPC socket on
/// Unix, the child's stdin/stdout elsewhere.
pub struct ProcessStdio {
	/// Host -> subprocess.
	pub writer: Box<dyn AsyncWrite + Send + Unpin>,
	/// Subprocess -> host.
	pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl ProcessStdio {
	pub fn new<W, R>(writer: W, reader: R) -> Self
	where
		W: AsyncWrite + Send + Unpin + 'static,
		R: AsyncRead + Send + Unpin + 'static,
	{
		Self {
			writer: Box::new(writer),
			reader: Box::new(reader),
		}
	}
}

impl std::fmt::Debug for ProcessStdio {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProcessStdio").finish_non_exhaustive()
	}
}

/// Capability consumed by channels: move opaque messages across the process
/// boundary.
pub trait Transport: Send + Sync {
	/// Registers `callback` for inbound messages on `channel_name`.
	fn register_channel(&self, channel_name: &str, callback: ChannelCallback);

	/// Hands one message to the transport. No retry, no buffering beyond the
	/// transport's own outbound queue.
	fn emit(&self, message: ChannelMessage) -> Result<()>;

	/// Registers a callback fired when the link is lost. Registering after the
	/// link was lost fires immediately.
	fn on_disconnect(&self, callback: DisconnectCallback);

	/// Binds the transport to a freshly spawned subprocess. Transports whose
	/// link is established elsewhere ignore the streams.
	fn attach(&self, stdio: ProcessStdio) -> Result<()> {
		drop(stdio);
		Ok(())
	}

	/// Returns true while messages can be emitted.
	fn is_connected(&self) -> bool;
}

/// Fan-out of inbound messages and disconnect notifications, shared by every
/// transport implementation.
#[derive(Default)]
pub struct ChannelRouter {
	channels: DashMap<String, Vec<ChannelCallback>>,
	disconnect_callbacks: Mutex<Vec<DisconnectCallback>>,
	disconnected: Mutex<Option<DisconnectReason>>,
}

impl ChannelRouter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a callback for `channel_name`. Returns true if it is the first one
	/// for that name.
	pub fn register(&self, channel_name: &str, callback: ChannelCallback) -> bool {
		let mut entry = self.channels.entry(channel_name.to_string()).or_default();
		entry.push(callback);
		entry.len() == 1
	}

	/// Delivers `message` to every callback registered for its channel.
	///
	/// Unknown channel names are ignored.
	pub fn route(&self, message: ChannelMessage) {
		let callbacks = match self.channels.get(&message.channel_name) {
			Some(entry) => entry.value().clone(),
			None => {
				tracing::debug!(
					channel = %message.channel_name,
					"Message for unknown channel (ignored)"
				);
				return;
			}
		};

		for callback in callbacks {
			callback(message.clone());
		}
	}

	/// Registers a disconnect callback.
	pub fn on_disconnect(&self, callback: DisconnectCallback) {
		let disconnected = self.disconnected.lock();
		match disconnected.clone() {
			Some(reason) => {
				drop(disconnected);
				callback(&reason);
			}
			// Pushed while `disconnected` is held, so `disconnect` either saw
			// this callback or has not recorded the loss yet.
			None => self.disconnect_callbacks.lock().push(callback),
		}
	}

	/// Records the loss of the link and notifies callbacks. Only the first
	/// call has an effect.
	pub fn disconnect(&self, reason: DisconnectReason) {
		{
			let mut disconnected = self.disconnected.lock();
			if disconnected.is_some() {
				return;
			}
			*disconnected = Some(reason.clone());
		}

		tracing::debug!(%reason, "Transport disconnected");

		let callbacks = std::mem::take(&mut *self.disconnect_callbacks.lock());
		for callback in callbacks {
			callback(&reason);
		}
	}

	/// Returns the disconnect reason, if the link was lost.
	pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
		self.disconnected.lock().clone()
	}
}

/// Platform the host runs on, used to pick a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
	Android,
	Ios,
	Desktop,
	Web,
}

impl Platform {
	/// Returns the platform this binary was compiled for.
	pub fn current() -> Self {
		if cfg!(target_os = "android") {
			Platform::Android
		} else if cfg!(target_os = "ios") {
			Platform::Ios
		} else if cfg!(target_family = "wasm") {
			Platform::Web
		} else {
			Platform::Desktop
		}
	}

	/// Returns true for platforms that embed the engine through a native binding.
	pub fn is_mobile(self) -> bool {
		matches!(self, Platform::Android | Platform::Ios)
	}
}

/// Picks the transport for `platform`.
///
/// Mobile platforms need a `native` binding; without one the returned
/// transport reports [`Error::TransportUnavailable`](crate::Error::TransportUnavailable)
/// on every emit. Desktop uses a line-framed [`PipeTransport`] that is attached
/// to the engine's IPC channel once the subprocess is spawned.
pub fn select_transport(
	platform: Platform,
	native: Option<Arc<dyn NativeBinding>>,
) -> Arc<dyn Transport> {
	match (platform, native) {
		(Platform::Android | Platform::Ios, Some(binding)) => Arc::new(NativeTransport::new(binding)),
		(Platform::Android | Platform::Ios, None) => Arc::new(UnavailableTransport::new(
			"no native binding registered for this platform",
		)),
		(Platform::Desktop, _) => Arc::new(PipeTransport::new(Framing::Lines)),
		(Platform::Web, _) => Arc::new(UnavailableTransport::new(
			"Node.js engine not available in browser",
		)),
	}
}
