//! Adapters for platform-provided links.

use std::sync::Arc;

use dashmap::DashSet;
use nodebridge_protocol::ChannelMessage;

use super::{ChannelCallback, ChannelRouter, DisconnectCallback, DisconnectReason, Transport};
use crate::error::{Error, Result};

/// Receive callback handed to a [`NativeBinding`]: `(channel_name, channel_message)`.
pub type NativeReceive = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Inter-process binding exposed by the platform layer (the embedding glue on
/// mobile targets).
pub trait NativeBinding: Send + Sync {
	/// Registers the receive callback for `channel_name`.
	fn register_channel(&self, channel_name: &str, callback: NativeReceive);

	/// Sends `channel_message` on `channel_name`.
	fn emit(&self, channel_name: &str, channel_message: &str) -> std::result::Result<(), String>;
}

/// [`Transport`] over a [`NativeBinding`].
///
/// The binding sees one registration per channel name; fan-out to multiple
/// callbacks happens in the shared router.
pub struct NativeTransport {
	binding: Arc<dyn NativeBinding>,
	router: Arc<ChannelRouter>,
	bound_channels: DashSet<String>,
}

impl NativeTransport {
	pub fn new(binding: Arc<dyn NativeBinding>) -> Self {
		Self {
			binding,
			router: Arc::new(ChannelRouter::new()),
			bound_channels: DashSet::new(),
		}
	}

	/// Reports loss of the native link. Called by the platform glue when the
	/// engine thread or process dies.
	pub fn notify_disconnected(&self, reason: DisconnectReason) {
		self.router.disconnect(reason);
	}
}

impl Transport for NativeTransport {
	fn register_channel(&self, channel_name: &str, callback: ChannelCallback) {
		self.router.register(channel_name, callback);

		if self.bound_channels.insert(channel_name.to_string()) {
			let router = Arc::clone(&self.router);
			self.binding.register_channel(
				channel_name,
				Box::new(move |name: &str, message: &str| {
					router.route(ChannelMessage::new(name, message));
				}),
			);
		}
	}

	fn emit(&self, message: ChannelMessage) -> Result<()> {
		if let Some(reason) = self.router.disconnect_reason() {
			return Err(Error::TransportUnavailable(format!("native link {reason}")));
		}
		self.binding
			.emit(&message.channel_name, &message.channel_message)
			.map_err(Error::TransportError)
	}

	fn on_disconnect(&self, callback: DisconnectCallback) {
		self.router.on_disconnect(callback);
	}

	fn is_connected(&self) -> bool {
		self.router.disconnect_reason().is_none()
	}
}

/// Transport for targets where no engine can run. Every emit fails.
pub struct UnavailableTransport {
	reason: String,
}

impl UnavailableTransport {
	pub fn new(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
		}
	}
}

impl Transport for UnavailableTransport {
	fn register_channel(&self, channel_name: &str, _callback: ChannelCallback) {
		tracing::debug!(channel = channel_name, reason = %self.reason, "Channel registered on unavailable transport");
	}

	fn emit(&self, _message: ChannelMessage) -> Result<()> {
		Err(Error::TransportUnavailable(self.reason.clone()))
	}

	fn on_disconnect(&self, _callback: DisconnectCallback) {}

	fn is_connected(&self) -> bool {
		false
	}
}
