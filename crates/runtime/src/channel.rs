//! Named pub/sub endpoint over a [`Transport`].
//!
//! Outbound, a [`Channel`] encodes `(eventName, args)` with the message codec
//! and hands exactly one [`ChannelMessage`] to the transport. Inbound, the
//! transport callback only enqueues the raw payload; a dispatcher task decodes
//! it and invokes listeners. Listeners therefore never run inside the
//! transport callback, and each channel delivers in arrival order.

use std::sync::Arc;

use nodebridge_protocol::{ChannelCallbackData, ChannelMessage, EventEnvelope};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::listeners::{ListenerFn, ListenerId, ListenerRegistry, Subscription};
use crate::transport::Transport;

/// A named logical channel multiplexed over one transport.
pub struct Channel {
	name: Arc<str>,
	transport: Arc<dyn Transport>,
	listeners: ListenerRegistry<ChannelCallbackData>,
}

impl Channel {
	/// Creates the channel and registers its receive callback with `transport`.
	///
	/// Must be called from within a tokio runtime: the inbound dispatcher runs
	/// as a task for as long as the transport keeps the callback alive.
	pub fn new(name: &str, transport: Arc<dyn Transport>) -> Self {
		let name: Arc<str> = Arc::from(name);
		let listeners = ListenerRegistry::new();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

		transport.register_channel(
			&name,
			Arc::new(move |message: ChannelMessage| {
				// Receiver only goes away with the runtime.
				let _ = inbound_tx.send(message.channel_message);
			}),
		);

		tokio::spawn(Self::dispatch_loop(
			Arc::clone(&name),
			inbound_rx,
			listeners.clone(),
		));

		Self {
			name,
			transport,
			listeners,
		}
	}

	async fn dispatch_loop(
		channel: Arc<str>,
		mut inbound_rx: mpsc::UnboundedReceiver<String>,
		listeners: ListenerRegistry<ChannelCallbackData>,
	) {
		while let Some(raw) = inbound_rx.recv().await {
			let envelope = match nodebridge_protocol::deserialize(&raw) {
				Ok(envelope) => envelope,
				Err(e) => {
					tracing::warn!(
						channel = %channel,
						error = %e,
						payload = %raw,
						"Dropping malformed payload"
					);
					continue;
				}
			};

			let data = ChannelCallbackData {
				args: envelope.args,
			};
			let invoked = listeners.emit(&envelope.event_name, &data);
			tracing::debug!(
				channel = %channel,
				event = %envelope.event_name,
				listeners = invoked,
				"Dispatched event"
			);
		}
		tracing::debug!(channel = %channel, "Channel dispatcher stopped");
	}

	/// Returns the channel name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns the transport this channel sends on.
	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	/// Encodes `event_name` with `args` and hands it to the transport.
	///
	/// Fails with [`Error::InvalidArgument`] for an empty name, before anything
	/// reaches the transport. Transport errors are returned as-is.
	pub fn send(&self, event_name: &str, args: Vec<Value>) -> Result<()> {
		if event_name.is_empty() {
			return Err(Error::InvalidArgument(
				"Required parameter 'eventName' was not specified".to_string(),
			));
		}

		let payload = nodebridge_protocol::serialize(&EventEnvelope::new(event_name, args))?;
		tracing::debug!(channel = %self.name, event = event_name, "Sending event");
		self.transport
			.emit(ChannelMessage::new(self.name.as_ref(), payload))
	}

	/// Registers a persistent listener for `event_name`.
	pub fn on<F>(&self, event_name: &str, listener: F) -> ListenerId
	where
		F: Fn(&ChannelCallbackData) + Send + Sync + 'static,
	{
		self.listeners.on(event_name, Arc::new(listener))
	}

	/// Registers a listener removed before its first invocation.
	pub fn once<F>(&self, event_name: &str, listener: F) -> ListenerId
	where
		F: Fn(&ChannelCallbackData) + Send + Sync + 'static,
	{
		self.listeners.once(event_name, Arc::new(listener))
	}

	/// Registers an already-shared listener.
	pub fn add_listener(&self, event_name: &str, listener: ListenerFn<ChannelCallbackData>) -> ListenerId {
		self.listeners.on(event_name, listener)
	}

	/// Registers a listener that is removed when the returned [`Subscription`]
	/// is dropped.
	pub fn subscribe<F>(&self, event_name: &str, listener: F) -> Subscription
	where
		F: Fn(&ChannelCallbackData) + Send + Sync + 'static,
	{
		let id = self.on(event_name, listener);
		self.listeners.subscription(id)
	}

	/// Removes one listener. Returns false if it was not registered.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		self.listeners.remove(id)
	}

	/// Removes every listener, or only those bound to `event_name`.
	pub fn remove_all_listeners(&self, event_name: Option<&str>) -> usize {
		self.listeners.remove_all(event_name)
	}

	/// Returns the number of listeners bound to `event_name`.
	pub fn listener_count(&self, event_name: &str) -> usize {
		self.listeners.listener_count(event_name)
	}
}

impl std::fmt::Debug for Channel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Channel")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}
