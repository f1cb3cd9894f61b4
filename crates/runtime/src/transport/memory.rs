//! Linked in-process transport endpoints.

use std::sync::Arc;

use nodebridge_protocol::ChannelMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChannelCallback, ChannelRouter, DisconnectCallback, DisconnectReason, Transport};
use crate::error::{Error, Result};

/// One end of an in-process link. Messages emitted on one end are routed to
/// the channels registered on the other.
///
/// Serves as the emitter used where the engine shares the host process, and as
/// a test double for the byte-stream transports.
pub struct InProcessTransport {
	router: Arc<ChannelRouter>,
	peer_tx: Mutex<Option<mpsc::UnboundedSender<ChannelMessage>>>,
}

impl InProcessTransport {
	/// Creates two linked endpoints.
	///
	/// Must be called from within a tokio runtime: each endpoint gets a pump
	/// task delivering its inbox in FIFO order. Dropping (or closing) one end
	/// disconnects the other.
	pub fn pair() -> (Self, Self) {
		let (a_tx, a_rx) = mpsc::unbounded_channel();
		let (b_tx, b_rx) = mpsc::unbounded_channel();

		let a = Self {
			router: Arc::new(ChannelRouter::new()),
			peer_tx: Mutex::new(Some(b_tx)),
		};
		let b = Self {
			router: Arc::new(ChannelRouter::new()),
			peer_tx: Mutex::new(Some(a_tx)),
		};

		tokio::spawn(Self::pump(a_rx, Arc::clone(&a.router)));
		tokio::spawn(Self::pump(b_rx, Arc::clone(&b.router)));

		(a, b)
	}

	/// Drops the link to the peer.
	pub fn close(&self) {
		self.peer_tx.lock().take();
	}

	async fn pump(mut inbox: mpsc::UnboundedReceiver<ChannelMessage>, router: Arc<ChannelRouter>) {
		while let Some(message) = inbox.recv().await {
			router.route(message);
		}
		router.disconnect(DisconnectReason::Closed);
	}
}

impl Transport for InProcessTransport {
	fn register_channel(&self, channel_name: &str, callback: ChannelCallback) {
		self.router.register(channel_name, callback);
	}

	fn emit(&self, message: ChannelMessage) -> Result<()> {
		let peer = self.peer_tx.lock();
		let tx = peer
			.as_ref()
			.ok_or_else(|| Error::TransportUnavailable("in-process link closed".to_string()))?;
		tx.send(message)
			.map_err(|_| Error::TransportUnavailable("in-process peer dropped".to_string()))
	}

	fn on_disconnect(&self, callback: DisconnectCallback) {
		self.router.on_disconnect(callback);
	}

	fn is_connected(&self) -> bool {
		self.peer_tx
			.lock()
			.as_ref()
			.is_some_and(|tx| !tx.is_closed())
	}
}
