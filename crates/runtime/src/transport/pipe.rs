//! Framed JSON transport over a byte stream.
//!
//! Two framings are supported:
//!
//! - [`Framing::Lines`]: one JSON object per line, the convention Node.js uses
//!   for `child_process` IPC with `serialization: 'json'`.
//! - [`Framing::LengthPrefixed`]: `u32` little-endian length followed by the
//!   JSON bytes, for peers that may embed raw newlines in frames.
//!
//! The transport starts detached. [`Transport::emit`] fails with
//! [`Error::TransportUnavailable`] until [`Transport::attach`] (or
//! [`PipeTransport::connect`]) hands it the subprocess streams. Attaching
//! spawns a writer task draining the outbound queue and a reader task routing
//! inbound frames.

use std::sync::Arc;

use nodebridge_protocol::ChannelMessage;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{ChannelCallback, ChannelRouter, DisconnectCallback, DisconnectReason, ProcessStdio, Transport};
use crate::error::{Error, Result};

/// Upper bound on a single frame, guarding against corrupt length prefixes.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// How messages are delimited on the byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
	/// Newline-delimited JSON.
	#[default]
	Lines,
	/// `u32` little-endian length prefix followed by JSON bytes.
	LengthPrefixed,
}

impl Framing {
	/// Encodes one message into a complete frame.
	pub fn encode(self, message: &ChannelMessage) -> Result<Vec<u8>> {
		let json = serde_json::to_vec(message)?;
		match self {
			Framing::Lines => {
				let mut frame = json;
				frame.push(b'\n');
				Ok(frame)
			}
			Framing::LengthPrefixed => {
				if json.len() > MAX_FRAME_LEN {
					return Err(Error::TransportError(format!(
						"Frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
						json.len()
					)));
				}
				let mut frame = Vec::with_capacity(4 + json.len());
				frame.extend_from_slice(&(json.len() as u32).to_le_bytes());
				frame.extend_from_slice(&json);
				Ok(frame)
			}
		}
	}
}

/// Reads whole frames from a byte stream.
pub(super) struct FrameReader<R> {
	reader: BufReader<R>,
	framing: Framing,
	max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
	pub(super) fn new(reader: R, framing: Framing) -> Self {
		Self::with_limit(reader, framing, MAX_FRAME_LEN)
	}

	pub(super) fn with_limit(reader: R, framing: Framing, max_len: usize) -> Self {
		Self {
			reader: BufReader::new(reader),
			framing,
			max_len,
		}
	}

	/// Returns the next frame, or `None` on a clean end of stream.
	pub(super) async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
		match self.framing {
			Framing::Lines => self.next_line().await,
			Framing::LengthPrefixed => self.next_prefixed().await,
		}
	}

	async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
		loop {
			let mut line = Vec::new();
			// The newline may take the line one byte past the limit.
			let read = (&mut self.reader)
				.take(self.max_len as u64 + 1)
				.read_until(b'\n', &mut line)
				.await
				.map_err(|e| Error::TransportError(format!("Failed to read line: {e}")))?;
			if read == 0 {
				return Ok(None);
			}
			if line.last() != Some(&b'\n') && line.len() > self.max_len {
				return Err(Error::TransportError(format!(
					"Line exceeds limit of {} bytes",
					self.max_len
				)));
			}

			while matches!(line.last(), Some(b'\n' | b'\r')) {
				line.pop();
			}
			if !line.is_empty() {
				return Ok(Some(line));
			}
		}
	}

	async fn next_prefixed(&mut self) -> Result<Option<Vec<u8>>> {
		let mut len_buf = [0u8; 4];
		let first = self
			.reader
			.read(&mut len_buf[..1])
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
		if first == 0 {
			return Ok(None);
		}
		self.reader
			.read_exact(&mut len_buf[1..])
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;

		let length = u32::from_le_bytes(len_buf) as usize;
		if length > self.max_len {
			return Err(Error::TransportError(format!(
				"Frame of {length} bytes exceeds limit of {}",
				self.max_len
			)));
		}

		let mut frame = vec![0u8; length];
		self.reader
			.read_exact(&mut frame)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read message body: {e}")))?;
		Ok(Some(frame))
	}
}

/// Byte-stream transport for a subprocess connected over pipes.
pub struct PipeTransport {
	framing: Framing,
	router: Arc<ChannelRouter>,
	outbound: Mutex<Option<mpsc::UnboundedSender<ChannelMessage>>>,
}

impl PipeTransport {
	/// Creates a detached transport.
	pub fn new(framing: Framing) -> Self {
		Self {
			framing,
			router: Arc::new(ChannelRouter::new()),
			outbound: Mutex::new(None),
		}
	}

	/// Creates a transport already attached to `writer`/`reader`.
	///
	/// Must be called from within a tokio runtime.
	pub fn connect<W, R>(writer: W, reader: R, framing: Framing) -> Self
	where
		W: AsyncWrite + Send + Unpin + 'static,
		R: AsyncRead + Send + Unpin + 'static,
	{
		let transport = Self::new(framing);
		*transport.outbound.lock() = Some(transport.start(writer, reader));
		transport
	}

	/// Returns the framing in use.
	pub fn framing(&self) -> Framing {
		self.framing
	}

	/// Spawns the reader and writer tasks and returns the outbound queue.
	fn start<W, R>(&self, writer: W, reader: R) -> mpsc::UnboundedSender<ChannelMessage>
	where
		W: AsyncWrite + Send + Unpin + 'static,
		R: AsyncRead + Send + Unpin + 'static,
	{
		let (tx, rx) = mpsc::unbounded_channel();

		let framing = self.framing;
		let router = Arc::clone(&self.router);
		tokio::spawn(async move {
			if let Err(e) = Self::read_loop(reader, framing, &router).await {
				tracing::error!("Transport read error: {}", e);
			}
		});

		let router = Arc::clone(&self.router);
		tokio::spawn(Self::write_loop(writer, rx, framing, router));
		tx
	}

	/// Reads frames until the stream ends, routing each decoded message.
	///
	/// Frames that are not a valid [`ChannelMessage`] are logged and skipped.
	/// End of stream reports [`DisconnectReason::Closed`]; read errors report
	/// [`DisconnectReason::Failed`] and are returned.
	pub(crate) async fn read_loop<R>(reader: R, framing: Framing, router: &ChannelRouter) -> Result<()>
	where
		R: AsyncRead + Unpin,
	{
		let mut frames = FrameReader::new(reader, framing);
		loop {
			match frames.next_frame().await {
				Ok(Some(frame)) => match serde_json::from_slice::<ChannelMessage>(&frame) {
					Ok(message) => {
						tracing::debug!(
							channel = %message.channel_name,
							bytes = frame.len(),
							"Received message"
						);
						router.route(message);
					}
					Err(e) => {
						tracing::warn!(
							error = %e,
							frame = %String::from_utf8_lossy(&frame),
							"Dropping undecodable frame"
						);
					}
				},
				Ok(None) => {
					router.disconnect(DisconnectReason::Closed);
					return Ok(());
				}
				Err(e) => {
					router.disconnect(DisconnectReason::Failed(e.to_string()));
					return Err(e);
				}
			}
		}
	}

	async fn write_loop<W>(
		mut writer: W,
		mut outbound_rx: mpsc::UnboundedReceiver<ChannelMessage>,
		framing: Framing,
		router: Arc<ChannelRouter>,
	) where
		W: AsyncWrite + Unpin,
	{
		while let Some(message) = outbound_rx.recv().await {
			let frame = match framing.encode(&message) {
				Ok(frame) => frame,
				Err(e) => {
					tracing::error!(channel = %message.channel_name, "Failed to encode frame: {}", e);
					continue;
				}
			};

			let written = match writer.write_all(&frame).await {
				Ok(()) => writer.flush().await,
				Err(e) => Err(e),
			};
			if let Err(e) = written {
				tracing::error!("Transport write error: {}", e);
				router.disconnect(DisconnectReason::Failed(e.to_string()));
				break;
			}
		}
	}
}

impl Transport for PipeTransport {
	fn register_channel(&self, channel_name: &str, callback: ChannelCallback) {
		self.router.register(channel_name, callback);
	}

	fn emit(&self, message: ChannelMessage) -> Result<()> {
		let outbound = self.outbound.lock();
		let Some(tx) = outbound.as_ref() else {
			return Err(Error::TransportUnavailable(
				"No IPC channel has been established with the Node.js process.".to_string(),
			));
		};
		if let Some(reason) = self.router.disconnect_reason() {
			return Err(Error::TransportUnavailable(format!(
				"The IPC channel to the Node.js process is {reason}."
			)));
		}

		tracing::debug!(channel = %message.channel_name, "Queueing message");
		tx.send(message).map_err(|_| {
			tracing::error!("Failed to queue message: outbound channel closed");
			Error::TransportUnavailable("The IPC channel to the Node.js process is closed.".to_string())
		})
	}

	fn on_disconnect(&self, callback: DisconnectCallback) {
		self.router.on_disconnect(callback);
	}

	fn attach(&self, stdio: ProcessStdio) -> Result<()> {
		let mut outbound = self.outbound.lock();
		if outbound.is_some() {
			return Err(Error::TransportError(
				"Transport is already attached to a process".to_string(),
			));
		}
		*outbound = Some(self.start(stdio.writer, stdio.reader));
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.outbound
			.lock()
			.as_ref()
			.is_some_and(|tx| !tx.is_closed())
			&& self.router.disconnect_reason().is_none()
	}
}
