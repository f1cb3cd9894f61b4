//! Subprocess side of the bridge.
//!
//! A Rust program running as the engine uses [`GuestBridge`] to talk to the
//! host: the same two channels, with readiness announced by sending `ready`
//! on `APP_CHANNEL`.

use std::path::PathBuf;
use std::sync::Arc;

use nodebridge_protocol::{APP_CHANNEL, EVENT_CHANNEL, READY_EVENT};

use crate::channel::Channel;
use crate::error::Result;
use crate::project::DATADIR_ENV;
#[cfg(unix)]
use crate::{error::Error, supervisor::NODE_CHANNEL_FD_ENV};
use crate::transport::{Framing, PipeTransport, Platform, Transport};

/// Both channels as seen from inside the subprocess.
pub struct GuestBridge {
	transport: Arc<dyn Transport>,
	app: Channel,
	events: Channel,
}

impl GuestBridge {
	/// Builds the guest channels over `transport`.
	pub fn new(transport: Arc<dyn Transport>) -> Self {
		let app = Channel::new(APP_CHANNEL, Arc::clone(&transport));
		let events = Channel::new(EVENT_CHANNEL, Arc::clone(&transport));
		Self {
			transport,
			app,
			events,
		}
	}

	/// Connects to the host over the IPC channel it opened for this process.
	///
	/// On Unix that is the descriptor named by `NODE_CHANNEL_FD`; elsewhere
	/// the link is this process' stdin/stdout, so log to stderr there. Must be
	/// called from within a tokio runtime.
	///
	/// # Errors
	///
	/// [`Error::TransportUnavailable`](crate::Error::TransportUnavailable) if the process was not spawned with an
	/// IPC channel.
	#[cfg(unix)]
	pub fn from_host() -> Result<Self> {
		use std::os::fd::FromRawFd;

		let fd: i32 = std::env::var(NODE_CHANNEL_FD_ENV)
			.ok()
			.and_then(|value| value.parse().ok())
			.ok_or_else(|| {
				Error::TransportUnavailable(format!("{NODE_CHANNEL_FD_ENV} is not set to a descriptor"))
			})?;
		// SAFETY: the host hands this descriptor to the process for the IPC
		// channel alone, and nothing else in the process owns it.
		let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
		Self::from_unix_stream(stream)
	}

	#[cfg(not(unix))]
	pub fn from_host() -> Result<Self> {
		let transport = PipeTransport::connect(tokio::io::stdout(), tokio::io::stdin(), Framing::Lines);
		Ok(Self::new(Arc::new(transport)))
	}

	#[cfg(unix)]
	fn from_unix_stream(stream: std::os::unix::net::UnixStream) -> Result<Self> {
		stream.set_nonblocking(true)?;
		let (reader, writer) = tokio::net::UnixStream::from_std(stream)?.into_split();
		Ok(Self::new(Arc::new(PipeTransport::connect(writer, reader, Framing::Lines))))
	}

	/// Tells the host that the engine finished booting.
	pub fn ready(&self) -> Result<()> {
		self.app.send(READY_EVENT, Vec::new())
	}

	/// The user event channel.
	pub fn channel(&self) -> &Channel {
		&self.events
	}

	/// The reserved application channel.
	pub fn app_channel(&self) -> &Channel {
		&self.app
	}

	/// Returns the transport shared by both channels.
	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	/// Writable data directory assigned by the host.
	pub fn data_dir() -> Option<PathBuf> {
		std::env::var_os(DATADIR_ENV)
			.filter(|dir| !dir.is_empty())
			.map(PathBuf::from)
	}

	/// Platform this process runs on.
	pub fn platform() -> Platform {
		Platform::current()
	}
}

impl std::fmt::Debug for GuestBridge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GuestBridge")
			.field("connected", &self.transport.is_connected())
			.finish_non_exhaustive()
	}
}
