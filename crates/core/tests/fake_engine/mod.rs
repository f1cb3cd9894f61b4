// In-process stand-in for the Node.js engine.
//
// FakeSupervisor "spawns" a GuestBridge connected to the host through duplex
// pipes, so the host side runs its real line-framed transport.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Weak};

use nodebridge::{
	Bridge, BridgeConfig, ChannelCallbackData, ChannelMessage, Framing, GuestBridge, PipeTransport, ProcessHandle,
	ProcessStdio, ProcessSupervisor, Result, SpawnRequest, StartMode,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::oneshot;

pub struct FakeEngine {
	pub guest: GuestBridge,
	exit_tx: Mutex<Option<oneshot::Sender<Option<i32>>>>,
}

impl FakeEngine {
	/// Simulates the subprocess exiting with `code`.
	pub fn exit(&self, code: Option<i32>) {
		if let Some(tx) = self.exit_tx.lock().take() {
			let _ = tx.send(code);
		}
	}

	/// Emits a raw channel message, bypassing the codec.
	pub fn emit_raw(&self, channel_name: &str, payload: &str) {
		self.guest
			.transport()
			.emit(ChannelMessage::new(channel_name, payload))
			.unwrap();
	}
}

/// Supervisor whose engine answers every `ping` with a `pong` carrying the
/// same arguments.
#[derive(Default)]
pub struct FakeSupervisor {
	auto_ready: bool,
	exit_on_spawn: Option<i32>,
	engine: Mutex<Option<Arc<FakeEngine>>>,
	requests: Mutex<Vec<SpawnRequest>>,
}

impl FakeSupervisor {
	pub fn new(auto_ready: bool) -> Arc<Self> {
		Arc::new(Self {
			auto_ready,
			..Self::default()
		})
	}

	/// Supervisor whose engine exits with `code` as soon as it is spawned.
	pub fn exiting(code: i32) -> Arc<Self> {
		Arc::new(Self {
			exit_on_spawn: Some(code),
			..Self::default()
		})
	}

	pub fn engine(&self) -> Arc<FakeEngine> {
		self.engine.lock().clone().expect("engine not spawned")
	}

	/// Drops the engine, closing its end of the pipes.
	pub fn kill_engine(&self) {
		self.engine.lock().take();
	}

	pub fn requests(&self) -> Vec<SpawnRequest> {
		self.requests.lock().clone()
	}

	async fn launch(&self, request: SpawnRequest) -> Result<ProcessHandle> {
		self.requests.lock().push(request);

		let (host_out, guest_in) = tokio::io::duplex(64 * 1024);
		let (guest_out, host_in) = tokio::io::duplex(64 * 1024);
		let guest = GuestBridge::new(Arc::new(PipeTransport::connect(guest_out, guest_in, Framing::Lines)));
		let (exit_tx, exit_rx) = oneshot::channel();

		let engine = Arc::new(FakeEngine {
			guest,
			exit_tx: Mutex::new(Some(exit_tx)),
		});
		let weak: Weak<FakeEngine> = Arc::downgrade(&engine);
		engine.guest.channel().on("ping", move |data: &ChannelCallbackData| {
			if let Some(engine) = weak.upgrade() {
				let _ = engine.guest.channel().send("pong", data.args.clone());
			}
		});

		if self.auto_ready {
			engine.guest.ready()?;
		}
		if let Some(code) = self.exit_on_spawn {
			engine.exit(Some(code));
		}
		*self.engine.lock() = Some(engine);

		Ok(ProcessHandle::detached(
			Some(ProcessStdio::new(host_out, host_in)),
			exit_rx,
		))
	}
}

impl ProcessSupervisor for FakeSupervisor {
	fn spawn(&self, request: SpawnRequest) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + '_>> {
		Box::pin(self.launch(request))
	}
}

/// Creates `<tmp>/nodejs/index.js`.
pub fn project() -> TempDir {
	let base = TempDir::new().unwrap();
	let project = base.path().join("nodejs");
	std::fs::create_dir_all(&project).unwrap();
	std::fs::write(project.join("index.js"), "").unwrap();
	base
}

pub fn bridge(base: &Path, supervisor: &Arc<FakeSupervisor>, start_mode: StartMode) -> Bridge {
	Bridge::builder()
		.config(BridgeConfig::default().start_mode(start_mode))
		.transport(Arc::new(PipeTransport::new(Framing::Lines)))
		.supervisor(supervisor.clone())
		.base_dir(base)
		.modules_dir(PathBuf::from("/builtin_modules"))
		.data_dir(base.join("data"))
		.build()
		.unwrap()
}
