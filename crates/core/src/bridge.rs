//! Host-side facade over the two well-known channels.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use nodebridge_protocol::{
	APP_CHANNEL, BridgeConfig, ChannelCallbackData, EVENT_CHANNEL, EventPayload, READY_EVENT, StartMode, StartOptions,
};
use nodebridge_runtime::{
	Channel, DisconnectReason, EngineLifecycle, EngineState, Error, LaunchPlan, ListenerFn, ListenerId, NativeBinding,
	NodeSupervisor, Platform, ProcessHandle, ProcessSupervisor, Result, Transport, install_builtin_modules,
	select_transport,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::events::{LifecycleBus, LifecycleEvent, LifecycleStream, LifecycleWaiter};

/// How long [`Bridge::shutdown`] waits for the engine to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle returned by [`Bridge::add_listener`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
	id: ListenerId,
	event_name: Arc<str>,
}

impl ListenerHandle {
	pub fn id(&self) -> ListenerId {
		self.id
	}

	pub fn event_name(&self) -> &str {
		&self.event_name
	}
}

/// Directory the bundled modules are installed to when none is configured.
const BUILTIN_MODULES_DIR: &str = "builtin_modules";

/// Directories the engine is launched with.
#[derive(Debug, Clone)]
struct BridgePaths {
	base_dir: PathBuf,
	/// `None` installs the bundled modules under `data_dir`.
	modules_dir: Option<PathBuf>,
	data_dir: PathBuf,
}

impl BridgePaths {
	fn modules_dir(&self) -> Result<PathBuf> {
		match &self.modules_dir {
			Some(dir) => Ok(dir.clone()),
			None => install_builtin_modules(&self.data_dir.join(BUILTIN_MODULES_DIR)),
		}
	}
}

struct BridgeInner {
	config: BridgeConfig,
	paths: BridgePaths,
	transport: Arc<dyn Transport>,
	supervisor: Arc<dyn ProcessSupervisor>,
	lifecycle: Arc<EngineLifecycle>,
	app: Channel,
	events: Channel,
	handles: Mutex<IndexMap<ListenerId, Arc<str>>>,
	bus: Arc<LifecycleBus>,
	kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Host side of the bridge: starts the engine, gates sends on readiness, and
/// forwards `EVENT_CHANNEL` events to listeners.
///
/// Cloning is cheap; clones share one engine.
#[derive(Clone)]
pub struct Bridge {
	inner: Arc<BridgeInner>,
}

impl Bridge {
	/// Returns a builder with default configuration.
	pub fn builder() -> BridgeBuilder {
		BridgeBuilder::default()
	}

	/// Returns the configuration the bridge was built with.
	pub fn config(&self) -> &BridgeConfig {
		&self.inner.config
	}

	/// Returns the current engine state.
	pub fn state(&self) -> EngineState {
		self.inner.lifecycle.state()
	}

	/// Returns true while the transport can carry messages.
	pub fn is_connected(&self) -> bool {
		self.inner.transport.is_connected()
	}

	/// Starts the engine with default options when configured with
	/// [`StartMode::Auto`]; does nothing in [`StartMode::Manual`].
	///
	/// Subscribe to [`lifecycle_events`](Self::lifecycle_events) or register
	/// waiters before calling this to observe every notification.
	pub async fn launch(&self) -> Result<()> {
		if self.inner.config.start_mode != StartMode::Auto {
			return Ok(());
		}
		self.start_engine(StartOptions::default()).await
	}

	/// Starts the engine manually.
	///
	/// Only allowed when the bridge was configured with
	/// [`StartMode::Manual`]; otherwise fails with
	/// [`Error::ManualStartDisabled`].
	pub async fn start(&self, options: StartOptions) -> Result<()> {
		if self.inner.config.start_mode != StartMode::Manual {
			return Err(Error::ManualStartDisabled);
		}
		self.start_engine(options).await
	}

	async fn start_engine(&self, options: StartOptions) -> Result<()> {
		self.inner.lifecycle.start()?;

		match self.spawn_engine(&options).await {
			Ok(handle) => {
				self.inner.bus.emit(LifecycleEvent::Started);
				self.monitor(handle);
				Ok(())
			}
			Err(e) => {
				tracing::error!(error = %e, "Failed to start the Node.js engine");
				self.inner.bus.emit(LifecycleEvent::StartFailed {
					message: e.to_string(),
				});
				Err(e)
			}
		}
	}

	async fn spawn_engine(&self, options: &StartOptions) -> Result<ProcessHandle> {
		let paths = &self.inner.paths;
		let modules_dir = paths.modules_dir()?;
		let plan = LaunchPlan::resolve(
			&paths.base_dir,
			&modules_dir,
			&paths.data_dir,
			options,
			&self.inner.config,
		)?;

		let mut handle = self.inner.supervisor.spawn(plan.into_spawn_request()).await?;
		if let Some(stdio) = handle.take_stdio() {
			if let Err(e) = self.inner.transport.attach(stdio) {
				let _ = handle.kill().await;
				return Err(e);
			}
		}

		Ok(handle)
	}

	/// Watches the engine process until it exits or [`shutdown`](Self::shutdown)
	/// asks for it to be killed.
	fn monitor(&self, mut handle: ProcessHandle) {
		let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
		*self.inner.kill_tx.lock() = Some(kill_tx);
		let bus = Arc::clone(&self.inner.bus);

		tokio::spawn(async move {
			let exited = tokio::select! {
				status = handle.wait() => Some(status),
				_ = &mut kill_rx => None,
			};

			let code = match exited {
				Some(Ok(code)) => code,
				Some(Err(e)) => {
					tracing::error!(error = %e, "Failed to wait for the Node.js engine");
					None
				}
				None => {
					tracing::debug!(pid = ?handle.pid(), "Killing the Node.js engine");
					if let Err(e) = handle.kill().await {
						tracing::warn!(error = %e, "Failed to kill the Node.js engine");
					}
					None
				}
			};

			tracing::info!(?code, "Node.js engine exited");
			bus.emit(LifecycleEvent::ProcessExited { code });
		});
	}

	/// Sends a user event to the engine on `EVENT_CHANNEL`.
	///
	/// Missing `args` are sent as an empty list.
	///
	/// # Errors
	///
	/// - [`Error::InvalidArgument`] for an empty event name
	/// - [`Error::NotStarted`] / [`Error::NotReady`] before the engine is ready
	/// - transport errors, unchanged
	pub fn send(&self, payload: EventPayload) -> Result<()> {
		if payload.event_name.is_empty() {
			return Err(Error::InvalidArgument(
				"Required parameter 'eventName' was not specified".to_string(),
			));
		}
		let args = payload.args.unwrap_or_default();

		self.inner.lifecycle.guard_send()?;
		self.inner.events.send(&payload.event_name, args)
	}

	/// Serializes each argument and sends the event.
	pub fn send_serialized<I, T>(&self, event_name: &str, args: I) -> Result<()>
	where
		I: IntoIterator<Item = T>,
		T: Serialize,
	{
		let args = args
			.into_iter()
			.map(serde_json::to_value)
			.collect::<std::result::Result<Vec<_>, _>>()?;
		self.send(EventPayload::new(event_name, args))
	}

	/// Resolves once the engine has signaled readiness.
	///
	/// The state is checked now: before [`start`](Self::start) this yields
	/// [`Error::NotStarted`].
	pub fn when_ready(&self) -> impl Future<Output = Result<()>> + Send + 'static {
		self.inner.lifecycle.when_ready()
	}

	/// Registers `callback` for events named `event_name` on `EVENT_CHANNEL`.
	pub fn add_listener<F>(&self, event_name: &str, callback: F) -> Result<ListenerHandle>
	where
		F: Fn(&ChannelCallbackData) + Send + Sync + 'static,
	{
		self.add_shared_listener(event_name, Arc::new(callback))
	}

	fn add_shared_listener(&self, event_name: &str, listener: ListenerFn<ChannelCallbackData>) -> Result<ListenerHandle> {
		if event_name.is_empty() {
			return Err(Error::InvalidArgument(
				"Required parameter 'eventName' was not specified".to_string(),
			));
		}

		let event_name: Arc<str> = Arc::from(event_name);
		let id = self.inner.events.add_listener(&event_name, listener);
		self.inner.handles.lock().insert(id, Arc::clone(&event_name));
		Ok(ListenerHandle { id, event_name })
	}

	/// Removes a listener added through [`add_listener`](Self::add_listener).
	/// Returns false if it was already removed.
	pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
		if self.inner.handles.lock().shift_remove(&handle.id).is_none() {
			return false;
		}
		self.inner.events.remove_listener(handle.id)
	}

	/// Removes every listener added through this bridge, or only those for
	/// `event_name`. Returns the number removed.
	pub fn remove_all_listeners(&self, event_name: Option<&str>) -> usize {
		let removed: Vec<ListenerId> = {
			let mut handles = self.inner.handles.lock();
			let ids: Vec<ListenerId> = handles
				.iter()
				.filter(|(_, name)| event_name.is_none_or(|wanted| &***name == wanted))
				.map(|(id, _)| *id)
				.collect();
			for id in &ids {
				handles.shift_remove(id);
			}
			ids
		};

		removed
			.into_iter()
			.filter(|id| self.inner.events.remove_listener(*id))
			.count()
	}

	/// Returns the number of listeners registered for `event_name`.
	pub fn listener_count(&self, event_name: &str) -> usize {
		self.inner.events.listener_count(event_name)
	}

	/// Subscribes to lifecycle notifications emitted from now on.
	pub fn lifecycle_events(&self) -> LifecycleStream {
		self.inner.bus.stream()
	}

	/// Waits for the first lifecycle event matching `predicate`.
	pub fn wait_for_lifecycle_event<F>(&self, predicate: F, timeout: Duration) -> LifecycleWaiter
	where
		F: Fn(&LifecycleEvent) -> bool + Send + Sync + 'static,
	{
		self.inner.bus.waiter(predicate, timeout)
	}

	/// Kills the engine process if one is running and waits for it to exit.
	pub async fn shutdown(&self) -> Result<()> {
		let Some(kill_tx) = self.inner.kill_tx.lock().take() else {
			return Ok(());
		};

		let exited = self.wait_for_lifecycle_event(
			|event| matches!(event, LifecycleEvent::ProcessExited { .. }),
			SHUTDOWN_TIMEOUT,
		);
		if kill_tx.send(()).is_err() {
			// Monitor already finished.
			return Ok(());
		}
		exited.wait().await.map(|_| ())
	}
}

impl std::fmt::Debug for Bridge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Bridge")
			.field("state", &self.state())
			.field("config", &self.inner.config)
			.field("channels", &[self.inner.app.name(), self.inner.events.name()])
			.finish_non_exhaustive()
	}
}

/// Builder for [`Bridge`].
#[derive(Default)]
pub struct BridgeBuilder {
	config: BridgeConfig,
	transport: Option<Arc<dyn Transport>>,
	supervisor: Option<Arc<dyn ProcessSupervisor>>,
	platform: Option<Platform>,
	native_binding: Option<Arc<dyn NativeBinding>>,
	base_dir: Option<PathBuf>,
	modules_dir: Option<PathBuf>,
	data_dir: Option<PathBuf>,
	listeners: Vec<(String, ListenerFn<ChannelCallbackData>)>,
}

impl BridgeBuilder {
	pub fn config(mut self, config: BridgeConfig) -> Self {
		self.config = config;
		self
	}

	/// Uses `transport` instead of picking one for the platform.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
		self.supervisor = Some(supervisor);
		self
	}

	/// Overrides the platform used to pick a transport.
	pub fn platform(mut self, platform: Platform) -> Self {
		self.platform = Some(platform);
		self
	}

	/// Supplies the platform binding used on mobile targets.
	pub fn native_binding(mut self, binding: Arc<dyn NativeBinding>) -> Self {
		self.native_binding = Some(binding);
		self
	}

	/// Directory containing the Node.js project directory.
	pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.base_dir = Some(dir.into());
		self
	}

	/// Directory of host modules appended to `NODE_PATH`.
	///
	/// Defaults to `<data_dir>/builtin_modules`, where the bundled `bridge`
	/// module is installed before each start.
	pub fn modules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.modules_dir = Some(dir.into());
		self
	}

	/// Writable directory exposed to the engine as `DATADIR`.
	pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.data_dir = Some(dir.into());
		self
	}

	/// Registers an `EVENT_CHANNEL` listener before the engine can start, so
	/// no early event is missed.
	pub fn listener<F>(mut self, event_name: impl Into<String>, callback: F) -> Self
	where
		F: Fn(&ChannelCallbackData) + Send + Sync + 'static,
	{
		self.listeners.push((event_name.into(), Arc::new(callback)));
		self
	}

	/// Builds the bridge without starting the engine.
	///
	/// Must be called from within a tokio runtime.
	pub fn build(self) -> Result<Bridge> {
		let base_dir = match self.base_dir {
			Some(dir) => dir,
			None => std::env::current_dir()?,
		};
		let paths = BridgePaths {
			modules_dir: self.modules_dir,
			data_dir: self.data_dir.unwrap_or_else(|| base_dir.join("data")),
			base_dir,
		};

		let transport = self.transport.unwrap_or_else(|| {
			select_transport(self.platform.unwrap_or_else(Platform::current), self.native_binding)
		});
		let supervisor = self
			.supervisor
			.unwrap_or_else(|| Arc::new(NodeSupervisor::new()));

		let lifecycle = Arc::new(EngineLifecycle::new());
		let bus = Arc::new(LifecycleBus::new());

		let app = Channel::new(APP_CHANNEL, Arc::clone(&transport));
		let events = Channel::new(EVENT_CHANNEL, Arc::clone(&transport));

		{
			let lifecycle = Arc::clone(&lifecycle);
			let bus = Arc::clone(&bus);
			app.on(READY_EVENT, move |_: &ChannelCallbackData| {
				if lifecycle.mark_ready() {
					tracing::info!("Node.js engine is ready");
					bus.emit(LifecycleEvent::Ready);
				}
			});
		}
		{
			let bus = Arc::clone(&bus);
			transport.on_disconnect(Arc::new(move |reason: &DisconnectReason| {
				tracing::warn!(%reason, "Lost the link to the Node.js engine");
				bus.emit(LifecycleEvent::TransportClosed {
					reason: reason.to_string(),
				});
			}));
		}

		tracing::debug!(
			node_dir = %self.config.node_dir,
			start_mode = ?self.config.start_mode,
			base_dir = %paths.base_dir.display(),
			"Bridge created"
		);

		let bridge = Bridge {
			inner: Arc::new(BridgeInner {
				config: self.config,
				paths,
				transport,
				supervisor,
				lifecycle,
				app,
				events,
				handles: Mutex::new(IndexMap::new()),
				bus,
				kill_tx: Mutex::new(None),
			}),
		};

		for (event_name, listener) in self.listeners {
			bridge.add_shared_listener(&event_name, listener)?;
		}
		Ok(bridge)
	}

	/// Builds the bridge and, in [`StartMode::Auto`], starts the engine with
	/// default options.
	pub async fn launch(self) -> Result<Bridge> {
		let bridge = self.build()?;
		bridge.launch().await?;
		Ok(bridge)
	}
}
