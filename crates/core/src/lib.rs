//! nodebridge - embed a Node.js project and talk to it over named channels
//!
//! The host builds a [`Bridge`], which spawns the engine, waits for its
//! `ready` signal on `APP_CHANNEL`, and exchanges user events on
//! `EVENT_CHANNEL`:
//!
//! ```ignore
//! use nodebridge::{Bridge, EventPayload};
//! use serde_json::json;
//!
//! let bridge = Bridge::builder().base_dir("./public").launch().await?;
//! bridge.add_listener("pong", |data| println!("pong: {:?}", data.args))?;
//! bridge.when_ready().await?;
//! bridge.send(EventPayload::new("ping", vec![json!(1)]))?;
//! ```
//!
//! Programs running inside the engine use [`GuestBridge`] for the other end.

mod bridge;
pub mod events;

pub use bridge::{Bridge, BridgeBuilder, ListenerHandle};
pub use events::{LifecycleEvent, LifecycleStream, LifecycleWaiter};
pub use nodebridge_protocol::{
	APP_CHANNEL, BridgeConfig, ChannelCallbackData, ChannelMessage, EVENT_CHANNEL, EventEnvelope, EventPayload,
	NodeEnv, READY_EVENT, StartMode, StartOptions,
};
pub use nodebridge_runtime::{
	BRIDGE_MODULE, Channel, DATADIR_ENV, DisconnectReason, EngineState, Error, Framing, GuestBridge, InProcessTransport, NODE_PATH_ENV,
	NativeBinding, NodeSupervisor, PipeTransport, Platform, ProcessHandle, ProcessStdio, ProcessSupervisor, Result, SpawnRequest,
	Transport, find_node_executable, install_builtin_modules,
};
