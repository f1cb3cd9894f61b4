//! nodebridge runtime - channels, transports, and engine lifecycle
//!
//! This crate provides the machinery shared by both ends of the bridge:
//!
//! - **Transport**: moving `(channelName, channelMessage)` pairs across the
//!   process boundary (stdio pipes, platform bindings, in-process pairs)
//! - **Channel**: named pub/sub endpoints encoding events with the message codec
//! - **Lifecycle**: the `NotStarted -> Started -> Ready` state machine
//! - **Supervisor**: locating `node`, resolving the project, spawning the engine
//! - **Guest**: the subprocess-side view of the channels
//! - **Modules**: the bundled `bridge` module the engine requires
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  nodebridge  │  Bridge facade (host side)
//! └──────┬───────┘
//!        │
//! ┌──────▼────────────────────┐
//! │  nodebridge-runtime       │  This crate
//! │  ┌──────────┐ ┌────────┐  │
//! │  │ Channel  │ │Lifecyc.│  │
//! │  └────┬─────┘ └────────┘  │
//! │  ┌────▼─────┐ ┌────────┐  │
//! │  │Transport │ │Supervis│  │  Pipe / native / in-process
//! │  └──────────┘ └────────┘  │
//! └───────────────────────────┘
//! ```

pub mod channel;
pub mod error;
pub mod guest;
pub mod lifecycle;
pub mod listeners;
pub mod modules;
pub mod project;
pub mod supervisor;
pub mod transport;

// Re-export key types at crate root
pub use channel::Channel;
pub use error::{Error, Result};
pub use guest::GuestBridge;
pub use lifecycle::{EngineLifecycle, EngineState};
pub use listeners::{ListenerFn, ListenerId, ListenerRegistry, Subscription};
pub use modules::{BRIDGE_MODULE, install_builtin_modules};
pub use project::{DATADIR_ENV, LaunchPlan, NODE_PATH_ENV};
pub use supervisor::{NODE_EXE_ENV, NodeSupervisor, ProcessHandle, ProcessSupervisor, SpawnRequest, find_node_executable};
pub use transport::{
	ChannelCallback, ChannelRouter, DisconnectCallback, DisconnectReason, Framing, InProcessTransport, NativeBinding,
	NativeReceive, NativeTransport, PipeTransport, Platform, ProcessStdio, Transport, UnavailableTransport,
	select_transport,
};
