//! Wire types for the nodebridge channel protocol.
//!
//! This crate contains the serde-serializable types exchanged between a host
//! application and the Node.js subprocess it embeds, plus the two-stage
//! message codec used to carry events over a channel.
//!
//! # Wire format
//!
//! ```text
//! {"channelName": "EVENT_CHANNEL", "channelMessage": "<serialized envelope>"}
//!                                                     │
//!                  {"eventName": "tick", "eventMessage": "[1,2,3]"}
//! ```
//!
//! Types in this crate are pure data: they carry no transport or lifecycle
//! behavior. Higher-level APIs live in `nodebridge-runtime` and `nodebridge`.

pub mod codec;
pub mod message;
pub mod options;

pub use codec::{CodecError, EventEnvelope, SerializedEnvelope, deserialize, serialize};
pub use message::*;
pub use options::*;
