//! Channel-level wire message and the well-known channel names.

use serde::{Deserialize, Serialize};

/// Channel reserved for framework lifecycle signaling.
pub const APP_CHANNEL: &str = "APP_CHANNEL";

/// Channel carrying user-defined application events.
pub const EVENT_CHANNEL: &str = "EVENT_CHANNEL";

/// The single event sent on [`APP_CHANNEL`] once the subprocess has booted.
pub const READY_EVENT: &str = "ready";

/// The unit a transport moves between host and subprocess.
///
/// `channel_message` is an opaque string produced by the codec; transports
/// never look inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
	pub channel_name: String,
	pub channel_message: String,
}

impl ChannelMessage {
	pub fn new(channel_name: impl Into<String>, channel_message: impl Into<String>) -> Self {
		Self {
			channel_name: channel_name.into(),
			channel_message: channel_message.into(),
		}
	}
}

/// Well-known channel identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownChannel {
	App,
	Event,
}

impl WellKnownChannel {
	/// Returns the wire name of this channel.
	pub fn name(self) -> &'static str {
		match self {
			WellKnownChannel::App => APP_CHANNEL,
			WellKnownChannel::Event => EVENT_CHANNEL,
		}
	}

	/// Looks up a channel by wire name. Unknown names return `None`.
	pub fn from_name(name: &str) -> Option<Self> {
		match name {
			APP_CHANNEL => Some(WellKnownChannel::App),
			EVENT_CHANNEL => Some(WellKnownChannel::Event),
			_ => None,
		}
	}
}

impl std::fmt::Display for WellKnownChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_channel_message_wire_shape() {
		let message = ChannelMessage::new(EVENT_CHANNEL, r#"{"eventName":"tick"}"#);
		let json = serde_json::to_value(&message).unwrap();

		assert_eq!(json["channelName"], "EVENT_CHANNEL");
		assert_eq!(json["channelMessage"], r#"{"eventName":"tick"}"#);
	}

	#[test]
	fn test_channel_message_deserialization() {
		let raw = r#"{"channelName":"APP_CHANNEL","channelMessage":"{\"eventName\":\"ready\",\"eventMessage\":\"[]\"}"}"#;
		let message: ChannelMessage = serde_json::from_str(raw).unwrap();

		assert_eq!(message.channel_name, APP_CHANNEL);
		assert_eq!(
			message.channel_message,
			r#"{"eventName":"ready","eventMessage":"[]"}"#
		);
	}

	#[test]
	fn test_well_known_lookup() {
		assert_eq!(
			WellKnownChannel::from_name("APP_CHANNEL"),
			Some(WellKnownChannel::App)
		);
		assert_eq!(
			WellKnownChannel::from_name("EVENT_CHANNEL"),
			Some(WellKnownChannel::Event)
		);
		assert_eq!(WellKnownChannel::from_name("LOG_CHANNEL"), None);
		assert_eq!(WellKnownChannel::Event.to_string(), "EVENT_CHANNEL");
	}
}
