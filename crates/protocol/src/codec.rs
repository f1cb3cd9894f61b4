//! Two-stage event codec.
//!
//! An event is encoded by first turning its argument list into JSON text
//! (`eventMessage`), then encoding `{eventName, eventMessage}` as the outer
//! object. The outer envelope can be logged or routed without touching the
//! arguments, and the result is always a single string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors produced while encoding or decoding an event envelope.
#[derive(Debug, Error)]
pub enum CodecError {
	/// The envelope could not be encoded.
	#[error("failed to encode event '{event_name}': {source}")]
	Encode {
		event_name: String,
		#[source]
		source: serde_json::Error,
	},

	/// The payload is not a well-formed serialized envelope.
	#[error("malformed payload: {0}")]
	Malformed(String),
}

/// Logical event before serialization: a name plus an ordered argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
	pub event_name: String,
	#[serde(default)]
	pub args: Vec<Value>,
}

impl EventEnvelope {
	/// Creates an envelope for `event_name` carrying `args`.
	pub fn new(event_name: impl Into<String>, args: Vec<Value>) -> Self {
		Self {
			event_name: event_name.into(),
			args,
		}
	}

	/// Creates an envelope with no arguments.
	pub fn bare(event_name: impl Into<String>) -> Self {
		Self::new(event_name, Vec::new())
	}
}

/// Outer envelope as it appears inside `channelMessage`.
///
/// `eventMessage` holds the JSON text of the argument array. Peers may omit it
/// (or send an empty string) for events without arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedEnvelope {
	pub event_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub event_message: Option<String>,
}

/// Encodes an envelope into a channel payload string.
pub fn serialize(envelope: &EventEnvelope) -> Result<String, CodecError> {
	let encode_err = |source| CodecError::Encode {
		event_name: envelope.event_name.clone(),
		source,
	};

	let event_message = serde_json::to_string(&envelope.args).map_err(encode_err)?;
	let outer = SerializedEnvelope {
		event_name: envelope.event_name.clone(),
		event_message: Some(event_message),
	};
	serde_json::to_string(&outer).map_err(encode_err)
}

/// Decodes a channel payload string back into an envelope.
///
/// Absent or empty `eventMessage` yields an empty argument list.
pub fn deserialize(raw: &str) -> Result<EventEnvelope, CodecError> {
	let value: Value = serde_json::from_str(raw)
		.map_err(|e| CodecError::Malformed(format!("invalid JSON: {e}")))?;
	if !value.is_object() {
		return Err(CodecError::Malformed(
			"envelope is not a JSON object".to_string(),
		));
	}

	let outer: SerializedEnvelope = serde_json::from_value(value)
		.map_err(|e| CodecError::Malformed(format!("invalid envelope: {e}")))?;

	if outer.event_name.is_empty() {
		return Err(CodecError::Malformed("empty eventName".to_string()));
	}

	let args = match outer.event_message.as_deref() {
		None | Some("") => Vec::new(),
		Some(message) => serde_json::from_str::<Vec<Value>>(message).map_err(|e| {
			CodecError::Malformed(format!(
				"eventMessage of '{}' is not a JSON array: {e}",
				outer.event_name
			))
		})?,
	};

	Ok(EventEnvelope {
		event_name: outer.event_name,
		args,
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_serialize_is_two_stage() {
		let envelope = EventEnvelope::new("tick", vec![json!(1), json!(2), json!(3)]);
		let raw = serialize(&envelope).unwrap();

		let outer: Value = serde_json::from_str(&raw).unwrap();
		assert_eq!(outer["eventName"], "tick");
		assert_eq!(outer["eventMessage"], "[1,2,3]");
	}

	#[test]
	fn test_round_trip_nested_arguments() {
		let envelope = EventEnvelope::new(
			"sync",
			vec![
				json!({"user": {"id": 7, "tags": ["a", "b"]}, "active": true}),
				json!([[1, 2], [], [null]]),
				json!("text with \"quotes\" and \n newline"),
				json!(3.5),
			],
		);

		let decoded = deserialize(&serialize(&envelope).unwrap()).unwrap();
		assert_eq!(decoded, envelope);
	}

	#[test]
	fn test_round_trip_without_arguments() {
		let envelope = EventEnvelope::bare("ready");
		let raw = serialize(&envelope).unwrap();
		assert!(raw.contains(r#""eventMessage":"[]""#));
		assert_eq!(deserialize(&raw).unwrap(), envelope);
	}

	#[test]
	fn test_missing_or_empty_event_message_yields_no_args() {
		let absent = deserialize(r#"{"eventName":"ready"}"#).unwrap();
		assert_eq!(absent, EventEnvelope::bare("ready"));

		let empty = deserialize(r#"{"eventName":"ready","eventMessage":""}"#).unwrap();
		assert!(empty.args.is_empty());
	}

	#[test]
	fn test_field_order_is_irrelevant() {
		let decoded = deserialize(r#"{"eventMessage":"[\"hi\"]","eventName":"greet"}"#).unwrap();
		assert_eq!(decoded, EventEnvelope::new("greet", vec![json!("hi")]));
	}

	#[test]
	fn test_malformed_payloads() {
		for raw in [
			"not json",
			"[1,2,3]",
			r#"{"eventMessage":"[]"}"#,
			r#"{"eventName":""}"#,
			r#"{"eventName":42}"#,
			r#"{"eventName":"tick","eventMessage":"{\"a\":1}"}"#,
			r#"{"eventName":"tick","eventMessage":"[1,"}"#,
		] {
			let err = deserialize(raw).unwrap_err();
			assert!(
				matches!(err, CodecError::Malformed(_)),
				"expected malformed for {raw}, got {err:?}"
			);
		}
	}
}
