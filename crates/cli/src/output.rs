//! Event output on stdout, one JSON object per line.

use std::io::Write;

use nodebridge::LifecycleEvent;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLine<'a> {
	pub event: &'a str,
	pub args: &'a [Value],
}

/// Formats one inbound event as a JSON line (without the newline).
pub fn format_event(event: &str, args: &[Value]) -> String {
	// Serializing borrowed strings and JSON values cannot fail.
	serde_json::to_string(&EventLine { event, args }).unwrap_or_default()
}

/// Writes one inbound event to stdout.
pub fn print_event(event: &str, args: &[Value]) {
	let line = format_event(event, args);
	let mut stdout = std::io::stdout().lock();
	let _ = writeln!(stdout, "{line}");
	let _ = stdout.flush();
}

/// Human-readable description of a lifecycle event for the log.
pub fn describe_lifecycle(event: &LifecycleEvent) -> String {
	match event {
		LifecycleEvent::Started => "engine started".to_string(),
		LifecycleEvent::Ready => "engine ready".to_string(),
		LifecycleEvent::StartFailed { message } => format!("engine failed to start: {message}"),
		LifecycleEvent::ProcessExited { code: Some(code) } => format!("engine exited with code {code}"),
		LifecycleEvent::ProcessExited { code: None } => "engine terminated".to_string(),
		LifecycleEvent::TransportClosed { reason } => format!("link to engine {reason}"),
	}
}
