//! `nodebridge run`: start the engine and relay events until it exits.

use std::sync::Arc;
use std::time::Duration;

use nodebridge::{Bridge, EventPayload, LifecycleEvent, NodeEnv, NodeSupervisor, StartMode, StartOptions};
use serde_json::Value;

use crate::cli::RunArgs;
use crate::config::HostConfig;
use crate::error::{CliError, Result};
use crate::output::{describe_lifecycle, print_event};

pub async fn execute(args: RunArgs, config: HostConfig) -> Result<()> {
	let start_mode = if args.manual {
		StartMode::Manual
	} else {
		config.bridge.start_mode
	};
	if start_mode == StartMode::Auto && args.has_start_options() {
		return Err(CliError::InvalidArgument(
			"--node-dir, --script, --env and script arguments need a manual start (pass --manual)".to_string(),
		));
	}

	let outgoing = args
		.send
		.iter()
		.map(String::as_str)
		.map(parse_send)
		.collect::<Result<Vec<_>>>()?;
	let options = start_options(&args)?;

	let base_dir = match args.base_dir.clone().or_else(|| config.web_dir.clone()) {
		Some(dir) => dir,
		None => std::env::current_dir()?,
	};
	let data_dir = args
		.data_dir
		.clone()
		.unwrap_or_else(|| config.default_data_dir());
	std::fs::create_dir_all(&data_dir)?;

	let mut builder = Bridge::builder()
		.config(config.bridge.clone().start_mode(start_mode))
		.supervisor(Arc::new(NodeSupervisor::new().stdout_to_stderr()))
		.base_dir(&base_dir)
		.data_dir(&data_dir);
	if let Some(dir) = &args.modules_dir {
		builder = builder.modules_dir(dir);
	}
	for event_name in &args.listen {
		let name = event_name.clone();
		builder = builder.listener(event_name.clone(), move |data| print_event(&name, &data.args));
	}
	let bridge = builder.build()?;

	// Both are registered before the engine starts so a fast exit is seen.
	let mut lifecycle = bridge.lifecycle_events();
	let mut exited = bridge.wait_for_lifecycle_event(LifecycleEvent::is_terminal, Duration::MAX);

	tracing::info!(base_dir = %base_dir.display(), data_dir = %data_dir.display(), ?start_mode, "Starting engine");
	match start_mode {
		StartMode::Auto => bridge.launch().await?,
		StartMode::Manual => bridge.start(options).await?,
	}

	let ready = tokio::time::timeout(Duration::from_secs(args.ready_timeout), bridge.when_ready());
	tokio::select! {
		ready = ready => match ready {
			Ok(result) => result?,
			Err(_) => {
				let _ = bridge.shutdown().await;
				return Err(CliError::ReadyTimeout(args.ready_timeout));
			}
		},
		event = &mut exited => {
			let code = match event? {
				LifecycleEvent::ProcessExited { code } => code,
				_ => None,
			};
			return Err(CliError::EngineExited { code });
		}
	}

	for payload in outgoing {
		tracing::debug!(event = %payload.event_name, "Sending event");
		bridge.send(payload)?;
	}

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				tracing::info!("Interrupted, stopping engine");
				bridge.shutdown().await?;
				break;
			}
			event = lifecycle.recv() => match event {
				Some(event) => {
					tracing::info!("{}", describe_lifecycle(&event));
					if event.is_terminal() {
						break;
					}
				}
				None => break,
			}
		}
	}

	Ok(())
}

fn start_options(args: &RunArgs) -> Result<StartOptions> {
	Ok(StartOptions {
		node_dir: args.node_dir.clone(),
		script: args.script.clone(),
		args: args.args.clone(),
		env: parse_env(&args.env)?,
	})
}

/// Parses `KEY=VALUE` entries.
pub fn parse_env(entries: &[String]) -> Result<NodeEnv> {
	entries
		.iter()
		.map(|entry| match entry.split_once('=') {
			Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
			_ => Err(CliError::InvalidArgument(format!(
				"expected KEY=VALUE, got '{entry}'"
			))),
		})
		.collect()
}

/// Parses `EVENT` or `EVENT=JSON`.
///
/// A JSON array becomes the argument list; any other value is sent as the
/// single argument.
pub fn parse_send(spec: &str) -> Result<EventPayload> {
	let (event_name, json) = match spec.split_once('=') {
		Some((name, json)) => (name, Some(json)),
		None => (spec, None),
	};
	if event_name.is_empty() {
		return Err(CliError::InvalidArgument(format!(
			"missing event name in '{spec}'"
		)));
	}

	let Some(json) = json else {
		return Ok(EventPayload::bare(event_name));
	};
	let value: Value = serde_json::from_str(json)
		.map_err(|e| CliError::InvalidArgument(format!("invalid JSON for event '{event_name}': {e}")))?;
	let args = match value {
		Value::Array(items) => items,
		other => vec![other],
	};
	Ok(EventPayload::new(event_name, args))
}
