use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the stderr subscriber. Stdout is reserved for event output.
pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

fn default_filter(verbosity: u8) -> &'static str {
	// 0 = warnings (start failures, dropped payloads, lost links)
	// 1 (-v) = engine lifecycle
	// 2+ (-vv) = every message crossing the bridge
	match verbosity {
		0 => "warn",
		1 => "info",
		_ => "debug",
	}
}
