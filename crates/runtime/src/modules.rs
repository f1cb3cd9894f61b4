//! Modules bundled with the host for the engine to `require`.
//!
//! The `bridge` module is embedded at compile time and written to a modules
//! directory that ends up on the engine's `NODE_PATH`.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Engine side of the channels: exports `channel`, `datadir` and `platform`,
/// and sends `ready` on `APP_CHANNEL` when first required.
pub const BRIDGE_MODULE: &str = include_str!("../assets/builtin_modules/bridge/index.js");

/// Name the engine requires the bridge module by.
pub const BRIDGE_MODULE_NAME: &str = "bridge";

/// Writes the bundled modules under `dir` and returns `dir`.
///
/// Files already holding the current content are left untouched.
///
/// # Errors
///
/// Returns [`Error::Io`] if a directory or file cannot be written.
pub fn install_builtin_modules(dir: &Path) -> Result<PathBuf> {
	let module_dir = dir.join(BRIDGE_MODULE_NAME);
	std::fs::create_dir_all(&module_dir).map_err(|e| {
		Error::Io(std::io::Error::new(
			e.kind(),
			format!("failed to create {}: {e}", module_dir.display()),
		))
	})?;

	let entry = module_dir.join("index.js");
	if std::fs::read_to_string(&entry).is_ok_and(|current| current == BRIDGE_MODULE) {
		return Ok(dir.to_path_buf());
	}
	std::fs::write(&entry, BRIDGE_MODULE).map_err(|e| {
		Error::Io(std::io::Error::new(
			e.kind(),
			format!("failed to write {}: {e}", entry.display()),
		))
	})?;
	tracing::debug!(path = %entry.display(), "Installed bridge module");
	Ok(dir.to_path_buf())
}
