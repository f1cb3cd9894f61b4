//! Node.js project resolution.
//!
//! Turns [`StartOptions`] plus the host's directories into a [`LaunchPlan`]:
//! the project directory, its entry script, the arguments, and the
//! environment handed to the subprocess.

use std::path::{Path, PathBuf};

use nodebridge_protocol::{BridgeConfig, DEFAULT_ENTRY_FILE, NodeEnv, StartOptions};

use crate::error::{Error, Result};
use crate::supervisor::SpawnRequest;

/// Environment variable holding the module search path of the subprocess.
pub const NODE_PATH_ENV: &str = "NODE_PATH";

/// Environment variable holding the writable data directory.
pub const DATADIR_ENV: &str = "DATADIR";

#[cfg(windows)]
const PATH_DELIMITER: char = ';';
#[cfg(not(windows))]
const PATH_DELIMITER: char = ':';

/// Everything needed to spawn the engine for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
	pub project_dir: PathBuf,
	pub entry_path: PathBuf,
	pub args: Vec<String>,
	pub env: NodeEnv,
}

impl LaunchPlan {
	/// Resolves the project under `base_dir`.
	///
	/// The project directory is `options.node_dir`, falling back to
	/// `config.node_dir`. The entry script is `options.script`, then the
	/// `main` field of `package.json`, then `index.js`.
	pub fn resolve(
		base_dir: &Path,
		modules_dir: &Path,
		data_dir: &Path,
		options: &StartOptions,
		config: &BridgeConfig,
	) -> Result<Self> {
		let node_dir = options.node_dir.as_deref().unwrap_or(&config.node_dir);
		let project_dir = base_dir.join(node_dir);
		if !project_dir.is_dir() {
			return Err(Error::ProjectNotFound(project_dir));
		}

		let entry_path = resolve_entry(&project_dir, options.script.as_deref())?;
		let env = build_env(&project_dir, modules_dir, data_dir, &options.env);

		tracing::debug!(
			project = %project_dir.display(),
			entry = %entry_path.display(),
			"Resolved Node.js project"
		);

		Ok(Self {
			project_dir,
			entry_path,
			args: options.args.clone(),
			env,
		})
	}

	/// Converts the plan into a request for a [`ProcessSupervisor`](crate::ProcessSupervisor).
	pub fn into_spawn_request(self) -> SpawnRequest {
		SpawnRequest {
			entry_path: self.entry_path,
			args: self.args,
			env: self.env,
			working_dir: Some(self.project_dir),
		}
	}
}

fn resolve_entry(project_dir: &Path, script: Option<&str>) -> Result<PathBuf> {
	let entry_file = match script.filter(|s| !s.is_empty()) {
		Some(script) => script.to_string(),
		None => package_main(project_dir)?.unwrap_or_else(|| DEFAULT_ENTRY_FILE.to_string()),
	};

	let entry_path = project_dir.join(entry_file);
	if !entry_path.exists() {
		return Err(Error::EntryNotFound(entry_path));
	}
	Ok(entry_path)
}

/// Reads the `main` field of the project's `package.json`, if both exist.
fn package_main(project_dir: &Path) -> Result<Option<String>> {
	let manifest = project_dir.join("package.json");
	if !manifest.exists() {
		return Ok(None);
	}

	let contents = std::fs::read_to_string(&manifest)
		.map_err(|e| Error::PackageJson(format!("{}: {e}", manifest.display())))?;
	let package: serde_json::Value = serde_json::from_str(&contents)
		.map_err(|e| Error::PackageJson(format!("{}: {e}", manifest.display())))?;

	Ok(package
		.get("main")
		.and_then(|main| main.as_str())
		.filter(|main| !main.is_empty())
		.map(str::to_string))
}

/// Joins paths with the platform's search-path delimiter, skipping empty ones.
pub fn join_search_path(paths: &[&Path]) -> String {
	let parts: Vec<String> = paths
		.iter()
		.filter(|path| !path.as_os_str().is_empty())
		.map(|path| path.display().to_string())
		.collect();
	parts.join(&PATH_DELIMITER.to_string())
}

/// Assembles the subprocess environment.
///
/// `NODE_PATH` and `DATADIR` come first; user entries may override them.
/// User entries with an empty key or value are dropped.
pub fn build_env(project_dir: &Path, modules_dir: &Path, data_dir: &Path, user_env: &NodeEnv) -> NodeEnv {
	let mut env = NodeEnv::new();
	env.insert(
		NODE_PATH_ENV.to_string(),
		join_search_path(&[project_dir, modules_dir]),
	);
	env.insert(DATADIR_ENV.to_string(), data_dir.display().to_string());

	for (key, value) in user_env {
		if key.is_empty() || value.is_empty() {
			tracing::debug!(key = %key, "Skipping empty environment entry");
			continue;
		}
		env.insert(key.clone(), value.clone());
	}
	env
}

#[cfg(test)]
mod tests {
	use std::fs;

	use tempfile::TempDir;

	use super::*;

	fn project_with(files: &[(&str, &str)]) -> TempDir {
		let base = TempDir::new().unwrap();
		let project = base.path().join("nodejs");
		fs::create_dir_all(&project).unwrap();
		for (name, contents) in files {
			fs::write(project.join(name), contents).unwrap();
		}
		base
	}

	fn resolve(base: &TempDir, options: &StartOptions) -> Result<LaunchPlan> {
		LaunchPlan::resolve(
			base.path(),
			Path::new("/modules"),
			Path::new("/data"),
			options,
			&BridgeConfig::default(),
		)
	}

	#[test]
	fn test_missing_project_dir() {
		let base = TempDir::new().unwrap();
		let err = resolve(&base, &StartOptions::new()).unwrap_err();
		assert!(matches!(err, Error::ProjectNotFound(ref p) if p.ends_with("nodejs")));
	}

	#[test]
	fn test_default_entry_is_index_js() {
		let base = project_with(&[("index.js", "")]);
		let plan = resolve(&base, &StartOptions::new()).unwrap();
		assert_eq!(plan.entry_path, base.path().join("nodejs").join("index.js"));
		assert_eq!(plan.project_dir, base.path().join("nodejs"));
	}

	#[test]
	fn test_package_json_main_wins_over_default() {
		let base = project_with(&[
			("index.js", ""),
			("server.js", ""),
			("package.json", r#"{"name":"app","main":"server.js"}"#),
		]);
		let plan = resolve(&base, &StartOptions::new()).unwrap();
		assert!(plan.entry_path.ends_with("server.js"));
	}

	#[test]
	fn test_package_json_without_main_falls_back() {
		let base = project_with(&[("index.js", ""), ("package.json", r#"{"name":"app"}"#)]);
		let plan = resolve(&base, &StartOptions::new()).unwrap();
		assert!(plan.entry_path.ends_with("index.js"));
	}

	#[test]
	fn test_script_option_wins_over_package_json() {
		let base = project_with(&[
			("server.js", ""),
			("cli.js", ""),
			("package.json", r#"{"main":"server.js"}"#),
		]);
		let plan = resolve(&base, &StartOptions::new().script("cli.js")).unwrap();
		assert!(plan.entry_path.ends_with("cli.js"));
	}

	#[test]
	fn test_unreadable_package_json() {
		let base = project_with(&[("index.js", ""), ("package.json", "{not json")]);
		let err = resolve(&base, &StartOptions::new()).unwrap_err();
		assert!(matches!(err, Error::PackageJson(_)));
	}

	#[test]
	fn test_missing_entry() {
		let base = project_with(&[("package.json", r#"{"main":"gone.js"}"#)]);
		let err = resolve(&base, &StartOptions::new()).unwrap_err();
		assert!(matches!(err, Error::EntryNotFound(ref p) if p.ends_with("gone.js")));
	}

	#[test]
	fn test_node_dir_option_overrides_config() {
		let base = TempDir::new().unwrap();
		let project = base.path().join("custom");
		fs::create_dir_all(&project).unwrap();
		fs::write(project.join("index.js"), "").unwrap();

		let plan = resolve(&base, &StartOptions::new().node_dir("custom")).unwrap();
		assert_eq!(plan.project_dir, project);

		let config = BridgeConfig::default().node_dir("custom");
		let plan = LaunchPlan::resolve(
			base.path(),
			Path::new("/modules"),
			Path::new("/data"),
			&StartOptions::new(),
			&config,
		)
		.unwrap();
		assert_eq!(plan.project_dir, project);
	}

	#[test]
	fn test_env_assembly() {
		let base = project_with(&[("index.js", "")]);
		let options = StartOptions::new()
			.env("APP_MODE", "test")
			.env("", "orphan")
			.env("EMPTY", "")
			.arg("--flag");
		let plan = resolve(&base, &options).unwrap();

		let project = base.path().join("nodejs");
		let expected_node_path = format!("{}{}{}", project.display(), PATH_DELIMITER, "/modules");
		assert_eq!(plan.env.get(NODE_PATH_ENV), Some(&expected_node_path));
		assert_eq!(plan.env.get(DATADIR_ENV).map(String::as_str), Some("/data"));
		assert_eq!(plan.env.get("APP_MODE").map(String::as_str), Some("test"));
		assert!(!plan.env.contains_key(""));
		assert!(!plan.env.contains_key("EMPTY"));
		assert_eq!(plan.args, vec!["--flag".to_string()]);
	}

	#[test]
	fn test_user_env_overrides_defaults() {
		let mut user_env = NodeEnv::new();
		user_env.insert(DATADIR_ENV.to_string(), "/elsewhere".to_string());
		let env = build_env(Path::new("/p"), Path::new("/m"), Path::new("/d"), &user_env);
		assert_eq!(env.get(DATADIR_ENV).map(String::as_str), Some("/elsewhere"));
	}

	#[test]
	fn test_join_search_path_skips_empty() {
		let joined = join_search_path(&[Path::new("/a"), Path::new(""), Path::new("/b")]);
		assert_eq!(joined, format!("/a{PATH_DELIMITER}/b"));
	}

	#[test]
	fn test_into_spawn_request() {
		let base = project_with(&[("index.js", "")]);
		let plan = resolve(&base, &StartOptions::new()).unwrap();
		let entry = plan.entry_path.clone();
		let request = plan.into_spawn_request();
		assert_eq!(request.entry_path, entry);
		assert_eq!(request.working_dir, Some(base.path().join("nodejs")));
		assert!(request.env.contains_key(NODE_PATH_ENV));
	}
}
