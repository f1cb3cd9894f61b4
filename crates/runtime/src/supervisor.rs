//! Spawning and supervising the Node.js subprocess.
//!
//! On Unix the engine gets the same IPC channel Node's `child_process.fork`
//! sets up: one end of a socket pair as fd 3, announced through
//! `NODE_CHANNEL_FD` with JSON serialization, so `process.send` and
//! `process.on('message')` carry channel messages. Elsewhere the link falls
//! back to line-framed JSON over the child's stdin/stdout.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use nodebridge_protocol::NodeEnv;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::transport::ProcessStdio;

/// Environment variable overriding the Node.js executable.
pub const NODE_EXE_ENV: &str = "NODEBRIDGE_NODE_EXE";

/// Environment variable through which Node.js finds its IPC descriptor.
pub const NODE_CHANNEL_FD_ENV: &str = "NODE_CHANNEL_FD";

/// Environment variable selecting the IPC serialization.
pub const NODE_CHANNEL_SERIALIZATION_ENV: &str = "NODE_CHANNEL_SERIALIZATION_MODE";

/// Descriptor number of the IPC channel inside the engine.
pub const IPC_FD: i32 = 3;

/// What to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
	pub entry_path: PathBuf,
	pub args: Vec<String>,
	pub env: NodeEnv,
	pub working_dir: Option<PathBuf>,
}

/// Spawns the engine subprocess.
///
/// The returned [`ProcessHandle`] owns the subprocess streams until the
/// caller takes them to attach a transport.
pub trait ProcessSupervisor: Send + Sync {
	fn spawn(&self, request: SpawnRequest) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + '_>>;
}

enum ExitSource {
	Child(Child),
	Signal(oneshot::Receiver<Option<i32>>),
	Finished(Option<i32>),
}

/// A running (or finished) subprocess.
pub struct ProcessHandle {
	pid: Option<u32>,
	stdio: Option<ProcessStdio>,
	exit: ExitSource,
}

impl ProcessHandle {
	/// Wraps a spawned child and the streams linked to it.
	pub fn from_child(child: Child, stdio: Option<ProcessStdio>) -> Self {
		Self {
			pid: child.id(),
			stdio,
			exit: ExitSource::Child(child),
		}
	}

	/// Creates a handle for an engine that is not an OS child of this
	/// process. `exit` reports the exit code; dropping its sender counts as
	/// an exit without code.
	pub fn detached(stdio: Option<ProcessStdio>, exit: oneshot::Receiver<Option<i32>>) -> Self {
		Self {
			pid: None,
			stdio,
			exit: ExitSource::Signal(exit),
		}
	}

	/// Returns the OS process id, if any.
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Takes the subprocess streams. Returns `None` on the second call.
	pub fn take_stdio(&mut self) -> Option<ProcessStdio> {
		self.stdio.take()
	}

	/// Waits for the subprocess to exit and returns its exit code.
	pub async fn wait(&mut self) -> Result<Option<i32>> {
		let code = match &mut self.exit {
			ExitSource::Child(child) => child.wait().await?.code(),
			ExitSource::Signal(rx) => rx.await.unwrap_or(None),
			ExitSource::Finished(code) => return Ok(*code),
		};
		self.exit = ExitSource::Finished(code);
		Ok(code)
	}

	/// Kills the subprocess and reaps it.
	pub async fn kill(&mut self) -> Result<()> {
		// Close our end of the link before killing.
		self.stdio.take();

		match &mut self.exit {
			ExitSource::Child(child) => {
				child
					.kill()
					.await
					.map_err(|e| Error::LaunchFailed(format!("Failed to kill process: {e}")))?;
				let status = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
				let code = match status {
					Ok(Ok(status)) => status.code(),
					_ => None,
				};
				self.exit = ExitSource::Finished(code);
			}
			ExitSource::Signal(_) => {
				self.exit = ExitSource::Finished(None);
			}
			ExitSource::Finished(_) => {}
		}
		Ok(())
	}
}

impl std::fmt::Debug for ProcessHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProcessHandle")
			.field("pid", &self.pid)
			.field("stdio", &self.stdio.is_some())
			.finish_non_exhaustive()
	}
}

/// Launches `node <entry> <args...>` with an IPC channel to the host.
#[derive(Debug, Clone)]
pub struct NodeSupervisor {
	node_exe: Option<PathBuf>,
	startup_grace: Duration,
	stdout_to_stderr: bool,
}

impl Default for NodeSupervisor {
	fn default() -> Self {
		Self::new()
	}
}

impl NodeSupervisor {
	/// Creates a supervisor that locates `node` at spawn time.
	pub fn new() -> Self {
		Self {
			node_exe: None,
			startup_grace: Duration::from_millis(100),
			stdout_to_stderr: false,
		}
	}

	/// Uses `node_exe` instead of searching for it.
	pub fn with_node(node_exe: impl Into<PathBuf>) -> Self {
		Self {
			node_exe: Some(node_exe.into()),
			..Self::new()
		}
	}

	/// Sets how long to wait before checking that the child is still alive.
	pub fn startup_grace(mut self, grace: Duration) -> Self {
		self.startup_grace = grace;
		self
	}

	/// Sends the engine's stdout to this process' stderr, keeping stdout free
	/// for other output. Only applies where the link does not use stdout.
	pub fn stdout_to_stderr(mut self) -> Self {
		self.stdout_to_stderr = true;
		self
	}

	async fn launch(&self, request: SpawnRequest) -> Result<ProcessHandle> {
		let node_exe = match &self.node_exe {
			Some(path) => path.clone(),
			None => find_node_executable()?,
		};

		let mut cmd = Command::new(&node_exe);
		cmd.arg(&request.entry_path)
			.args(&request.args)
			.envs(&request.env)
			.stderr(Stdio::inherit())
			.kill_on_drop(true);
		if let Some(dir) = &request.working_dir {
			cmd.current_dir(dir);
		}
		let link = self.prepare_link(&mut cmd)?;

		tracing::debug!(
			node = %node_exe.display(),
			entry = %request.entry_path.display(),
			args = ?request.args,
			"Spawning Node.js engine"
		);

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn process: {e}")))?;
		let stdio = link.into_stdio(&mut child)?;

		tokio::time::sleep(self.startup_grace).await;

		match child.try_wait() {
			Ok(Some(status)) => {
				return Err(Error::LaunchFailed(format!(
					"Engine process exited immediately with status: {status}"
				)));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::LaunchFailed(format!("Failed to check process status: {e}")));
			}
		}

		let handle = ProcessHandle::from_child(child, Some(stdio));
		tracing::info!(pid = ?handle.pid(), "Node.js engine started");
		Ok(handle)
	}

	#[cfg(unix)]
	fn prepare_link(&self, cmd: &mut Command) -> Result<EngineLink> {
		let (host, engine) = std::os::unix::net::UnixStream::pair()?;
		let engine_fd = std::os::fd::AsRawFd::as_raw_fd(&engine);

		cmd.env(NODE_CHANNEL_FD_ENV, IPC_FD.to_string())
			.env(NODE_CHANNEL_SERIALIZATION_ENV, "json")
			.stdin(Stdio::null())
			.stdout(self.engine_stdout());
		// SAFETY: the hook runs between fork and exec and only calls the
		// async-signal-safe `fcntl` and `dup2`.
		unsafe {
			cmd.pre_exec(move || install_ipc_fd(engine_fd));
		}

		Ok(EngineLink { host, engine })
	}

	#[cfg(not(unix))]
	fn prepare_link(&self, cmd: &mut Command) -> Result<EngineLink> {
		cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
		Ok(EngineLink)
	}

	#[cfg(unix)]
	fn engine_stdout(&self) -> Stdio {
		if self.stdout_to_stderr {
			Stdio::from(std::io::stderr())
		} else {
			Stdio::inherit()
		}
	}
}

/// Host side of the link to a child being spawned.
#[cfg(unix)]
struct EngineLink {
	host: std::os::unix::net::UnixStream,
	engine: std::os::unix::net::UnixStream,
}

#[cfg(unix)]
impl EngineLink {
	fn into_stdio(self, _child: &mut Child) -> Result<ProcessStdio> {
		// The child holds its own copy now.
		drop(self.engine);

		self.host.set_nonblocking(true)?;
		let stream = tokio::net::UnixStream::from_std(self.host)?;
		let (reader, writer) = stream.into_split();
		Ok(ProcessStdio::new(writer, reader))
	}
}

#[cfg(not(unix))]
struct EngineLink;

#[cfg(not(unix))]
impl EngineLink {
	fn into_stdio(self, child: &mut Child) -> Result<ProcessStdio> {
		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| Error::LaunchFailed("child stdin is not piped".to_string()))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| Error::LaunchFailed("child stdout is not piped".to_string()))?;
		Ok(ProcessStdio::new(stdin, stdout))
	}
}

/// Places `fd` at [`IPC_FD`] without close-on-exec.
#[cfg(unix)]
fn install_ipc_fd(fd: std::os::fd::RawFd) -> std::io::Result<()> {
	// SAFETY: plain descriptor syscalls on descriptors owned by this process.
	unsafe {
		if fd == IPC_FD {
			let flags = libc::fcntl(fd, libc::F_GETFD);
			if flags == -1 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
				return Err(std::io::Error::last_os_error());
			}
		} else if libc::dup2(fd, IPC_FD) == -1 {
			return Err(std::io::Error::last_os_error());
		}
	}
	Ok(())
}

impl ProcessSupervisor for NodeSupervisor {
	fn spawn(&self, request: SpawnRequest) -> Pin<Box<dyn Future<Output = Result<ProcessHandle>> + Send + '_>> {
		Box::pin(self.launch(request))
	}
}

/// Finds the node executable: `NODEBRIDGE_NODE_EXE`, then `PATH`, then
/// common install locations.
pub fn find_node_executable() -> Result<PathBuf> {
	resolve_node_executable(
		std::env::var_os(NODE_EXE_ENV).map(PathBuf::from),
		std::env::var_os("PATH"),
	)
}

fn resolve_node_executable(override_path: Option<PathBuf>, search_path: Option<OsString>) -> Result<PathBuf> {
	if let Some(path) = override_path {
		if path.exists() {
			return Ok(path);
		}
		tracing::warn!(path = %path.display(), "{NODE_EXE_ENV} does not exist; searching PATH");
	}

	let cwd = std::env::current_dir()?;
	match which::which_in("node", search_path, cwd) {
		Ok(path) => return Ok(path),
		Err(e) => tracing::debug!(error = %e, "node not found on PATH"),
	}

	#[cfg(not(windows))]
	let common_locations = [
		"/usr/local/bin/node",
		"/usr/bin/node",
		"/opt/homebrew/bin/node",
		"/opt/local/bin/node",
	];

	#[cfg(windows)]
	let common_locations = [
		"C:\\Program Files\\nodejs\\node.exe",
		"C:\\Program Files (x86)\\nodejs\\node.exe",
	];

	common_locations
		.iter()
		.map(Path::new)
		.find(|path| path.exists())
		.map(Path::to_path_buf)
		.ok_or(Error::NodeNotFound)
}

#[cfg(test)]
mod tests {
	use std::fs;
	#[cfg(unix)]
	use std::os::unix::fs::PermissionsExt;

	use tempfile::TempDir;

	use super::*;

	#[cfg(unix)]
	fn write_mock_node(dir: &Path, body: &str) -> PathBuf {
		let path = dir.join("node");
		fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
		let mut perms = fs::metadata(&path).unwrap().permissions();
		perms.set_mode(0o755);
		fs::set_permissions(&path, perms).unwrap();
		path
	}

	#[test]
	fn test_override_path_is_used_when_present() {
		let dir = TempDir::new().unwrap();
		let fake = dir.path().join("node-custom");
		fs::write(&fake, "").unwrap();

		assert_eq!(resolve_node_executable(Some(fake.clone()), None).unwrap(), fake);
	}

	#[cfg(unix)]
	#[test]
	fn test_node_is_found_on_search_path() {
		let dir = TempDir::new().unwrap();
		let node = write_mock_node(dir.path(), "exit 0");

		let found = resolve_node_executable(None, Some(dir.path().as_os_str().to_owned())).unwrap();
		assert_eq!(found, node);
	}

	#[test]
	fn test_find_node_executable() {
		match resolve_node_executable(Some(PathBuf::from("/nonexistent/node")), std::env::var_os("PATH")) {
			Ok(path) => assert!(path.exists()),
			Err(e) => assert!(matches!(e, Error::NodeNotFound)),
		}
	}

	#[tokio::test]
	async fn test_detached_handle_reports_exit_code() {
		let (tx, rx) = oneshot::channel();
		let mut handle = ProcessHandle::detached(None, rx);
		assert!(handle.pid().is_none());
		assert!(handle.take_stdio().is_none());

		tx.send(Some(7)).unwrap();
		assert_eq!(handle.wait().await.unwrap(), Some(7));
		// A finished handle keeps reporting the same code.
		assert_eq!(handle.wait().await.unwrap(), Some(7));
	}

	#[tokio::test]
	async fn test_detached_handle_sender_dropped() {
		let (tx, rx) = oneshot::channel::<Option<i32>>();
		let mut handle = ProcessHandle::detached(None, rx);
		drop(tx);
		assert_eq!(handle.wait().await.unwrap(), None);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_spawn_opens_ipc_channel() {
		use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

		let dir = TempDir::new().unwrap();
		let node = write_mock_node(
			dir.path(),
			"echo \"$NODE_CHANNEL_FD $NODE_CHANNEL_SERIALIZATION_MODE\" >&3; exec cat <&3 >&3",
		);
		let supervisor = NodeSupervisor::with_node(node);

		let mut handle = supervisor
			.spawn(SpawnRequest {
				entry_path: dir.path().join("index.js"),
				working_dir: Some(dir.path().to_path_buf()),
				..SpawnRequest::default()
			})
			.await
			.unwrap();
		assert!(handle.pid().is_some());

		let mut stdio = handle.take_stdio().unwrap();
		let mut reader = BufReader::new(&mut stdio.reader);
		let mut line = String::new();
		reader.read_line(&mut line).await.unwrap();
		assert_eq!(line, "3 json\n");

		stdio.writer.write_all(b"echo\n").await.unwrap();
		stdio.writer.flush().await.unwrap();
		line.clear();
		reader.read_line(&mut line).await.unwrap();
		assert_eq!(line, "echo\n");

		handle.kill().await.unwrap();
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_spawn_immediate_exit_fails() {
		let dir = TempDir::new().unwrap();
		let node = write_mock_node(dir.path(), "exit 3");
		let supervisor = NodeSupervisor::with_node(node).startup_grace(Duration::from_millis(300));

		let err = supervisor
			.spawn(SpawnRequest {
				entry_path: dir.path().join("index.js"),
				..SpawnRequest::default()
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::LaunchFailed(_)));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn test_spawn_passes_env_and_args() {
		use tokio::io::AsyncReadExt;

		let dir = TempDir::new().unwrap();
		let node = write_mock_node(dir.path(), "echo \"$DATADIR $2\" >&3; exec cat <&3 >/dev/null");
		let supervisor = NodeSupervisor::with_node(node);

		let mut env = NodeEnv::new();
		env.insert("DATADIR".to_string(), "/data".to_string());
		let mut handle = supervisor
			.spawn(SpawnRequest {
				entry_path: dir.path().join("index.js"),
				args: vec!["second".to_string()],
				env,
				working_dir: None,
			})
			.await
			.unwrap();

		let mut stdio = handle.take_stdio().unwrap();
		let mut buf = vec![0u8; 32];
		let n = stdio.reader.read(&mut buf).await.unwrap();
		assert_eq!(String::from_utf8_lossy(&buf[..n]).trim(), "/data second");

		handle.kill().await.unwrap();
	}
}
