//! Side runtime (C10): the capability set the apply loop drives, with one
//! implementation per endpoint kind. The remote side is grounded on the
//! same pooled-session idiom as the scanner (`scan/remote.rs`): one
//! `ssh ... sh` child is kept alive and reused across every operation,
//! rather than spawned fresh per call, so a long apply run pays the SSH
//! handshake cost once per host.

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex as SyncMutex;

use async_trait::async_trait;

use crate::error::ApplyOpError;
use crate::ssh_pool::{SshHandle, SshKey, SshPool};
use crate::types::NodeType;

/// Minimal stat result the apply loop needs from either side.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStat {
	pub node_type: NodeType,
	pub size: u64,
	pub mode: u32,
	pub mtime_ns: i128,
}

fn op_err(kind: &'static str, relpath: &str, message: impl Into<String>) -> ApplyOpError {
	ApplyOpError { kind, relpath: relpath.to_string(), message: message.into() }
}

/// Capability set the apply loop is written against, so it never branches
/// on local vs. remote except inside `copy_between`.
#[async_trait]
pub trait Side: Send + Sync {
	fn root(&self) -> &Path;
	fn home(&self) -> &Path;

	/// Whether this side's transport has compression enabled. `LocalSide`
	/// has no transport, so it's always `false`.
	fn uses_compression(&self) -> bool {
		false
	}

	async fn lstat(&self, relpath: &str) -> Result<Option<NodeStat>, ApplyOpError>;
	async fn readlink(&self, relpath: &str) -> Result<String, ApplyOpError>;
	async fn write_symlink(&self, relpath: &str, target: &str) -> Result<(), ApplyOpError>;
	async fn remove(&self, relpath: &str) -> Result<(), ApplyOpError>;
	async fn read_file(&self, relpath: &str) -> Result<Vec<u8>, ApplyOpError>;
	async fn write_file(&self, relpath: &str, data: &[u8]) -> Result<(), ApplyOpError>;
	async fn chmod(&self, relpath: &str, mode: u32) -> Result<(), ApplyOpError>;
	async fn set_mtime(&self, relpath: &str, mtime_ns: i128) -> Result<(), ApplyOpError>;
	async fn ensure_parent(&self, relpath: &str) -> Result<(), ApplyOpError>;
}

/// Local filesystem side.
pub struct LocalSide {
	pub root: PathBuf,
	pub home: PathBuf,
	known_dirs: SyncMutex<HashSet<String>>,
}

impl LocalSide {
	pub fn new(root: PathBuf, home: PathBuf) -> Self {
		LocalSide { root, home, known_dirs: SyncMutex::new(HashSet::new()) }
	}

	fn abs(&self, relpath: &str) -> PathBuf {
		self.root.join(relpath)
	}
}

#[async_trait]
impl Side for LocalSide {
	fn root(&self) -> &Path {
		&self.root
	}

	fn home(&self) -> &Path {
		&self.home
	}

	async fn lstat(&self, relpath: &str) -> Result<Option<NodeStat>, ApplyOpError> {
		match std::fs::symlink_metadata(self.abs(relpath)) {
			Ok(meta) => {
				let node_type = if meta.file_type().is_symlink() {
					NodeType::Symlink
				} else if meta.file_type().is_dir() {
					NodeType::Directory
				} else {
					NodeType::File
				};
				Ok(Some(NodeStat {
					node_type,
					size: meta.len(),
					mode: meta.mode() & 0o7777,
					mtime_ns: meta.mtime() as i128 * 1_000_000_000 + meta.mtime_nsec() as i128,
				}))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(op_err("lstat", relpath, e.to_string())),
		}
	}

	async fn readlink(&self, relpath: &str) -> Result<String, ApplyOpError> {
		std::fs::read_link(self.abs(relpath))
			.map(|p| p.to_string_lossy().into_owned())
			.map_err(|e| op_err("readlink", relpath, e.to_string()))
	}

	async fn write_symlink(&self, relpath: &str, target: &str) -> Result<(), ApplyOpError> {
		let path = self.abs(relpath);
		if path.symlink_metadata().is_ok() {
			std::fs::remove_file(&path).map_err(|e| op_err("symlink", relpath, e.to_string()))?;
		}
		std::os::unix::fs::symlink(target, &path).map_err(|e| op_err("symlink", relpath, e.to_string()))
	}

	async fn remove(&self, relpath: &str) -> Result<(), ApplyOpError> {
		match std::fs::remove_file(self.abs(relpath)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(op_err("remove", relpath, e.to_string())),
		}
	}

	async fn read_file(&self, relpath: &str) -> Result<Vec<u8>, ApplyOpError> {
		std::fs::read(self.abs(relpath)).map_err(|e| op_err("read", relpath, e.to_string()))
	}

	async fn write_file(&self, relpath: &str, data: &[u8]) -> Result<(), ApplyOpError> {
		std::fs::write(self.abs(relpath), data).map_err(|e| op_err("write", relpath, e.to_string()))
	}

	async fn chmod(&self, relpath: &str, mode: u32) -> Result<(), ApplyOpError> {
		use std::os::unix::fs::PermissionsExt;
		std::fs::set_permissions(self.abs(relpath), std::fs::Permissions::from_mode(mode))
			.map_err(|e| op_err("chmod", relpath, e.to_string()))
	}

	async fn set_mtime(&self, relpath: &str, mtime_ns: i128) -> Result<(), ApplyOpError> {
		let secs = (mtime_ns / 1_000_000_000) as i64;
		let nanos = (mtime_ns.rem_euclid(1_000_000_000)) as u32;
		let mtime = filetime::FileTime::from_unix_time(secs, nanos);
		filetime::set_file_times(self.abs(relpath), mtime, mtime)
			.map_err(|e| op_err("set_times", relpath, e.to_string()))
	}

	async fn ensure_parent(&self, relpath: &str) -> Result<(), ApplyOpError> {
		let Some(parent_rel) = Path::new(relpath).parent().filter(|p| !p.as_os_str().is_empty()) else {
			return Ok(());
		};
		let parent_str = parent_rel.to_string_lossy().into_owned();
		if self.known_dirs.lock().unwrap_or_else(|e| e.into_inner()).contains(&parent_str) {
			return Ok(());
		}
		std::fs::create_dir_all(self.root.join(parent_rel))
			.map_err(|e| op_err("ensure_parent", relpath, e.to_string()))?;
		self.known_dirs.lock().unwrap_or_else(|e| e.into_inner()).insert(parent_str);
		Ok(())
	}
}

fn shq(s: &str) -> String {
	format!("'{}'", s.replace('\'', "'\\''"))
}

/// Exit-code sentinel appended to every command run over a pooled session,
/// since the shared shell has no built-in request/response framing for
/// arbitrary commands (unlike the scanner's newline-delimited JSON protocol).
const RC_MARKER: &str = "__DIRSYNC_RC__";

/// Runs `command` (already wrapped in its own `{ ...; }` group if it spans
/// multiple lines) over `handle`, appending an RC-sentinel so the reader
/// knows where the command's output ends and what it exited with. stderr is
/// merged into the captured output so error messages survive.
async fn run_session_command(
	handle: &SshHandle,
	relpath: &str,
	op: &'static str,
	command: &str,
) -> Result<Vec<u8>, ApplyOpError> {
	let framed = format!("{{ {} ; }} 2>&1; printf '\\n{}:%d\\n' $?", command, RC_MARKER);
	handle.send_line(&framed).await.map_err(|e| op_err(op, relpath, e.to_string()))?;
	read_until_marker(handle, relpath, op).await
}

/// Sends a multi-line command (e.g. one ending in a heredoc opener) as
/// individual protocol lines, then reads the framed result the same way.
async fn run_session_lines(
	handle: &SshHandle,
	relpath: &str,
	op: &'static str,
	lines: &[String],
) -> Result<Vec<u8>, ApplyOpError> {
	for line in lines {
		handle.send_line(line).await.map_err(|e| op_err(op, relpath, e.to_string()))?;
	}
	handle
		.send_line(&format!("printf '\\n{}:%d\\n' $?", RC_MARKER))
		.await
		.map_err(|e| op_err(op, relpath, e.to_string()))?;
	read_until_marker(handle, relpath, op).await
}

async fn read_until_marker(
	handle: &SshHandle,
	relpath: &str,
	op: &'static str,
) -> Result<Vec<u8>, ApplyOpError> {
	let prefix = format!("{}:", RC_MARKER);
	let mut collected = String::new();
	loop {
		let line = handle
			.read_line()
			.await
			.map_err(|e| op_err(op, relpath, e.to_string()))?
			.ok_or_else(|| op_err(op, relpath, "remote session closed"))?;
		if let Some(code) = line.strip_prefix(&prefix) {
			let code: i32 = code.trim().parse().unwrap_or(-1);
			let text = collected.trim_end_matches('\n').to_string();
			return if code == 0 { Ok(text.into_bytes()) } else { Err(op_err(op, relpath, text)) };
		}
		collected.push_str(&line);
		collected.push('\n');
	}
}

/// Remote side, reached over one reused SSH session per host rather than a
/// fresh subprocess per call; see [`crate::ssh_pool`].
pub struct RemoteSide {
	pub user: Option<String>,
	pub host: String,
	pub port: Option<u16>,
	pub root: PathBuf,
	pub home: PathBuf,
	pub compress: bool,
	pool: SshPool,
	known_dirs: SyncMutex<HashSet<String>>,
}

impl RemoteSide {
	/// Builds a side directly from an already-resolved root/home, without
	/// performing any remote expansion. Used when the caller has already
	/// resolved both (e.g. in tests), or when `root`/`home` are already
	/// absolute.
	pub fn new(
		pool: SshPool,
		user: Option<String>,
		host: String,
		port: Option<u16>,
		root: PathBuf,
		home: PathBuf,
		compress: bool,
	) -> Self {
		RemoteSide { user, host, port, root, home, compress, pool, known_dirs: SyncMutex::new(HashSet::new()) }
	}

	/// Resolves a possibly `~`-relative `root` and the remote `$HOME`
	/// against the pooled session before constructing a side, mirroring
	/// `_remote_expand_root`/`_remote_expand_home`: both go through
	/// `os.path.expanduser`, and the home lookup falls back to
	/// `/home/{user}` (or `/root` with no user) if the remote call fails.
	pub async fn connect(
		pool: SshPool,
		user: Option<String>,
		host: String,
		port: Option<u16>,
		root: &str,
		compress: bool,
	) -> Result<Self, ApplyOpError> {
		let key = SshKey { host: host.clone(), user: user.clone(), port, compress };
		let handle = pool.acquire(key).await.map_err(|e| op_err("connect", root, e.to_string()))?;

		let expand_root_cmd = format!(
			"python3 -c \"import os,sys; print(os.path.expanduser(sys.argv[1]))\" {}",
			shq(root)
		);
		let expanded_root = match run_session_command(&handle, root, "expand_root", &expand_root_cmd).await {
			Ok(out) => String::from_utf8_lossy(&out).trim().to_string(),
			Err(_) => root.to_string(),
		};

		let expand_home_cmd = "python3 -c \"import os; print(os.path.expanduser('~'))\"";
		let home = match run_session_command(&handle, root, "expand_home", expand_home_cmd).await {
			Ok(out) => String::from_utf8_lossy(&out).trim().to_string(),
			Err(_) => match &user {
				Some(u) => format!("/home/{}", u),
				None => "/root".to_string(),
			},
		};

		drop(handle);
		Ok(RemoteSide::new(pool, user, host, port, PathBuf::from(expanded_root), PathBuf::from(home), compress))
	}

	fn key(&self) -> SshKey {
		SshKey { host: self.host.clone(), user: self.user.clone(), port: self.port, compress: self.compress }
	}

	fn abs(&self, relpath: &str) -> String {
		format!("{}/{}", self.root.to_string_lossy().trim_end_matches('/'), relpath)
	}

	async fn handle(&self, relpath: &str, op: &'static str) -> Result<SshHandle, ApplyOpError> {
		self.pool.acquire(self.key()).await.map_err(|e| op_err(op, relpath, e.to_string()))
	}

	async fn run(&self, relpath: &str, op: &'static str, command: &str) -> Result<Vec<u8>, ApplyOpError> {
		let handle = self.handle(relpath, op).await?;
		run_session_command(&handle, relpath, op, command).await
	}
}

#[async_trait]
impl Side for RemoteSide {
	fn root(&self) -> &Path {
		&self.root
	}

	fn home(&self) -> &Path {
		&self.home
	}

	fn uses_compression(&self) -> bool {
		self.compress
	}

	async fn lstat(&self, relpath: &str) -> Result<Option<NodeStat>, ApplyOpError> {
		let path = self.abs(relpath);
		let script = format!(
			"python3 -c \"import os,sys,stat; \
			 st=os.lstat(sys.argv[1]); \
			 t='dir' if stat.S_ISDIR(st.st_mode) else ('symlink' if stat.S_ISLNK(st.st_mode) else 'file'); \
			 print(t, st.st_size, stat.S_IMODE(st.st_mode), st.st_mtime_ns)\" {path} 2>/dev/null || echo __missing__",
			path = shq(&path),
		);
		let out = match self.run(relpath, "lstat", &script).await {
			Ok(out) => out,
			Err(e) => return Err(e),
		};
		let text = String::from_utf8_lossy(&out);
		let text = text.trim();
		if text.is_empty() || text == "__missing__" {
			return Ok(None);
		}
		let mut parts = text.split_whitespace();
		let node_type = match parts.next() {
			Some("dir") => NodeType::Directory,
			Some("symlink") => NodeType::Symlink,
			_ => NodeType::File,
		};
		let size: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
		let mode: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
		let mtime_ns: i128 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
		Ok(Some(NodeStat { node_type, size, mode, mtime_ns }))
	}

	async fn readlink(&self, relpath: &str) -> Result<String, ApplyOpError> {
		let path = self.abs(relpath);
		let script = format!("readlink {}", shq(&path));
		let out = self.run(relpath, "readlink", &script).await?;
		Ok(String::from_utf8_lossy(&out).trim().to_string())
	}

	async fn write_symlink(&self, relpath: &str, target: &str) -> Result<(), ApplyOpError> {
		let path = self.abs(relpath);
		let script = format!("rm -f {} && ln -s {} {}", shq(&path), shq(target), shq(&path));
		self.run(relpath, "symlink", &script).await?;
		Ok(())
	}

	async fn remove(&self, relpath: &str) -> Result<(), ApplyOpError> {
		let path = self.abs(relpath);
		let script = format!("rm -f {}", shq(&path));
		self.run(relpath, "remove", &script).await?;
		Ok(())
	}

	async fn read_file(&self, relpath: &str) -> Result<Vec<u8>, ApplyOpError> {
		let path = self.abs(relpath);
		let script = format!(
			"python3 -c \"import sys,binascii; sys.stdout.write(binascii.hexlify(open(sys.argv[1],'rb').read()).decode())\" {}",
			shq(&path),
		);
		let out = self.run(relpath, "read", &script).await?;
		let hex_text: String = String::from_utf8_lossy(&out).split_whitespace().collect();
		hex::decode(hex_text).map_err(|e| op_err("read", relpath, format!("malformed hex payload: {}", e)))
	}

	async fn write_file(&self, relpath: &str, data: &[u8]) -> Result<(), ApplyOpError> {
		let path = self.abs(relpath);
		let marker = "DIRSYNC_PAYLOAD_EOF";
		let decode_cmd = format!(
			"python3 -c \"import sys,binascii; open(sys.argv[1],'wb').write(binascii.unhexlify(sys.stdin.read().strip()))\" {} 2>&1 <<'{}'",
			shq(&path),
			marker,
		);
		let hex_body = hex::encode(data);
		let mut lines = vec![decode_cmd];
		// Keep each heredoc line well under typical terminal/pipe buffer
		// limits; the remote side concatenates them before decoding.
		for chunk in hex_body.as_bytes().chunks(4096) {
			lines.push(String::from_utf8(chunk.to_vec()).expect("hex is ASCII"));
		}
		lines.push(marker.to_string());

		let handle = self.handle(relpath, "write").await?;
		run_session_lines(&handle, relpath, "write", &lines).await?;
		Ok(())
	}

	async fn chmod(&self, relpath: &str, mode: u32) -> Result<(), ApplyOpError> {
		let path = self.abs(relpath);
		let script = format!("chmod {:o} {}", mode, shq(&path));
		self.run(relpath, "chmod", &script).await?;
		Ok(())
	}

	async fn set_mtime(&self, relpath: &str, mtime_ns: i128) -> Result<(), ApplyOpError> {
		let path = self.abs(relpath);
		let secs = mtime_ns / 1_000_000_000;
		let script = format!("touch -d @{} {}", secs, shq(&path));
		self.run(relpath, "set_times", &script).await?;
		Ok(())
	}

	async fn ensure_parent(&self, relpath: &str) -> Result<(), ApplyOpError> {
		let Some(parent_rel) = Path::new(relpath).parent().filter(|p| !p.as_os_str().is_empty()) else {
			return Ok(());
		};
		let parent_str = parent_rel.to_string_lossy().into_owned();
		if self.known_dirs.lock().unwrap_or_else(|e| e.into_inner()).contains(&parent_str) {
			return Ok(());
		}
		let parent_abs = self.abs(&parent_str);
		let script = format!("mkdir -p {}", shq(&parent_abs));
		self.run(relpath, "ensure_parent", &script).await?;
		self.known_dirs.lock().unwrap_or_else(|e| e.into_inner()).insert(parent_str);
		Ok(())
	}
}
