//! Remote scanner: drives the embedded Python helper over a pooled SSH
//! session and turns its newline-delimited JSON event stream into the same
//! `{relpath → FileRecord}` map the local scanner produces.

use serde::Deserialize;

use crate::error::ScanError;
use crate::progress::ScanProgressThrottle;
use crate::scan::{FileMap, ProgressCallback, ScanProgress, ScanSummary};
use crate::ssh_pool::{SshKey, SshPool};
use crate::types::{FileRecord, NodeType};
use crate::validation::validate_path_safe;
use std::path::Path;
use std::time::Duration;

/// The helper script run on the remote host, one self-contained file with no
/// external imports beyond the standard library.
const HELPER_SOURCE: &str = include_str!("remote_helper.py");

pub struct RemoteScanOptions<'a> {
	pub subtree: Option<&'a str>,
	pub progress_interval: Duration,
}

impl Default for RemoteScanOptions<'_> {
	fn default() -> Self {
		RemoteScanOptions { subtree: None, progress_interval: Duration::from_millis(200) }
	}
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum HelperEvent {
	Progress { relpath: String, dirs_scanned: u64, files_seen: u64 },
	Record {
		relpath: String,
		node_type: String,
		size: u64,
		// serde_json's derive path has no i128 support (same constraint as
		// the TOML config); the helper never emits a value outside i64 range.
		mtime_ns: i64,
		mode: u32,
		link_target: Option<String>,
		link_target_key: Option<String>,
		owner: Option<String>,
		group: Option<String>,
	},
	Error { message: String, #[serde(default)] path: Option<String> },
	Done { dirs_scanned: u64, files_seen: u64, #[serde(default)] errors: u64 },
}

fn parse_node_type(raw: &str) -> NodeType {
	match raw {
		"dir" => NodeType::Directory,
		"symlink" => NodeType::Symlink,
		_ => NodeType::File,
	}
}

fn shell_quote(value: &str) -> String {
	format!("'{}'", value.replace('\'', "'\\''"))
}

/// Rejects a helper-supplied relpath before it ever reaches the [`FileMap`],
/// since the helper runs on a remote host this process doesn't control.
fn validate_record_relpath(relpath: &str) -> Result<(), ScanError> {
	validate_path_safe(Path::new(relpath))
		.map_err(|e| ScanError::InvalidRelpath { relpath: relpath.to_string(), reason: e.to_string() })
}

/// Scans `root` on the host identified by `key`, acquiring a pooled SSH
/// session and feeding it the embedded helper over stdin.
pub async fn scan_remote(
	pool: &SshPool,
	key: SshKey,
	root: &str,
	options: &RemoteScanOptions<'_>,
	on_progress: Option<&ProgressCallback<'_>>,
) -> Result<(FileMap, ScanSummary), ScanError> {
	let handle = pool.acquire(key.clone()).await.map_err(|e| ScanError::ConnectFailed {
		host: key.host.clone(),
		source: Box::new(e),
	})?;

	// `python3 -u -` consumes the entirety of its stdin as script source
	// before running anything, so the launch arguments can't travel over
	// the same pipe as a preceding line. Instead the remote shell gets one
	// command line that reads the script from a heredoc it demultiplexes
	// itself; the shell stays alive afterward for the next pooled use.
	let mut command = format!(
		"python3 -u - --root {} --progress-interval {:.3}",
		shell_quote(root),
		options.progress_interval.as_secs_f64(),
	);
	if let Some(subtree) = options.subtree {
		command.push_str(" --subtree ");
		command.push_str(&shell_quote(subtree));
	}
	command.push_str(" <<'DIRSYNC_HELPER_EOF'");
	handle.send_line(&command).await.map_err(ScanError::from)?;

	for line in HELPER_SOURCE.lines() {
		handle.send_line(line).await.map_err(ScanError::from)?;
	}
	handle.send_line("DIRSYNC_HELPER_EOF").await.map_err(ScanError::from)?;

	let mut map = FileMap::new();
	let mut dirs_scanned = 0u64;
	let mut files_seen = 0u64;
	let mut errors: Vec<String> = Vec::new();
	let throttle = ScanProgressThrottle::new(options.progress_interval);
	let mut saw_done = false;

	while let Some(line) = handle.read_line().await.map_err(ScanError::from)? {
		if line.trim().is_empty() {
			continue;
		}
		let event: HelperEvent = match serde_json::from_str(&line) {
			Ok(event) => event,
			Err(e) => {
				errors.push(format!("malformed helper event: {}", e));
				continue;
			}
		};

		match event {
			HelperEvent::Progress { relpath, dirs_scanned: d, files_seen: f } => {
				dirs_scanned = d;
				files_seen = f;
				if let Some(cb) = on_progress {
					if throttle.should_emit() {
						cb(ScanProgress { current_relpath: relpath, dirs_scanned, files_seen });
					}
				}
			}
			HelperEvent::Record {
				relpath,
				node_type,
				size,
				mtime_ns,
				mode,
				link_target,
				link_target_key,
				owner,
				group,
			} => {
				validate_record_relpath(&relpath)?;
				map.insert(
					relpath.clone(),
					FileRecord {
						relpath,
						node_type: parse_node_type(&node_type),
						size,
						mtime_ns: mtime_ns as i128,
						mode,
						link_target,
						link_target_key,
						owner,
						group,
					},
				);
			}
			HelperEvent::Error { message, path } => {
				errors.push(match path {
					Some(path) => format!("{}: {}", path, message),
					None => message,
				});
			}
			HelperEvent::Done { dirs_scanned: d, files_seen: f, errors: reported } => {
				dirs_scanned = d;
				files_seen = f;
				let _ = reported;
				saw_done = true;
				break;
			}
		}
	}

	if !saw_done {
		let tail = errors.iter().rev().take(5).rev().cloned().collect();
		return Err(ScanError::HelperFailed { exit_code: None, last_errors: tail });
	}

	Ok((map, ScanSummary { dirs_scanned, files_seen, errors }))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::SshError;
	use crate::ssh_pool::{SshConnector, SshSession};
	use async_trait::async_trait;
	use std::process::Stdio;
	use tokio::io::BufReader;
	use tokio::sync::Mutex as AsyncMutex;

	/// Stands in for the remote host: a local `sh` reads whatever this test
	/// writes to its stdin (the launch line plus the embedded helper
	/// source via heredoc) and behaves exactly like the real remote shell
	/// would.
	struct LocalPythonConnector;

	#[async_trait]
	impl SshConnector for LocalPythonConnector {
		async fn connect(&self, key: &SshKey) -> Result<SshSession, SshError> {
			let _ = key;
			let mut cmd = tokio::process::Command::new("sh");
			cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
			let mut child =
				cmd.spawn().map_err(|e| SshError::SpawnFailed { cmd: "sh".to_string(), source: e })?;
			let stdin = child.stdin.take().unwrap();
			let stdout = child.stdout.take().unwrap();
			Ok(unsafe_session(child, stdin, stdout))
		}
	}

	fn unsafe_session(
		child: tokio::process::Child,
		stdin: tokio::process::ChildStdin,
		stdout: tokio::process::ChildStdout,
	) -> SshSession {
		SshSession::from_parts(
			AsyncMutex::new(child),
			AsyncMutex::new(stdin),
			AsyncMutex::new(BufReader::new(stdout)),
		)
	}

	fn has_python3() -> bool {
		std::process::Command::new("python3")
			.arg("--version")
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.status()
			.map(|s| s.success())
			.unwrap_or(false)
	}

	#[tokio::test]
	async fn scans_a_tree_through_the_embedded_helper() {
		if !has_python3() {
			eprintln!("skipping: python3 not available");
			return;
		}
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
		std::fs::create_dir(dir.path().join("sub")).unwrap();
		std::fs::write(dir.path().join("sub/b.txt"), "there").unwrap();

		let pool = SshPool::new(std::sync::Arc::new(LocalPythonConnector));
		let key = SshKey { host: "local-test".into(), user: None, port: None, compress: false };
		let options = RemoteScanOptions::default();
		let (map, summary) =
			scan_remote(&pool, key, dir.path().to_str().unwrap(), &options, None).await.unwrap();

		assert!(map.contains_key("a.txt"));
		assert!(map.contains_key("sub/b.txt"));
		assert_eq!(summary.files_seen, 2);
	}

	#[test]
	fn quotes_paths_with_single_quotes() {
		assert_eq!(shell_quote("it's/here"), "'it'\\''s/here'");
	}

	#[test]
	fn rejects_a_helper_relpath_that_escapes_the_root() {
		let err = validate_record_relpath("../etc/passwd").unwrap_err();
		assert!(matches!(err, ScanError::InvalidRelpath { .. }));
	}

	#[test]
	fn accepts_an_ordinary_nested_relpath() {
		assert!(validate_record_relpath("sub/dir/file.txt").is_ok());
	}
}
