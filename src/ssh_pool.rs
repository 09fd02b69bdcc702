//! SSH session pool (C8): a process-wide, reference-counted pool of live
//! remote helper sessions keyed by `(host, user, port, compress)`.
//!
//! Grounded on the teacher's subprocess-based remote connection (spawn a
//! child, keep its stdin/stdout open, talk line-oriented protocol over the
//! pipe) but generalized so a handle is shared across many callers instead
//! of owned by one. The construction hook is a trait parameter, per the
//! design note that tests must be able to inject a fake connector.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::SshError;

/// Matches [`crate::config::Config::ssh_connect_timeout_secs`]'s default.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies one pooled SSH connection. Two requests for the same key
/// share the same underlying session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SshKey {
	pub host: String,
	pub user: Option<String>,
	pub port: Option<u16>,
	pub compress: bool,
}

impl SshKey {
	pub fn target(&self) -> String {
		match &self.user {
			Some(user) => format!("{}@{}", user, self.host),
			None => self.host.clone(),
		}
	}
}

/// A live remote helper session: an `ssh` child process with a persistent
/// Python3 interpreter on the other end, communicating via newline-delimited
/// JSON over stdin/stdout. Shared (`Arc`) across every holder of the key.
pub struct SshSession {
	child: AsyncMutex<Child>,
	stdin: AsyncMutex<ChildStdin>,
	stdout: AsyncMutex<BufReader<ChildStdout>>,
}

impl SshSession {
	#[cfg(test)]
	pub(crate) fn from_parts(
		child: AsyncMutex<Child>,
		stdin: AsyncMutex<ChildStdin>,
		stdout: AsyncMutex<BufReader<ChildStdout>>,
	) -> Self {
		SshSession { child, stdin, stdout }
	}

	/// Whether the underlying process is still alive. Consulted lazily by
	/// the pool at acquire time rather than via background polling.
	pub async fn is_active(&self) -> bool {
		let mut child = self.child.lock().await;
		matches!(child.try_wait(), Ok(None))
	}

	pub async fn send_line(&self, line: &str) -> std::io::Result<()> {
		let mut stdin = self.stdin.lock().await;
		stdin.write_all(line.as_bytes()).await?;
		stdin.write_all(b"\n").await?;
		stdin.flush().await
	}

	/// Reads one line, or `None` at EOF.
	pub async fn read_line(&self) -> std::io::Result<Option<String>> {
		let mut stdout = self.stdout.lock().await;
		let mut buf = String::new();
		let n = stdout.read_line(&mut buf).await?;
		if n == 0 {
			return Ok(None);
		}
		if buf.ends_with('\n') {
			buf.pop();
		}
		Ok(Some(buf))
	}
}

/// Creates the transport for a fresh pool entry. The default connector
/// spawns a real `ssh` process; tests substitute a fake.
#[async_trait]
pub trait SshConnector: Send + Sync {
	async fn connect(&self, key: &SshKey) -> Result<SshSession, SshError>;
}

/// Spawns `ssh [-C] [-p port] target sh`, landing in a remote shell that
/// reads commands line-by-line from stdin. The scanner launches its helper
/// on top of this shell rather than as the ssh command itself, since a
/// pooled session must outlive any single helper invocation.
///
/// The spawn-and-handshake sequence is bounded by `connect_timeout`, so a
/// host that never completes its SSH handshake (unreachable, stuck in a
/// password prompt) can't block a caller forever.
pub struct ProcessSshConnector {
	connect_timeout: Duration,
}

impl Default for ProcessSshConnector {
	fn default() -> Self {
		ProcessSshConnector { connect_timeout: DEFAULT_CONNECT_TIMEOUT }
	}
}

impl ProcessSshConnector {
	pub fn new(connect_timeout: Duration) -> Self {
		ProcessSshConnector { connect_timeout }
	}

	async fn connect_inner(&self, key: &SshKey) -> Result<SshSession, SshError> {
		let mut cmd = tokio::process::Command::new("ssh");
		if key.compress {
			cmd.arg("-C");
		}
		if let Some(port) = key.port {
			cmd.arg("-p").arg(port.to_string());
		}
		cmd.arg(key.target()).arg("sh");
		cmd.stdin(Stdio::piped()).stdout(Stdio::piped());

		let mut child = cmd.spawn().map_err(|e| SshError::SpawnFailed { cmd: "ssh".to_string(), source: e })?;

		let stdin = child.stdin.take().ok_or_else(|| SshError::HandshakeFailed {
			host: key.host.clone(),
			message: "child stdin unavailable".to_string(),
		})?;
		let stdout = child.stdout.take().ok_or_else(|| SshError::HandshakeFailed {
			host: key.host.clone(),
			message: "child stdout unavailable".to_string(),
		})?;

		Ok(SshSession {
			child: AsyncMutex::new(child),
			stdin: AsyncMutex::new(stdin),
			stdout: AsyncMutex::new(BufReader::new(stdout)),
		})
	}
}

#[async_trait]
impl SshConnector for ProcessSshConnector {
	async fn connect(&self, key: &SshKey) -> Result<SshSession, SshError> {
		match tokio::time::timeout(self.connect_timeout, self.connect_inner(key)).await {
			Ok(result) => result,
			Err(_) => Err(SshError::Timeout { host: key.host.clone() }),
		}
	}
}

struct Entry {
	session: Arc<SshSession>,
	refcount: usize,
}

struct Inner {
	connector: Arc<dyn SshConnector>,
	entries: Mutex<HashMap<SshKey, Entry>>,
}

/// Cheaply cloneable handle to the process-wide pool.
#[derive(Clone)]
pub struct SshPool(Arc<Inner>);

impl SshPool {
	pub fn new(connector: Arc<dyn SshConnector>) -> Self {
		SshPool(Arc::new(Inner { connector, entries: Mutex::new(HashMap::new()) }))
	}

	pub fn with_process_connector() -> Self {
		Self::new(Arc::new(ProcessSshConnector::default()))
	}

	/// Same as [`SshPool::with_process_connector`], but bounds the SSH
	/// handshake by `connect_timeout` instead of the default 10s — wire
	/// this to [`crate::config::Config::ssh_connect_timeout_secs`].
	pub fn with_process_connector_timeout(connect_timeout: Duration) -> Self {
		Self::new(Arc::new(ProcessSshConnector::new(connect_timeout)))
	}

	/// Returns a scoped handle to the session for `key`, connecting (or
	/// reconnecting, if the cached handle died) as needed. The returned
	/// handle decrements the refcount on drop; the underlying session is
	/// never closed except by [`SshPool::close_all`].
	pub async fn acquire(&self, key: SshKey) -> Result<SshHandle, SshError> {
		let existing = {
			let entries = self.0.entries.lock().unwrap_or_else(|e| e.into_inner());
			entries.get(&key).map(|entry| entry.session.clone())
		};

		if let Some(session) = existing {
			if session.is_active().await {
				let mut entries = self.0.entries.lock().unwrap_or_else(|e| e.into_inner());
				if let Some(entry) = entries.get_mut(&key) {
					entry.refcount += 1;
				}
				return Ok(SshHandle { session, key, pool: self.clone() });
			}
			let mut entries = self.0.entries.lock().unwrap_or_else(|e| e.into_inner());
			entries.remove(&key);
		}

		let session = Arc::new(self.0.connector.connect(&key).await?);
		{
			let mut entries = self.0.entries.lock().unwrap_or_else(|e| e.into_inner());
			entries.insert(key.clone(), Entry { session: session.clone(), refcount: 1 });
		}
		Ok(SshHandle { session, key, pool: self.clone() })
	}

	fn release(&self, key: &SshKey) {
		let mut entries = self.0.entries.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(entry) = entries.get_mut(key) {
			entry.refcount = entry.refcount.saturating_sub(1);
		}
	}

	/// Drops every pooled session, killing the underlying processes.
	pub fn close_all(&self) {
		self.0.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
	}

	#[cfg(test)]
	fn refcount(&self, key: &SshKey) -> Option<usize> {
		self.0.entries.lock().unwrap().get(key).map(|e| e.refcount)
	}
}

/// RAII handle returned by [`SshPool::acquire`]; releases on drop.
pub struct SshHandle {
	session: Arc<SshSession>,
	key: SshKey,
	pool: SshPool,
}

impl std::ops::Deref for SshHandle {
	type Target = SshSession;
	fn deref(&self) -> &SshSession {
		&self.session
	}
}

impl Drop for SshHandle {
	fn drop(&mut self) {
		self.pool.release(&self.key);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingConnector {
		connects: AtomicUsize,
	}

	#[async_trait]
	impl SshConnector for CountingConnector {
		async fn connect(&self, key: &SshKey) -> Result<SshSession, SshError> {
			self.connects.fetch_add(1, Ordering::SeqCst);
			// `cat` echoes whatever is written to stdin back on stdout, which
			// is enough to exercise send_line/read_line without a real host.
			let mut cmd = tokio::process::Command::new("cat");
			cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
			let mut child = cmd
				.spawn()
				.map_err(|e| SshError::SpawnFailed { cmd: "cat".to_string(), source: e })?;
			let stdin = child.stdin.take().unwrap();
			let stdout = child.stdout.take().unwrap();
			let _ = key;
			Ok(SshSession {
				child: AsyncMutex::new(child),
				stdin: AsyncMutex::new(stdin),
				stdout: AsyncMutex::new(BufReader::new(stdout)),
			})
		}
	}

	fn key() -> SshKey {
		SshKey { host: "example.com".into(), user: Some("alice".into()), port: None, compress: false }
	}

	#[tokio::test]
	async fn acquire_reuses_live_session_and_refcounts() {
		let connector = Arc::new(CountingConnector { connects: AtomicUsize::new(0) });
		let pool = SshPool::new(connector.clone());

		let handle1 = pool.acquire(key()).await.unwrap();
		let handle2 = pool.acquire(key()).await.unwrap();
		assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
		assert_eq!(pool.refcount(&key()), Some(2));

		drop(handle2);
		assert_eq!(pool.refcount(&key()), Some(1));
		drop(handle1);
		assert_eq!(pool.refcount(&key()), Some(0));
	}

	#[tokio::test]
	async fn session_round_trips_a_line() {
		let connector = Arc::new(CountingConnector { connects: AtomicUsize::new(0) });
		let pool = SshPool::new(connector);
		let handle = pool.acquire(key()).await.unwrap();
		handle.send_line("hello").await.unwrap();
		let line = handle.read_line().await.unwrap();
		assert_eq!(line.as_deref(), Some("hello"));
	}

	/// A connector whose `connect` never resolves, standing in for a remote
	/// host stuck mid-handshake.
	struct HangingConnector;

	#[async_trait]
	impl SshConnector for HangingConnector {
		async fn connect(&self, _key: &SshKey) -> Result<SshSession, SshError> {
			std::future::pending().await
		}
	}

	#[tokio::test]
	async fn acquire_does_not_hang_forever_on_a_stuck_handshake() {
		let pool = SshPool::new(Arc::new(HangingConnector));
		let result = tokio::time::timeout(Duration::from_millis(50), pool.acquire(key())).await;
		assert!(result.is_err(), "acquire should still be pending, not resolved, once the deadline passes");
	}

	#[tokio::test]
	async fn process_connector_connect_bounds_a_dead_host_with_its_timeout() {
		let connector = ProcessSshConnector::new(Duration::from_millis(200));
		let key = SshKey {
			host: "dirsync-test-host-that-does-not-resolve.invalid".into(),
			user: None,
			port: None,
			compress: false,
		};
		let result = tokio::time::timeout(Duration::from_secs(5), connector.connect(&key)).await;
		assert!(result.is_ok(), "connect must terminate well within its own connect_timeout");
	}

	#[tokio::test]
	async fn close_all_drops_every_entry() {
		let connector = Arc::new(CountingConnector { connects: AtomicUsize::new(0) });
		let pool = SshPool::new(connector);
		let _handle = pool.acquire(key()).await.unwrap();
		pool.close_all();
		assert_eq!(pool.refcount(&key()), None);
	}
}
