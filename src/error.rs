//! Error types for dirsync operations.

use std::error::Error;
use std::fmt;
use std::io;

use crate::exclusion::ExclusionError;
use crate::validation::ValidationError;

/// Top-level error every public entry point returns.
#[derive(Debug)]
pub enum SyncError {
	/// Malformed endpoint string, fatal to the invocation.
	EndpointParse { input: String, message: String },

	/// I/O error not otherwise classified.
	Io(io::Error),

	/// Scan-level error: missing root, failed SSH connect, helper nonzero exit.
	Scan(ScanError),

	/// Review-state store error (I/O only; schema skew is absorbed silently).
	Store(StoreError),

	/// SSH session pool error.
	Ssh(SshError),

	/// Ignore-rule evaluation error.
	Exclusion(ExclusionError),

	/// Path/config validation error.
	Validation(ValidationError),

	/// Operation aborted by the caller.
	Aborted,

	/// Generic error message.
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::EndpointParse { input, message } => {
				write!(f, "invalid endpoint '{}': {}", input, message)
			}
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Scan(e) => write!(f, "scan error: {}", e),
			SyncError::Store(e) => write!(f, "store error: {}", e),
			SyncError::Ssh(e) => write!(f, "SSH error: {}", e),
			SyncError::Exclusion(e) => write!(f, "exclusion error: {}", e),
			SyncError::Validation(e) => write!(f, "validation error: {}", e),
			SyncError::Aborted => write!(f, "operation aborted"),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(message: String) -> Self {
		SyncError::Other { message }
	}
}

impl From<ScanError> for SyncError {
	fn from(e: ScanError) -> Self {
		SyncError::Scan(e)
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Store(e)
	}
}

impl From<SshError> for SyncError {
	fn from(e: SshError) -> Self {
		SyncError::Ssh(e)
	}
}

impl From<ExclusionError> for SyncError {
	fn from(e: ExclusionError) -> Self {
		SyncError::Exclusion(e)
	}
}

impl From<ValidationError> for SyncError {
	fn from(e: ValidationError) -> Self {
		SyncError::Validation(e)
	}
}

/// Scan-level errors: fatal to a single scan.
#[derive(Debug)]
pub enum ScanError {
	MissingRoot { path: String },
	ConnectFailed { host: String, source: Box<dyn Error + Send + Sync> },
	HelperFailed { exit_code: Option<i32>, last_errors: Vec<String> },
	Protocol { message: String },
	InvalidRelpath { relpath: String, reason: String },
	Io(io::Error),
}

impl fmt::Display for ScanError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ScanError::MissingRoot { path } => write!(f, "root does not exist: {}", path),
			ScanError::ConnectFailed { host, source } => {
				write!(f, "failed to connect to {}: {}", host, source)
			}
			ScanError::HelperFailed { exit_code, last_errors } => {
				write!(
					f,
					"remote scan helper exited with {:?}: {}",
					exit_code,
					last_errors.join("; ")
				)
			}
			ScanError::Protocol { message } => write!(f, "remote scan protocol error: {}", message),
			ScanError::InvalidRelpath { relpath, reason } => {
				write!(f, "rejected relpath {:?}: {}", relpath, reason)
			}
			ScanError::Io(e) => write!(f, "I/O error during scan: {}", e),
		}
	}
}

impl Error for ScanError {}

impl From<io::Error> for ScanError {
	fn from(e: io::Error) -> Self {
		ScanError::Io(e)
	}
}

/// Review-state store errors. Schema version mismatches never surface here —
/// they trigger a silent rebuild instead.
#[derive(Debug)]
pub enum StoreError {
	Io(io::Error),
	Database(Box<dyn Error + Send + Sync>),
	Codec(serde_json::Error),
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::Io(e) => write!(f, "store I/O error: {}", e),
			StoreError::Database(e) => write!(f, "store database error: {}", e),
			StoreError::Codec(e) => write!(f, "store codec error: {}", e),
		}
	}
}

impl Error for StoreError {}

impl From<io::Error> for StoreError {
	fn from(e: io::Error) -> Self {
		StoreError::Io(e)
	}
}

impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		StoreError::Codec(e)
	}
}

impl From<redb::DatabaseError> for StoreError {
	fn from(e: redb::DatabaseError) -> Self {
		StoreError::Database(Box::new(e))
	}
}

impl From<redb::TransactionError> for StoreError {
	fn from(e: redb::TransactionError) -> Self {
		StoreError::Database(Box::new(e))
	}
}

impl From<redb::TableError> for StoreError {
	fn from(e: redb::TableError) -> Self {
		StoreError::Database(Box::new(e))
	}
}

impl From<redb::StorageError> for StoreError {
	fn from(e: redb::StorageError) -> Self {
		StoreError::Database(Box::new(e))
	}
}

impl From<redb::CommitError> for StoreError {
	fn from(e: redb::CommitError) -> Self {
		StoreError::Database(Box::new(e))
	}
}

/// One failed apply-engine operation, formatted per the
/// `"<kind> <relpath>: <message>"` convention used in progress events.
#[derive(Debug, Clone)]
pub struct ApplyOpError {
	pub kind: &'static str,
	pub relpath: String,
	pub message: String,
}

impl fmt::Display for ApplyOpError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}: {}", self.kind, self.relpath, self.message)
	}
}

/// SSH session pool errors.
#[derive(Debug)]
pub enum SshError {
	SpawnFailed { cmd: String, source: io::Error },
	HandshakeFailed { host: String, message: String },
	Disconnected { host: String },
	Timeout { host: String },
}

impl fmt::Display for SshError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SshError::SpawnFailed { cmd, source } => write!(f, "failed to spawn '{}': {}", cmd, source),
			SshError::HandshakeFailed { host, message } => {
				write!(f, "SSH handshake with {} failed: {}", host, message)
			}
			SshError::Disconnected { host } => write!(f, "SSH session to {} disconnected", host),
			SshError::Timeout { host } => write!(f, "SSH connect to {} timed out", host),
		}
	}
}

impl Error for SshError {}
