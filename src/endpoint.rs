//! Endpoint model (C11): parsing, rendering, and default state-DB path
//! derivation for the two trees being synchronized.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// A rooted tree on a local or remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
	Local { root: PathBuf },
	Remote { user: Option<String>, host: String, port: Option<u16>, root: PathBuf },
}

impl EndpointSpec {
	/// Accepts: bare path (`/abs/path`, `~/expand/me`), `local:/path`,
	/// `ssh://user@host[:port]/path`, and the legacy `user@host:path` form.
	pub fn parse(input: &str) -> Result<Self, SyncError> {
		if let Some(rest) = input.strip_prefix("ssh://") {
			return Self::parse_ssh_url(input, rest);
		}
		if let Some(rest) = input.strip_prefix("local:") {
			return Ok(EndpointSpec::Local { root: expand_home(rest) });
		}
		if let Some(spec) = Self::try_legacy_remote(input) {
			return spec;
		}
		Ok(EndpointSpec::Local { root: expand_home(input) })
	}

	fn parse_ssh_url(original: &str, rest: &str) -> Result<Self, SyncError> {
		let (auth_host, path) = rest.split_once('/').ok_or_else(|| SyncError::EndpointParse {
			input: original.to_string(),
			message: "ssh:// endpoint is missing a path".into(),
		})?;

		let (user, host_port) = match auth_host.split_once('@') {
			Some((u, hp)) => (Some(u.to_string()), hp),
			None => (None, auth_host),
		};

		let (host, port) = match host_port.split_once(':') {
			Some((h, p)) => {
				let port = p.parse::<u16>().map_err(|_| SyncError::EndpointParse {
					input: original.to_string(),
					message: format!("invalid port '{}'", p),
				})?;
				(h.to_string(), Some(port))
			}
			None => (host_port.to_string(), None),
		};

		if host.is_empty() {
			return Err(SyncError::EndpointParse {
				input: original.to_string(),
				message: "ssh:// endpoint is missing a host".into(),
			});
		}

		Ok(EndpointSpec::Remote { user, host, port, root: PathBuf::from(format!("/{}", path)) })
	}

	/// `user@host:path`, no port — the legacy form. Only triggers when a
	/// bare-path candidate would otherwise be ambiguous with a Windows-style
	/// drive letter never applies here (POSIX-only), so any `@` before the
	/// first `:` is enough to recognize it.
	fn try_legacy_remote(input: &str) -> Option<Result<Self, SyncError>> {
		let at = input.find('@')?;
		let colon = input[at..].find(':')? + at;
		let user = input[..at].to_string();
		let host = input[at + 1..colon].to_string();
		let path = &input[colon + 1..];
		if host.is_empty() || path.is_empty() {
			return None;
		}
		Some(Ok(EndpointSpec::Remote {
			user: Some(user),
			host,
			port: None,
			root: PathBuf::from(path),
		}))
	}

	/// Inverse of [`parse`](Self::parse).
	pub fn render(&self) -> String {
		match self {
			EndpointSpec::Local { root } => root.to_string_lossy().into_owned(),
			EndpointSpec::Remote { user, host, port, root } => {
				let mut s = String::from("ssh://");
				if let Some(user) = user {
					s.push_str(user);
					s.push('@');
				}
				s.push_str(host);
				if let Some(port) = port {
					s.push(':');
					s.push_str(&port.to_string());
				}
				if !root.is_absolute() {
					s.push('/');
				}
				s.push_str(&root.to_string_lossy());
				s
			}
		}
	}
}

impl fmt::Display for EndpointSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.render())
	}
}

fn expand_home(input: &str) -> PathBuf {
	if let Some(rest) = input.strip_prefix("~/") {
		if let Some(home) = dirs::home_dir() {
			return home.join(rest);
		}
	} else if input == "~" {
		if let Some(home) = dirs::home_dir() {
			return home;
		}
	}
	PathBuf::from(input)
}

/// Deterministic, non-cryptographic FNV-1a over an endpoint's rendered
/// string form, used to derive the default state-DB path. What matters per
/// the external interface is that it's a pure function of the pair; the
/// exact digest algorithm is otherwise unconstrained.
fn fnv1a_hex(s: &str) -> String {
	const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
	const PRIME: u64 = 0x100000001b3;
	let mut hash = OFFSET_BASIS;
	for byte in s.as_bytes() {
		hash ^= *byte as u64;
		hash = hash.wrapping_mul(PRIME);
	}
	format!("{:016x}", hash)
}

/// Default review-state store path for an endpoint pair:
/// `~/.limsync/<source-digest>__<destination-digest>.redb`.
pub fn default_state_db_path(source: &EndpointSpec, destination: &EndpointSpec) -> PathBuf {
	let source_digest = fnv1a_hex(&source.render());
	let destination_digest = fnv1a_hex(&destination.render());
	let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
	base.join(".limsync").join(format!("{}__{}.redb", source_digest, destination_digest))
}

/// Resolve an endpoint root, failing with a [`ScanError::MissingRoot`] if it
/// does not exist.
pub fn resolve_root(root: &Path) -> Result<PathBuf, SyncError> {
	std::fs::canonicalize(root)
		.map_err(|_| crate::error::ScanError::MissingRoot { path: root.to_string_lossy().into_owned() }.into())
}
