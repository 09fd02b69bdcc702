//! Ambient configuration: the scan/compare/apply tunables left as free
//! parameters by the component design, collected into one serde-mapped
//! struct. CLI parsing and top-level dispatch stay out of scope; this type
//! only owns the TOML (de)serialization contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Mtime divergence tolerated before two same-sized files are treated
	/// as `Unknown` rather than `Identical` (nanoseconds). `i64` here (not
	/// the `i128` the comparator uses internally) because `toml` has no
	/// 128-bit integer support; tolerances at that scale never approach
	/// `i64::MAX` nanoseconds (~292 years).
	pub mtime_tolerance_ns: i64,

	/// Scan progress callback throttle interval, in milliseconds.
	pub scan_progress_interval_ms: u64,

	/// Additional directory names pruned during scan, beyond the
	/// hard-coded exclude set.
	pub extra_excluded_dirs: Vec<String>,

	/// Additional file names pruned during scan, beyond the hard-coded
	/// exclude set.
	pub extra_excluded_files: Vec<String>,

	/// SSH connect timeout, in seconds.
	pub ssh_connect_timeout_secs: u64,

	/// Whether SSH sessions request compression.
	pub ssh_compression: bool,

	/// Require a round-trip confirmation on each SFTP put.
	pub sftp_put_confirm: bool,

	/// Emit an apply progress callback at least this often, in operations.
	pub progress_emit_every_ops: u64,

	/// Emit an apply progress callback at least this often, in
	/// milliseconds.
	pub progress_emit_every_ms: u64,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			mtime_tolerance_ns: crate::compare::DEFAULT_MTIME_TOLERANCE_NS as i64,
			scan_progress_interval_ms: 200,
			extra_excluded_dirs: Vec::new(),
			extra_excluded_files: Vec::new(),
			ssh_connect_timeout_secs: 10,
			ssh_compression: false,
			sftp_put_confirm: true,
			progress_emit_every_ops: 1,
			progress_emit_every_ms: 100,
		}
	}
}

impl Config {
	pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(s)
	}

	pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
		toml::to_string_pretty(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_matches_spec_defaults() {
		let config = Config::default();
		assert_eq!(config.mtime_tolerance_ns, 2_000_000_000);
		assert_eq!(config.scan_progress_interval_ms, 200);
		assert_eq!(config.ssh_connect_timeout_secs, 10);
	}

	#[test]
	fn round_trips_through_toml() {
		let config = Config::default();
		let toml = config.to_toml_string().unwrap();
		let back = Config::from_toml_str(&toml).unwrap();
		assert_eq!(config.mtime_tolerance_ns, back.mtime_tolerance_ns);
		assert_eq!(config.sftp_put_confirm, back.sftp_put_confirm);
	}
}
