//! Ignore-rule evaluation: nested `.dropboxignore` files with gitignore-like
//! patterns, evaluated ancestor-first so a deeper file can re-include what a
//! shallower one excluded.

mod ignore;

pub use ignore::IgnoreRules;

use std::fmt;

/// Hard-coded directory names pruned from every scan regardless of
/// `.dropboxignore` contents.
pub const EXCLUDED_DIR_NAMES: &[&str] = &[
	"node_modules",
	".tox",
	".venv",
	".limsync",
	"__pycache__",
	".pytest_cache",
	".cache",
	".ruff_cache",
];

/// Hard-coded file names pruned from every scan.
pub const EXCLUDED_FILE_NAMES: &[&str] = &[".DS_Store", "Icon\r"];

/// Name of the ignore file consulted at each directory level.
pub const IGNORE_FILE_NAME: &str = ".dropboxignore";

pub fn is_excluded_dir_name(name: &str) -> bool {
	EXCLUDED_DIR_NAMES.contains(&name)
}

pub fn is_excluded_file_name(name: &str) -> bool {
	EXCLUDED_FILE_NAMES.contains(&name)
}

/// Errors raised while compiling or applying ignore patterns.
#[derive(Debug)]
pub enum ExclusionError {
	InvalidPattern { pattern: String, message: String },
	Io(std::io::Error),
}

impl fmt::Display for ExclusionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExclusionError::InvalidPattern { pattern, message } => {
				write!(f, "invalid ignore pattern '{}': {}", pattern, message)
			}
			ExclusionError::Io(e) => write!(f, "failed reading ignore file: {}", e),
		}
	}
}

impl std::error::Error for ExclusionError {}

impl From<std::io::Error> for ExclusionError {
	fn from(e: std::io::Error) -> Self {
		ExclusionError::Io(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hard_coded_excludes_match_external_interface() {
		assert!(is_excluded_dir_name("node_modules"));
		assert!(is_excluded_dir_name(".venv"));
		assert!(!is_excluded_dir_name("src"));
		assert!(is_excluded_file_name(".DS_Store"));
		assert!(is_excluded_file_name("Icon\r"));
	}
}
