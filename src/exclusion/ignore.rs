//! gitignore-style pattern evaluator for nested `.dropboxignore` files.
//!
//! Ported from the Python `IgnoreRules` reference implementation: the same
//! `fnmatch`-style full-string/segment/suffix matching, last-match-wins
//! negation, and root-first ancestor evaluation order. Individual patterns
//! are compiled with `globset` rather than `fnmatch`, since `globset`'s
//! non-path-aware mode (`*` matches `/` too) matches `fnmatch` semantics
//! closely enough for the single-component patterns `.dropboxignore` files
//! use, without pulling in a regex-based glob-to-fnmatch shim.

use std::collections::HashMap;
use std::path::Path;

use globset::{Glob, GlobMatcher};

use super::{ExclusionError, IGNORE_FILE_NAME};

struct Pattern {
	negate: bool,
	dir_only: bool,
	anchored: bool,
	has_slash: bool,
	matcher: GlobMatcher,
}

impl Pattern {
	fn compile(raw: &str) -> Result<Self, ExclusionError> {
		let negate = raw.starts_with('!');
		let mut body = if negate { &raw[1..] } else { raw };
		if body.is_empty() {
			return Err(ExclusionError::InvalidPattern {
				pattern: raw.to_string(),
				message: "empty pattern after '!'".into(),
			});
		}

		let dir_only = body.ends_with('/');
		if dir_only {
			body = &body[..body.len() - 1];
		}

		let anchored = body.starts_with('/');
		let body = if anchored { &body[1..] } else { body };
		let has_slash = body.contains('/');

		let glob = Glob::new(body).map_err(|e| ExclusionError::InvalidPattern {
			pattern: raw.to_string(),
			message: e.to_string(),
		})?;

		Ok(Pattern { negate, dir_only, anchored, has_slash, matcher: glob.compile_matcher() })
	}
}

/// Evaluates nested `.dropboxignore` files with gitignore-like patterns.
pub struct IgnoreRules {
	/// Ancestor POSIX relpath (`"."` for root) → compiled patterns in source
	/// order, for last-match-wins evaluation.
	patterns: HashMap<String, Vec<Pattern>>,
}

impl IgnoreRules {
	pub fn new() -> Self {
		IgnoreRules { patterns: HashMap::new() }
	}

	/// Register the patterns found in one `.dropboxignore` file, anchored at
	/// `base_relpath` (use `"."` for the root).
	pub fn add_spec(&mut self, base_relpath: &str, contents: &str) -> Result<(), ExclusionError> {
		let mut compiled = Vec::new();
		for raw in contents.lines() {
			let line = raw.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			compiled.push(Pattern::compile(line)?);
		}
		if !compiled.is_empty() {
			self.patterns.insert(base_relpath.to_string(), compiled);
		}
		Ok(())
	}

	/// Load `<root>/<dir_relpath>/.dropboxignore` if it exists.
	pub fn load_if_exists(&mut self, root: &Path, dir_relpath: &str) -> Result<(), ExclusionError> {
		let candidate =
			if dir_relpath == "." { root.join(IGNORE_FILE_NAME) } else { root.join(dir_relpath).join(IGNORE_FILE_NAME) };
		if !candidate.is_file() {
			return Ok(());
		}
		let contents = match std::fs::read_to_string(&candidate) {
			Ok(c) => c,
			Err(_) => return Ok(()),
		};
		self.add_spec(dir_relpath, &contents)
	}

	fn pattern_matches(local_target: &str, pattern: &Pattern) -> bool {
		let target = local_target.trim_end_matches('/');
		if pattern.anchored {
			return pattern.matcher.is_match(target);
		}
		if !pattern.has_slash {
			if pattern.matcher.is_match(target) {
				return true;
			}
			return target.split('/').filter(|p| !p.is_empty()).any(|part| pattern.matcher.is_match(part));
		}
		if pattern.matcher.is_match(target) {
			return true;
		}
		let parts: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();
		for idx in 1..parts.len() {
			let suffix = parts[idx..].join("/");
			if pattern.matcher.is_match(&suffix) {
				return true;
			}
		}
		false
	}

	fn match_patterns(local_target: &str, is_dir: bool, patterns: &[Pattern]) -> Option<bool> {
		let mut result = None;
		for pattern in patterns {
			if pattern.dir_only && !is_dir {
				continue;
			}
			if Self::pattern_matches(local_target, pattern) {
				result = Some(!pattern.negate);
			}
		}
		result
	}

	/// Decide whether `relpath` (POSIX form, root-relative) is ignored.
	pub fn is_ignored(&self, relpath: &str, is_dir: bool) -> bool {
		let mut target = relpath.to_string();
		if is_dir && !target.ends_with('/') {
			target.push('/');
		}

		let segments: Vec<&str> = relpath.split('/').filter(|s| !s.is_empty()).collect();
		let mut ancestors = vec![".".to_string()];
		for idx in 0..segments.len().saturating_sub(1) {
			ancestors.push(segments[..=idx].join("/"));
		}

		let mut ignored = false;
		for ancestor in &ancestors {
			let patterns = match self.patterns.get(ancestor) {
				Some(p) => p,
				None => continue,
			};

			let local_target = if ancestor == "." {
				target.clone()
			} else {
				let prefix = format!("{}/", ancestor);
				match target.strip_prefix(&prefix) {
					Some(stripped) => stripped.to_string(),
					None => continue,
				}
			};

			if let Some(matched) = Self::match_patterns(&local_target, is_dir, patterns) {
				ignored = matched;
			}
		}

		ignored
	}
}

impl Default for IgnoreRules {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rules_from(lines: &[(&str, &str)]) -> IgnoreRules {
		let mut rules = IgnoreRules::new();
		for (base, contents) in lines {
			rules.add_spec(base, contents).unwrap();
		}
		rules
	}

	#[test]
	fn simple_extension_pattern_matches_any_depth() {
		let rules = rules_from(&[(".", "*.log\n")]);
		assert!(rules.is_ignored("test.log", false));
		assert!(rules.is_ignored("foo/bar.log", false));
		assert!(!rules.is_ignored("test.txt", false));
	}

	#[test]
	fn dir_only_pattern_skips_file_candidates() {
		let rules = rules_from(&[(".", "build/\n")]);
		assert!(rules.is_ignored("build", true));
		assert!(!rules.is_ignored("build", false));
	}

	#[test]
	fn negation_is_last_match_wins() {
		let rules = rules_from(&[(".", "*.log\n!important.log\n")]);
		assert!(rules.is_ignored("debug.log", false));
		assert!(!rules.is_ignored("important.log", false));
	}

	#[test]
	fn deeper_dropboxignore_can_reinclude() {
		let mut rules = IgnoreRules::new();
		rules.add_spec(".", "*.log\n").unwrap();
		rules.add_spec("nested", "!keep.log\n").unwrap();
		assert!(rules.is_ignored("a.log", false));
		assert!(rules.is_ignored("nested/a.log", false));
		assert!(!rules.is_ignored("nested/keep.log", false));
	}

	#[test]
	fn anchored_pattern_matches_only_full_local_target() {
		let rules = rules_from(&[(".", "/only_root.txt\n")]);
		assert!(rules.is_ignored("only_root.txt", false));
		assert!(!rules.is_ignored("nested/only_root.txt", false));
	}

	#[test]
	fn slash_pattern_matches_trailing_suffix() {
		let rules = rules_from(&[(".", "docs/readme.md\n")]);
		assert!(rules.is_ignored("docs/readme.md", false));
		assert!(rules.is_ignored("a/docs/readme.md", false));
		assert!(!rules.is_ignored("docs/other.md", false));
	}
}
