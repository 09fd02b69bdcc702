//! Local scanner: a depth-first, non-symlink-following walk over a rooted
//! tree on this host.

use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScanError;
use crate::exclusion::{is_excluded_dir_name, is_excluded_file_name, IgnoreRules};
use crate::progress::ScanProgressThrottle;
use crate::scan::{FileMap, ProgressCallback, ScanProgress, ScanSummary};
use crate::symlink::symlink_target_compare_key;
use crate::text::normalize_bytes;
use crate::types::{FileRecord, NodeType};
use crate::validation::validate_path_safe;

/// Options shared by every scan, beyond root/subtree.
pub struct LocalScanOptions<'a> {
	pub subtree: Option<&'a str>,
	pub progress_interval: Duration,
	pub extra_excluded_dirs: &'a [String],
	pub extra_excluded_files: &'a [String],
}

impl Default for LocalScanOptions<'_> {
	fn default() -> Self {
		LocalScanOptions {
			subtree: None,
			progress_interval: Duration::from_millis(200),
			extra_excluded_dirs: &[],
			extra_excluded_files: &[],
		}
	}
}

fn join_relpath(parent: &str, name: &str) -> String {
	if parent.is_empty() {
		name.to_string()
	} else {
		format!("{}/{}", parent, name)
	}
}

fn node_mode(raw: u32) -> u32 {
	raw & 0o7777
}

fn node_mtime_ns(meta: &std::fs::Metadata) -> i128 {
	meta.mtime() as i128 * 1_000_000_000 + meta.mtime_nsec() as i128
}

/// Walks `root` (optionally restricted to `subtree`), returning every
/// surviving entry's [`FileRecord`] plus summary counters. Directory
/// symlinks are recorded once as `Symlink` and never recursed into, since
/// they are classified via `lstat`.
pub fn scan_local(
	root: &Path,
	options: &LocalScanOptions,
	on_progress: Option<&ProgressCallback>,
) -> Result<(FileMap, ScanSummary), ScanError> {
	if !root.is_dir() {
		return Err(ScanError::MissingRoot { path: root.to_string_lossy().into_owned() });
	}

	let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
	let mut ignore_rules = IgnoreRules::new();
	ignore_rules.load_if_exists(root, ".").map_err(|e| ScanError::Protocol { message: e.to_string() })?;

	let start_relpath = options.subtree.map(str::to_string).unwrap_or_default();
	if let Some(subtree) = options.subtree {
		let mut acc = String::new();
		for segment in subtree.split('/').filter(|s| !s.is_empty()) {
			if !acc.is_empty() {
				ignore_rules
					.load_if_exists(root, &acc)
					.map_err(|e| ScanError::Protocol { message: e.to_string() })?;
			}
			acc = join_relpath(&acc, segment);
		}
	}

	let start_dir = match options.subtree {
		Some(subtree) => root.join(subtree),
		None => root.to_path_buf(),
	};

	let mut map = FileMap::new();
	let mut dirs_scanned = 0u64;
	let mut files_seen = 0u64;
	let mut errors = Vec::new();
	let throttle = ScanProgressThrottle::new(options.progress_interval);
	let mut loaded_dirs: std::collections::HashSet<String> = std::collections::HashSet::new();
	loaded_dirs.insert(".".to_string());
	if !start_relpath.is_empty() {
		loaded_dirs.insert(start_relpath.clone());
	}

	let mut stack = vec![(start_dir, start_relpath)];
	while let Some((dir_path, dir_relpath)) = stack.pop() {
		if loaded_dirs.insert(dir_relpath.clone()) {
			if let Err(e) = ignore_rules.load_if_exists(root, if dir_relpath.is_empty() { "." } else { &dir_relpath }) {
				errors.push(format!("{}: {}", dir_relpath, e));
			}
		}
		dirs_scanned += 1;

		let entries = match std::fs::read_dir(&dir_path) {
			Ok(entries) => entries,
			Err(e) => {
				errors.push(format!("{}: {}", dir_path.display(), e));
				continue;
			}
		};

		for entry in entries {
			let entry = match entry {
				Ok(entry) => entry,
				Err(e) => {
					errors.push(format!("{}: {}", dir_path.display(), e));
					continue;
				}
			};

			let name = normalize_bytes(entry.file_name().as_bytes());
			let child_relpath = join_relpath(&dir_relpath, &name);

			if let Err(e) = validate_path_safe(Path::new(&child_relpath)) {
				errors.push(format!("{}: {}", child_relpath, e));
				continue;
			}

			let metadata = match std::fs::symlink_metadata(entry.path()) {
				Ok(metadata) => metadata,
				Err(e) => {
					errors.push(format!("{}: {}", child_relpath, e));
					continue;
				}
			};
			let file_type = metadata.file_type();

			if file_type.is_symlink() {
				if is_excluded_file_name(&name) || options.extra_excluded_files.iter().any(|n| n == &name) {
					continue;
				}
				if ignore_rules.is_ignored(&child_relpath, false) {
					continue;
				}
				let target = match std::fs::read_link(entry.path()) {
					Ok(target) => normalize_bytes(target.as_os_str().as_bytes()),
					Err(e) => {
						errors.push(format!("{}: {}", child_relpath, e));
						continue;
					}
				};
				let link_target_key = symlink_target_compare_key(&child_relpath, &target, root, &home);
				files_seen += 1;
				map.insert(
					child_relpath.clone(),
					FileRecord {
						relpath: child_relpath.clone(),
						node_type: NodeType::Symlink,
						size: target.len() as u64,
						mtime_ns: node_mtime_ns(&metadata),
						mode: node_mode(metadata.mode()),
						link_target: Some(target),
						link_target_key: Some(link_target_key),
						owner: None,
						group: None,
					},
				);
				maybe_emit(on_progress, &throttle, &child_relpath, dirs_scanned, files_seen);
				continue;
			}

			if file_type.is_dir() {
				if is_excluded_dir_name(&name) || options.extra_excluded_dirs.iter().any(|n| n == &name) {
					continue;
				}
				if ignore_rules.is_ignored(&child_relpath, true) {
					continue;
				}
				stack.push((entry.path(), child_relpath));
				continue;
			}

			if is_excluded_file_name(&name) || options.extra_excluded_files.iter().any(|n| n == &name) {
				continue;
			}
			if ignore_rules.is_ignored(&child_relpath, false) {
				continue;
			}
			files_seen += 1;
			map.insert(
				child_relpath.clone(),
				FileRecord {
					relpath: child_relpath.clone(),
					node_type: NodeType::File,
					size: metadata.len(),
					mtime_ns: node_mtime_ns(&metadata),
					mode: node_mode(metadata.mode()),
					link_target: None,
					link_target_key: None,
					owner: None,
					group: None,
				},
			);
			maybe_emit(on_progress, &throttle, &child_relpath, dirs_scanned, files_seen);
		}
	}

	Ok((map, ScanSummary { dirs_scanned, files_seen, errors }))
}

fn maybe_emit(
	on_progress: Option<&ProgressCallback>,
	throttle: &ScanProgressThrottle,
	relpath: &str,
	dirs_scanned: u64,
	files_seen: u64,
) {
	if let Some(cb) = on_progress {
		if throttle.should_emit() {
			cb(ScanProgress { current_relpath: relpath.to_string(), dirs_scanned, files_seen });
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::os::unix::fs::symlink;

	fn options() -> LocalScanOptions<'static> {
		LocalScanOptions::default()
	}

	#[test]
	fn scans_nested_files_and_records_relpaths() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("sub")).unwrap();
		std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
		std::fs::write(dir.path().join("sub/b.txt"), "there").unwrap();

		let (map, summary) = scan_local(dir.path(), &options(), None).unwrap();
		assert_eq!(map.len(), 2);
		assert!(map.contains_key("a.txt"));
		assert!(map.contains_key("sub/b.txt"));
		assert_eq!(summary.files_seen, 2);
	}

	#[test]
	fn hard_coded_excludes_are_pruned() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("node_modules")).unwrap();
		std::fs::write(dir.path().join("node_modules/pkg.json"), "{}").unwrap();
		std::fs::write(dir.path().join(".DS_Store"), "").unwrap();
		std::fs::write(dir.path().join("keep.txt"), "x").unwrap();

		let (map, _) = scan_local(dir.path(), &options(), None).unwrap();
		assert_eq!(map.len(), 1);
		assert!(map.contains_key("keep.txt"));
	}

	#[test]
	fn dropboxignore_prunes_matching_files() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(".dropboxignore"), "*.log\n").unwrap();
		std::fs::write(dir.path().join("debug.log"), "x").unwrap();
		std::fs::write(dir.path().join("keep.txt"), "x").unwrap();

		let (map, _) = scan_local(dir.path(), &options(), None).unwrap();
		assert!(map.contains_key(".dropboxignore"));
		assert!(map.contains_key("keep.txt"));
		assert!(!map.contains_key("debug.log"));
	}

	#[test]
	fn directory_symlink_is_recorded_but_not_recursed() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("real")).unwrap();
		std::fs::write(dir.path().join("real/inner.txt"), "x").unwrap();
		symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

		let (map, _) = scan_local(dir.path(), &options(), None).unwrap();
		assert_eq!(map.get("link").unwrap().node_type, NodeType::Symlink);
		assert!(!map.contains_key("link/inner.txt"));
		assert!(map.contains_key("real/inner.txt"));
	}

	#[test]
	fn join_relpath_never_produces_a_dotted_segment_from_real_entries() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
		let (map, summary) = scan_local(dir.path(), &options(), None).unwrap();
		assert!(map.keys().all(|k| validate_path_safe(Path::new(k)).is_ok()));
		assert!(summary.errors.is_empty());
	}

	#[test]
	fn missing_root_is_a_fatal_error() {
		let err = scan_local(Path::new("/nonexistent/definitely"), &options(), None).unwrap_err();
		assert!(matches!(err, ScanError::MissingRoot { .. }));
	}
}
