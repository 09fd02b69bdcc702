//! Symlink-target mapper (C3): a comparison key two differently-phrased
//! links can share, and a destination-side target rewrite for copies.
//!
//! Both operations resolve targets lexically — joining path components and
//! collapsing `.`/`..` — without touching the filesystem or following
//! intermediate symlinks, since the target may not exist on this side at
//! all (that's the whole point of comparing it against the other side).

use std::path::{Path, PathBuf};

/// Lexically join `base` and `target`, collapsing `.`/`..` components
/// without consulting the filesystem.
fn lexical_join(base: &Path, target: &str) -> PathBuf {
	let target_path = Path::new(target);
	let joined = if target_path.is_absolute() { target_path.to_path_buf() } else { base.join(target_path) };
	lexical_normalize(&joined)
}

fn lexical_normalize(path: &Path) -> PathBuf {
	use std::path::Component;
	let mut out = Vec::new();
	for component in path.components() {
		match component {
			Component::ParentDir => {
				if matches!(out.last(), Some(Component::Normal(_))) {
					out.pop();
				} else {
					out.push(component);
				}
			}
			Component::CurDir => {}
			other => out.push(other),
		}
	}
	out.into_iter().collect()
}

fn relative_posix(path: &Path, base: &Path) -> Option<String> {
	let rel = path.strip_prefix(base).ok()?;
	let s = rel.to_string_lossy().replace('\\', "/");
	Some(if s.is_empty() { ".".to_string() } else { s })
}

struct Resolved {
	abs: PathBuf,
	was_absolute: bool,
}

fn resolve_target(relpath: &str, target: &str, root: &Path) -> Resolved {
	let target_path = Path::new(target);
	let was_absolute = target_path.is_absolute();
	let link_dir = Path::new(relpath).parent().unwrap_or_else(|| Path::new(""));
	let base = root.join(link_dir);
	let abs = lexical_join(&base, target);
	Resolved { abs, was_absolute }
}

/// Produce a canonical comparison key for a symlink's target so two sides
/// that phrase the same conceptual link differently (one absolute, one
/// relative) compare equal.
pub fn symlink_target_compare_key(relpath: &str, target: &str, root: &Path, home: &Path) -> String {
	let resolved = resolve_target(relpath, target, root);

	if let Some(rel) = relative_posix(&resolved.abs, root) {
		return format!("inroot:{}", rel);
	}

	if resolved.was_absolute {
		if let Some(rel) = relative_posix(&resolved.abs, home) {
			return format!("home:{}", rel);
		}
		return format!("abs:{}", resolved.abs.to_string_lossy());
	}

	format!("rel:{}", lexical_normalize(Path::new(target)).to_string_lossy())
}

/// Given a link at `source_relpath` inside `source_root` pointing at
/// `source_target`, produce the target string to write on the destination
/// side so the destination link points at the corresponding node inside
/// `destination_root`.
pub fn map_symlink_target_for_destination(
	source_relpath: &str,
	source_target: &str,
	source_root: &Path,
	source_home: &Path,
	destination_root: &Path,
	destination_home: &Path,
) -> String {
	let resolved = resolve_target(source_relpath, source_target, source_root);

	if let Some(rel_to_root) = relative_posix(&resolved.abs, source_root) {
		let dest_abs_target = if rel_to_root == "." { destination_root.to_path_buf() } else { destination_root.join(&rel_to_root) };
		let link_dir = Path::new(source_relpath).parent().unwrap_or_else(|| Path::new(""));
		let dest_link_dir = destination_root.join(link_dir);
		return relative_path_between(&dest_link_dir, &dest_abs_target);
	}

	if resolved.was_absolute {
		if let Some(rel_to_home) = relative_posix(&resolved.abs, source_home) {
			return destination_home.join(rel_to_home).to_string_lossy().into_owned();
		}
	}

	source_target.to_string()
}

/// POSIX-style relative path from `from` to `to`, both assumed lexically
/// normalized absolute-ish paths (no `..` resolution against the real
/// filesystem is needed since both sides come from the same root join).
fn relative_path_between(from: &Path, to: &Path) -> String {
	let from_comps: Vec<_> = from.components().collect();
	let to_comps: Vec<_> = to.components().collect();

	let common = from_comps.iter().zip(to_comps.iter()).take_while(|(a, b)| a == b).count();

	let mut parts: Vec<String> = Vec::new();
	for _ in common..from_comps.len() {
		parts.push("..".to_string());
	}
	for comp in &to_comps[common..] {
		parts.push(comp.as_os_str().to_string_lossy().into_owned());
	}

	if parts.is_empty() {
		".".to_string()
	} else {
		parts.join("/")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn absolute_inroot_target_gets_inroot_key() {
		let root = Path::new("/root/docs");
		let home = Path::new("/home/user");
		let key = symlink_target_compare_key("nested/link", "/root/docs/x.txt", root, home);
		assert_eq!(key, "inroot:x.txt");
	}

	#[test]
	fn relative_inroot_target_matches_same_key() {
		let root = Path::new("/root/docs");
		let home = Path::new("/home/user");
		let key = symlink_target_compare_key("nested/link", "../x.txt", root, home);
		assert_eq!(key, "inroot:x.txt");
	}

	#[test]
	fn absolute_home_target_gets_home_key() {
		let root = Path::new("/root/docs");
		let home = Path::new("/home/user");
		let key = symlink_target_compare_key("link", "/home/user/shared/file", root, home);
		assert_eq!(key, "home:shared/file");
	}

	#[test]
	fn absolute_outside_target_gets_abs_key() {
		let root = Path::new("/root/docs");
		let home = Path::new("/home/user");
		let key = symlink_target_compare_key("link", "/etc/hosts", root, home);
		assert_eq!(key, "abs:/etc/hosts");
	}

	#[test]
	fn relative_non_inroot_target_gets_rel_key() {
		let root = Path::new("/root/docs");
		let home = Path::new("/home/user");
		let key = symlink_target_compare_key("link", "../../outside/file", root, home);
		assert_eq!(key, "rel:../../outside/file");
	}

	#[test]
	fn inroot_target_is_rewritten_relative_for_destination() {
		let source_root = Path::new("/root/docs");
		let source_home = Path::new("/home/user");
		let dest_root = Path::new("/backup/docs");
		let dest_home = Path::new("/home/user2");

		let mapped = map_symlink_target_for_destination(
			"nested/link",
			"/root/docs/x.txt",
			source_root,
			source_home,
			dest_root,
			dest_home,
		);
		assert_eq!(mapped, "../x.txt");
	}

	#[test]
	fn abs_target_passes_through_unchanged() {
		let source_root = Path::new("/root/docs");
		let source_home = Path::new("/home/user");
		let dest_root = Path::new("/backup/docs");
		let dest_home = Path::new("/home/user2");

		let mapped = map_symlink_target_for_destination(
			"link",
			"/etc/hosts",
			source_root,
			source_home,
			dest_root,
			dest_home,
		);
		assert_eq!(mapped, "/etc/hosts");
	}
}
