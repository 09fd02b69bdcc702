//! Apply engine (C10): executes a `[PlanOperation]` list against two side
//! runtimes, tolerating per-operation failure and reporting throttled
//! progress.

pub mod side;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::progress::ApplyProgressThrottle;
use crate::symlink::map_symlink_target_for_destination;
use crate::types::{PlanOperation, PlanOperationKind};

pub use side::{LocalSide, NodeStat, RemoteSide, Side};

/// Tunables the caller supplies, distinct from scan-time [`crate::config::Config`]
/// fields only in which ones this loop actually reads.
pub struct ApplySettings {
	pub ssh_compression: bool,
	pub sftp_put_confirm: bool,
	pub progress_emit_every_ops: u64,
	pub progress_emit_every_ms: u64,
}

impl Default for ApplySettings {
	fn default() -> Self {
		ApplySettings {
			ssh_compression: false,
			sftp_put_confirm: true,
			progress_emit_every_ops: 1,
			progress_emit_every_ms: 100,
		}
	}
}

/// Outcome of one apply invocation.
#[derive(Debug, Default)]
pub struct ExecuteResult {
	pub completed_paths: HashSet<String>,
	pub errors: Vec<String>,
	pub succeeded_operations: usize,
	pub total_operations: usize,
	pub succeeded_operation_keys: HashSet<(PlanOperationKind, String)>,
	pub operation_counts: HashMap<PlanOperationKind, usize>,
	pub operation_seconds: HashMap<PlanOperationKind, f64>,
}

/// Progress callback: `(done, total, operation, ok, error)`.
pub type ProgressCallback<'a> = dyn Fn(usize, usize, &PlanOperation, bool, Option<&str>) + Send + Sync + 'a;

/// Copies `relpath` from `src` to `dst`, special-casing symlinks: the
/// destination is re-created pointing at the mapped target rather than
/// having its bytes copied. When `confirm_put` is set, a regular-file write
/// is followed by a read-back to confirm the destination actually holds
/// what was sent, mirroring an SFTP client's put-confirm flag.
async fn copy_between(
	src: &dyn Side,
	dst: &dyn Side,
	relpath: &str,
	confirm_put: bool,
) -> Result<(), crate::error::ApplyOpError> {
	dst.ensure_parent(relpath).await?;

	let stat = src.lstat(relpath).await?;
	let Some(stat) = stat else {
		return Err(crate::error::ApplyOpError {
			kind: "copy",
			relpath: relpath.to_string(),
			message: "source missing".to_string(),
		});
	};

	if stat.node_type == crate::types::NodeType::Symlink {
		let target = src.readlink(relpath).await?;
		let mapped = map_symlink_target_for_destination(
			relpath,
			&target,
			src.root(),
			src.home(),
			dst.root(),
			dst.home(),
		);
		dst.write_symlink(relpath, &mapped).await?;
		return Ok(());
	}

	let bytes = src.read_file(relpath).await?;
	dst.write_file(relpath, &bytes).await?;
	if confirm_put {
		let written = dst.read_file(relpath).await?;
		if written != bytes {
			return Err(crate::error::ApplyOpError {
				kind: "copy",
				relpath: relpath.to_string(),
				message: format!(
					"put confirmation failed: wrote {} bytes, read back {}",
					bytes.len(),
					written.len()
				),
			});
		}
	}
	dst.chmod(relpath, stat.mode).await?;
	dst.set_mtime(relpath, stat.mtime_ns).await?;
	Ok(())
}

/// Applies a metadata update to `target`, using `forced` as the
/// `(mode, mtime_ns)` pair when the caller has already resolved a
/// cross-side tie-break, falling back to a live read of `source` otherwise.
async fn apply_metadata_update(
	target: &dyn Side,
	source: &dyn Side,
	relpath: &str,
	forced: Option<(u32, i128)>,
) -> Result<(), crate::error::ApplyOpError> {
	let target_stat = target.lstat(relpath).await?;
	if matches!(target_stat, Some(ref s) if s.node_type == crate::types::NodeType::Symlink) {
		return Ok(());
	}

	let (mode, mtime_ns) = match forced {
		Some(values) => values,
		None => {
			let source_stat = source.lstat(relpath).await?;
			let Some(source_stat) = source_stat else {
				return Err(crate::error::ApplyOpError {
					kind: "metadata_update",
					relpath: relpath.to_string(),
					message: "source missing".to_string(),
				});
			};
			if source_stat.node_type == crate::types::NodeType::Symlink {
				return Ok(());
			}
			(source_stat.mode, source_stat.mtime_ns)
		}
	};
	target.chmod(relpath, mode).await?;
	target.set_mtime(relpath, mtime_ns).await?;
	Ok(())
}

/// Executes `operations` against `left`/`right` in the exact order supplied.
pub async fn execute_plan(
	left: &dyn Side,
	right: &dyn Side,
	operations: &[PlanOperation],
	settings: &ApplySettings,
	on_progress: Option<&ProgressCallback<'_>>,
) -> ExecuteResult {
	let total = operations.len();
	let throttle = ApplyProgressThrottle::new(settings.progress_emit_every_ops, settings.progress_emit_every_ms);

	// Compression is a session-level setting, fixed when a remote side's
	// transport was established; by the time operations run it's too late to
	// change, so the most this loop can do is flag a side that was built
	// with a different compression setting than the caller now asks for.
	for side in [left, right] {
		if side.uses_compression() != settings.ssh_compression {
			tracing::warn!(
				requested = settings.ssh_compression,
				actual = side.uses_compression(),
				"apply side's SSH compression does not match ApplySettings::ssh_compression"
			);
		}
	}

	let mut result = ExecuteResult { total_operations: total, ..Default::default() };
	let mut attempted_per_relpath: HashMap<String, usize> = HashMap::new();
	let mut succeeded_per_relpath: HashMap<String, usize> = HashMap::new();

	// Metadata-update pairs queued for the same relpath use the stricter of
	// the two values. Both sides' pre-operation stats are read once, before
	// any operation runs, so the tie-break is independent of operation order
	// even when one side's update executes before the other's.
	let both_queued: HashSet<String> = {
		let mut left_set = HashSet::new();
		let mut right_set = HashSet::new();
		for op in operations {
			match op.kind {
				PlanOperationKind::MetadataUpdateLeft => {
					left_set.insert(op.relpath.clone());
				}
				PlanOperationKind::MetadataUpdateRight => {
					right_set.insert(op.relpath.clone());
				}
				_ => {}
			}
		}
		left_set.intersection(&right_set).cloned().collect()
	};
	let mut resolved_both: HashMap<String, (u32, i128)> = HashMap::new();
	for relpath in &both_queued {
		let left_stat = left.lstat(relpath).await.ok().flatten();
		let right_stat = right.lstat(relpath).await.ok().flatten();
		if let (Some(l), Some(r)) = (left_stat, right_stat) {
			if l.node_type != crate::types::NodeType::Symlink && r.node_type != crate::types::NodeType::Symlink {
				resolved_both.insert(relpath.clone(), (l.mode.min(r.mode), l.mtime_ns.min(r.mtime_ns)));
			}
		}
	}

	for (done, op) in operations.iter().enumerate() {
		*attempted_per_relpath.entry(op.relpath.clone()).or_insert(0) += 1;
		let started = Instant::now();

		let outcome: Result<(), crate::error::ApplyOpError> = match op.kind {
			PlanOperationKind::CopyRight => {
				copy_between(left, right, &op.relpath, settings.sftp_put_confirm).await
			}
			PlanOperationKind::CopyLeft => {
				copy_between(right, left, &op.relpath, settings.sftp_put_confirm).await
			}
			PlanOperationKind::DeleteLeft => left.remove(&op.relpath).await,
			PlanOperationKind::DeleteRight => right.remove(&op.relpath).await,
			PlanOperationKind::MetadataUpdateRight => {
				apply_metadata_update(right, left, &op.relpath, resolved_both.get(&op.relpath).copied()).await
			}
			PlanOperationKind::MetadataUpdateLeft => {
				apply_metadata_update(left, right, &op.relpath, resolved_both.get(&op.relpath).copied()).await
			}
		};

		let elapsed = started.elapsed().as_secs_f64();
		*result.operation_counts.entry(op.kind).or_insert(0) += 1;
		*result.operation_seconds.entry(op.kind).or_insert(0.0) += elapsed;

		let ok = outcome.is_ok();
		if ok {
			result.succeeded_operations += 1;
			result.succeeded_operation_keys.insert((op.kind, op.relpath.clone()));
			*succeeded_per_relpath.entry(op.relpath.clone()).or_insert(0) += 1;
		} else if let Err(e) = &outcome {
			result.errors.push(e.to_string());
		}

		if let Some(cb) = on_progress {
			let err_text = outcome.as_ref().err().map(|e| e.to_string());
			if throttle.should_emit(done as u64 + 1, total as u64, ok) {
				cb(done + 1, total, op, ok, err_text.as_deref());
			}
		}
	}

	for (relpath, attempted) in &attempted_per_relpath {
		if succeeded_per_relpath.get(relpath).copied().unwrap_or(0) == *attempted {
			result.completed_paths.insert(relpath.clone());
		}
	}

	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{NodeType, PlanOperation, PlanOperationKind::*};
	use std::path::PathBuf;
	use std::sync::{Arc, Mutex};

	fn sides() -> (LocalSide, LocalSide, tempfile::TempDir, tempfile::TempDir) {
		let left_dir = tempfile::tempdir().unwrap();
		let right_dir = tempfile::tempdir().unwrap();
		let home = PathBuf::from("/nonexistent-home");
		(
			LocalSide::new(left_dir.path().to_path_buf(), home.clone()),
			LocalSide::new(right_dir.path().to_path_buf(), home),
			left_dir,
			right_dir,
		)
	}

	#[tokio::test]
	async fn copy_right_propagates_bytes_mode_and_mtime() {
		let (left, right, left_dir, _right_dir) = sides();
		std::fs::write(left_dir.path().join("a.txt"), b"hello").unwrap();

		let ops = vec![PlanOperation { kind: CopyRight, relpath: "a.txt".into() }];
		let result = execute_plan(&left, &right, &ops, &ApplySettings::default(), None).await;

		assert_eq!(result.succeeded_operations, 1);
		assert!(result.completed_paths.contains("a.txt"));
		assert_eq!(right.read_file("a.txt").await.unwrap(), b"hello");
	}

	#[tokio::test]
	async fn copy_left_recreates_symlink_with_mapped_target() {
		let (left, right, left_dir, _right_dir) = sides();
		std::fs::write(left_dir.path().join("target.txt"), b"x").unwrap();
		std::os::unix::fs::symlink("target.txt", left_dir.path().join("link")).unwrap();

		let ops = vec![
			PlanOperation { kind: CopyRight, relpath: "target.txt".into() },
			PlanOperation { kind: CopyRight, relpath: "link".into() },
		];
		let result = execute_plan(&left, &right, &ops, &ApplySettings::default(), None).await;
		assert_eq!(result.succeeded_operations, 2);

		let stat = right.lstat("link").await.unwrap().unwrap();
		assert_eq!(stat.node_type, NodeType::Symlink);
		assert_eq!(right.readlink("link").await.unwrap(), "target.txt");
	}

	#[tokio::test]
	async fn delete_left_is_tolerant_of_missing_file() {
		let (left, right, _l, _r) = sides();
		let ops = vec![PlanOperation { kind: DeleteLeft, relpath: "gone.txt".into() }];
		let result = execute_plan(&left, &right, &ops, &ApplySettings::default(), None).await;
		assert_eq!(result.succeeded_operations, 1);
	}

	#[tokio::test]
	async fn failed_operation_is_recorded_and_excludes_path_from_completed() {
		let (left, right, _l, _r) = sides();
		// No source file exists, so the copy fails.
		let ops = vec![PlanOperation { kind: CopyRight, relpath: "missing.txt".into() }];
		let result = execute_plan(&left, &right, &ops, &ApplySettings::default(), None).await;
		assert_eq!(result.succeeded_operations, 0);
		assert_eq!(result.errors.len(), 1);
		assert!(result.errors[0].starts_with("copy missing.txt:"));
		assert!(!result.completed_paths.contains("missing.txt"));
	}

	#[tokio::test]
	async fn metadata_update_is_noop_for_symlinks() {
		let (left, right, left_dir, right_dir) = sides();
		std::os::unix::fs::symlink("x", left_dir.path().join("link")).unwrap();
		std::os::unix::fs::symlink("x", right_dir.path().join("link")).unwrap();

		let ops = vec![PlanOperation { kind: MetadataUpdateRight, relpath: "link".into() }];
		let result = execute_plan(&left, &right, &ops, &ApplySettings::default(), None).await;
		assert_eq!(result.succeeded_operations, 1);
	}

	/// Delegates everything to an inner `LocalSide` except `write_file`,
	/// which truncates the payload — stands in for a destination transport
	/// that silently drops bytes in flight.
	struct TruncatingSide(LocalSide);

	#[async_trait::async_trait]
	impl Side for TruncatingSide {
		fn root(&self) -> &std::path::Path {
			self.0.root()
		}
		fn home(&self) -> &std::path::Path {
			self.0.home()
		}
		async fn lstat(&self, relpath: &str) -> Result<Option<NodeStat>, crate::error::ApplyOpError> {
			self.0.lstat(relpath).await
		}
		async fn readlink(&self, relpath: &str) -> Result<String, crate::error::ApplyOpError> {
			self.0.readlink(relpath).await
		}
		async fn write_symlink(&self, relpath: &str, target: &str) -> Result<(), crate::error::ApplyOpError> {
			self.0.write_symlink(relpath, target).await
		}
		async fn remove(&self, relpath: &str) -> Result<(), crate::error::ApplyOpError> {
			self.0.remove(relpath).await
		}
		async fn read_file(&self, relpath: &str) -> Result<Vec<u8>, crate::error::ApplyOpError> {
			self.0.read_file(relpath).await
		}
		async fn write_file(&self, relpath: &str, data: &[u8]) -> Result<(), crate::error::ApplyOpError> {
			self.0.write_file(relpath, &data[..data.len().saturating_sub(1)]).await
		}
		async fn chmod(&self, relpath: &str, mode: u32) -> Result<(), crate::error::ApplyOpError> {
			self.0.chmod(relpath, mode).await
		}
		async fn set_mtime(&self, relpath: &str, mtime_ns: i128) -> Result<(), crate::error::ApplyOpError> {
			self.0.set_mtime(relpath, mtime_ns).await
		}
		async fn ensure_parent(&self, relpath: &str) -> Result<(), crate::error::ApplyOpError> {
			self.0.ensure_parent(relpath).await
		}
	}

	#[tokio::test]
	async fn put_confirm_catches_a_destination_that_drops_bytes() {
		let (left, right, left_dir, right_dir) = sides();
		std::fs::write(left_dir.path().join("a.txt"), b"hello").unwrap();
		let right = TruncatingSide(right);

		let settings = ApplySettings { sftp_put_confirm: true, ..ApplySettings::default() };
		let ops = vec![PlanOperation { kind: CopyRight, relpath: "a.txt".into() }];
		let result = execute_plan(&left, &right, &ops, &settings, None).await;

		assert_eq!(result.succeeded_operations, 0);
		assert!(result.errors[0].contains("put confirmation failed"));
		let _ = right_dir;
	}

	#[tokio::test]
	async fn metadata_tie_break_is_independent_of_operation_order() {
		let (left, right, left_dir, right_dir) = sides();
		std::fs::write(left_dir.path().join("a.txt"), b"hi").unwrap();
		std::fs::write(right_dir.path().join("a.txt"), b"hi").unwrap();
		left.chmod("a.txt", 0o777).await.unwrap();
		right.chmod("a.txt", 0o600).await.unwrap();

		// Right's update runs first, mutating right's metadata before left's
		// update executes; both should still resolve to the stricter mode.
		let ops = vec![
			PlanOperation { kind: MetadataUpdateRight, relpath: "a.txt".into() },
			PlanOperation { kind: MetadataUpdateLeft, relpath: "a.txt".into() },
		];
		let result = execute_plan(&left, &right, &ops, &ApplySettings::default(), None).await;
		assert_eq!(result.succeeded_operations, 2);

		let left_mode = left.lstat("a.txt").await.unwrap().unwrap().mode;
		let right_mode = right.lstat("a.txt").await.unwrap().unwrap().mode;
		assert_eq!(left_mode & 0o777, 0o600);
		assert_eq!(right_mode & 0o777, 0o600);
	}

	#[tokio::test]
	async fn progress_callback_is_invoked_on_completion() {
		let (left, right, left_dir, _r) = sides();
		std::fs::write(left_dir.path().join("a.txt"), b"hi").unwrap();
		let ops = vec![PlanOperation { kind: CopyRight, relpath: "a.txt".into() }];

		let calls = Arc::new(Mutex::new(Vec::new()));
		let calls2 = calls.clone();
		let cb = move |done: usize, total: usize, op: &PlanOperation, ok: bool, _err: Option<&str>| {
			calls2.lock().unwrap().push((done, total, op.relpath.clone(), ok));
		};
		execute_plan(&left, &right, &ops, &ApplySettings::default(), Some(&cb)).await;
		assert_eq!(calls.lock().unwrap().len(), 1);
		assert_eq!(calls.lock().unwrap()[0], (1, 1, "a.txt".to_string(), true));
	}
}
