//! Comparator (C5): joins two scan results by relpath into a sorted list of
//! [`DiffRecord`] entries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{ContentState, DiffRecord, FileRecord, MetadataState, NodeType};

/// Default tolerance for mtime divergence before content state falls back to
/// `Unknown` (same size, mtime differs).
pub const DEFAULT_MTIME_TOLERANCE_NS: i128 = 2_000_000_000;

fn format_mode(mode: u32) -> String {
	format!("0{:o}", mode)
}

fn format_mtime_ns(ns: i128) -> String {
	let secs = ns.div_euclid(1_000_000_000);
	let nanos = ns.rem_euclid(1_000_000_000);
	let datetime = chrono_like_utc(secs);
	format!("{} UTC (+{}ns)", datetime, nanos)
}

/// Minimal civil-calendar rendering so the detail string is human-legible
/// without pulling in a datetime crate for one formatting helper.
fn chrono_like_utc(secs: i128) -> String {
	let days = secs.div_euclid(86_400);
	let day_secs = secs.rem_euclid(86_400);
	let (h, m, s) = (day_secs / 3600, (day_secs % 3600) / 60, day_secs % 60);

	// Civil-from-days algorithm (Howard Hinnant), proleptic Gregorian.
	let z = days + 719_468;
	let era: i64 = (if z >= 0 { z } else { z - 146_096 } / 146_097) as i64;
	let doe = (z - era as i128 * 146_097) as i64;
	let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
	let y = yoe + era * 400;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let d = doy - (153 * mp + 2) / 5 + 1;
	let m_num = if mp < 10 { mp + 3 } else { mp - 9 };
	let y = if m_num <= 2 { y + 1 } else { y };

	format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}.000000", y, m_num, d, h, m, s)
}

fn same_metadata(
	left_mode: u32,
	left_mtime_ns: i128,
	right_mode: u32,
	right_mtime_ns: i128,
	tolerance_ns: i128,
) -> (Vec<String>, Vec<String>) {
	let mut diff = Vec::new();
	let mut details = Vec::new();

	if left_mode != right_mode {
		diff.push("mode".to_string());
		details.push(format!("mode: left={} right={}", format_mode(left_mode), format_mode(right_mode)));
	}
	if (left_mtime_ns - right_mtime_ns).abs() > tolerance_ns {
		diff.push("mtime".to_string());
		details.push(format!(
			"mtime: left={} right={}",
			format_mtime_ns(left_mtime_ns),
			format_mtime_ns(right_mtime_ns)
		));
	}

	(diff, details)
}

fn preferred_metadata_source(
	diff: &[String],
	left_mode: u32,
	right_mode: u32,
	left_mtime_ns: i128,
	right_mtime_ns: i128,
) -> Option<String> {
	if diff.iter().any(|d| d == "mode") {
		return Some(if left_mode < right_mode { "left" } else { "right" }.to_string());
	}
	if diff.iter().any(|d| d == "mtime") {
		return Some(if left_mtime_ns < right_mtime_ns { "left" } else { "right" }.to_string());
	}
	None
}

fn metadata_state_for(diff: &[String]) -> MetadataState {
	if diff.is_empty() {
		MetadataState::Identical
	} else {
		MetadataState::Different
	}
}

/// Join `left` and `right` by relpath, producing a `relpath`-sorted list of
/// diffs.
pub fn compare_records(
	left: &std::collections::HashMap<String, FileRecord>,
	right: &std::collections::HashMap<String, FileRecord>,
	mtime_tolerance_ns: i128,
) -> Vec<DiffRecord> {
	let mut relpaths: BTreeSet<&str> = BTreeSet::new();
	relpaths.extend(left.keys().map(String::as_str));
	relpaths.extend(right.keys().map(String::as_str));

	let mut out = Vec::with_capacity(relpaths.len());

	for relpath in relpaths {
		let l = left.get(relpath);
		let r = right.get(relpath);

		let diff = match (l, r) {
			(Some(l), None) => DiffRecord {
				relpath: relpath.to_string(),
				content_state: ContentState::OnlyLeft,
				metadata_state: MetadataState::NotApplicable,
				metadata_diff: vec![],
				metadata_details: vec![],
				metadata_source: None,
				left_size: Some(l.size),
				right_size: None,
			},
			(None, Some(r)) => DiffRecord {
				relpath: relpath.to_string(),
				content_state: ContentState::OnlyRight,
				metadata_state: MetadataState::NotApplicable,
				metadata_diff: vec![],
				metadata_details: vec![],
				metadata_source: None,
				left_size: None,
				right_size: Some(r.size),
			},
			(Some(l), Some(r)) if l.node_type != r.node_type => DiffRecord {
				relpath: relpath.to_string(),
				content_state: ContentState::Different,
				metadata_state: MetadataState::Different,
				metadata_diff: vec!["type".to_string()],
				metadata_details: vec![format!("type: left={:?} right={:?}", l.node_type, r.node_type)],
				metadata_source: None,
				left_size: Some(l.size),
				right_size: Some(r.size),
			},
			(Some(l), Some(r)) if l.node_type == NodeType::Symlink => {
				let l_key = l.link_target_key.as_deref().or(l.link_target.as_deref()).unwrap_or("");
				let r_key = r.link_target_key.as_deref().or(r.link_target.as_deref()).unwrap_or("");
				let content_state = if l_key == r_key { ContentState::Identical } else { ContentState::Different };
				DiffRecord {
					relpath: relpath.to_string(),
					content_state,
					metadata_state: MetadataState::NotApplicable,
					metadata_diff: vec![],
					metadata_details: vec![],
					metadata_source: None,
					left_size: Some(l.size),
					right_size: Some(r.size),
				}
			}
			(Some(l), Some(r)) if l.node_type == NodeType::Directory => {
				let (diff, details) = same_metadata(l.mode, l.mtime_ns, r.mode, r.mtime_ns, mtime_tolerance_ns);
				let metadata_source = preferred_metadata_source(&diff, l.mode, r.mode, l.mtime_ns, r.mtime_ns);
				DiffRecord {
					relpath: relpath.to_string(),
					content_state: ContentState::Identical,
					metadata_state: metadata_state_for(&diff),
					metadata_diff: diff,
					metadata_details: details,
					metadata_source,
					left_size: Some(l.size),
					right_size: Some(r.size),
				}
			}
			(Some(l), Some(r)) => {
				// Both regular files.
				let same_content = l.size == r.size && (l.mtime_ns - r.mtime_ns).abs() <= mtime_tolerance_ns;
				let content_state = if same_content {
					ContentState::Identical
				} else if l.size == r.size {
					ContentState::Unknown
				} else {
					ContentState::Different
				};
				let (diff, details) = same_metadata(l.mode, l.mtime_ns, r.mode, r.mtime_ns, mtime_tolerance_ns);
				let metadata_source = preferred_metadata_source(&diff, l.mode, r.mode, l.mtime_ns, r.mtime_ns);
				DiffRecord {
					relpath: relpath.to_string(),
					content_state,
					metadata_state: metadata_state_for(&diff),
					metadata_diff: diff,
					metadata_details: details,
					metadata_source,
					left_size: Some(l.size),
					right_size: Some(r.size),
				}
			}
			(None, None) => unreachable!("relpath drawn from the union of both maps"),
		};

		out.push(diff);
	}

	out
}

/// Per-state path counts for one comparison, ported from `state_db.py`'s
/// `ScanStateSummary` counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounters {
	pub only_left: u64,
	pub only_right: u64,
	pub different_content: u64,
	pub uncertain: u64,
	pub metadata_only: u64,
	pub compared_paths: u64,
}

/// Tallies `diffs` into [`DiffCounters`]. `metadata_only` counts paths whose
/// content is identical but whose metadata differs; paths with no divergence
/// at all count only toward `compared_paths`.
pub fn summarize_diffs(diffs: &[DiffRecord]) -> DiffCounters {
	let mut counters = DiffCounters { compared_paths: diffs.len() as u64, ..Default::default() };
	for diff in diffs {
		match diff.content_state {
			ContentState::OnlyLeft => counters.only_left += 1,
			ContentState::OnlyRight => counters.only_right += 1,
			ContentState::Different => counters.different_content += 1,
			ContentState::Unknown => counters.uncertain += 1,
			ContentState::Identical => {
				if diff.metadata_state == MetadataState::Different {
					counters.metadata_only += 1;
				}
			}
		}
	}
	counters
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn file(relpath: &str, size: u64, mtime_ns: i128, mode: u32) -> (String, FileRecord) {
		(
			relpath.to_string(),
			FileRecord {
				relpath: relpath.to_string(),
				node_type: NodeType::File,
				size,
				mtime_ns,
				mode,
				link_target: None,
				link_target_key: None,
				owner: None,
				group: None,
			},
		)
	}

	#[test]
	fn one_sided_files_produce_only_left_and_only_right() {
		let left: HashMap<_, _> = vec![file("a.txt", 123, 1_000, 0o644)].into_iter().collect();
		let right: HashMap<_, _> = vec![file("b.txt", 234, 1_000, 0o644)].into_iter().collect();

		let diffs = compare_records(&left, &right, DEFAULT_MTIME_TOLERANCE_NS);
		assert_eq!(diffs.len(), 2);
		assert_eq!(diffs[0].relpath, "a.txt");
		assert_eq!(diffs[0].content_state, ContentState::OnlyLeft);
		assert_eq!(diffs[1].relpath, "b.txt");
		assert_eq!(diffs[1].content_state, ContentState::OnlyRight);
	}

	#[test]
	fn metadata_only_mode_drift_suggests_stricter_side() {
		let left: HashMap<_, _> = vec![file("x.txt", 100, 1_000, 0o777)].into_iter().collect();
		let right: HashMap<_, _> = vec![file("x.txt", 100, 1_000, 0o600)].into_iter().collect();

		let diffs = compare_records(&left, &right, DEFAULT_MTIME_TOLERANCE_NS);
		assert_eq!(diffs[0].content_state, ContentState::Identical);
		assert_eq!(diffs[0].metadata_state, MetadataState::Different);
		assert_eq!(diffs[0].metadata_source.as_deref(), Some("right"));
	}

	#[test]
	fn differing_size_same_mtime_is_content_conflict() {
		let left: HashMap<_, _> = vec![file("x.txt", 100, 1_000, 0o644)].into_iter().collect();
		let right: HashMap<_, _> = vec![file("x.txt", 101, 1_000, 0o644)].into_iter().collect();

		let diffs = compare_records(&left, &right, DEFAULT_MTIME_TOLERANCE_NS);
		assert_eq!(diffs[0].content_state, ContentState::Different);
		assert_eq!(diffs[0].metadata_state, MetadataState::Identical);
	}

	#[test]
	fn same_size_diverged_mtime_beyond_tolerance_is_unknown() {
		let left: HashMap<_, _> = vec![file("x.txt", 100, 0, 0o644)].into_iter().collect();
		let right: HashMap<_, _> = vec![file("x.txt", 100, 10_000_000_000, 0o644)].into_iter().collect();

		let diffs = compare_records(&left, &right, DEFAULT_MTIME_TOLERANCE_NS);
		assert_eq!(diffs[0].content_state, ContentState::Unknown);
	}

	#[test]
	fn output_is_sorted_by_relpath() {
		let left: HashMap<_, _> =
			vec![file("z.txt", 1, 0, 0o644), file("a.txt", 1, 0, 0o644)].into_iter().collect();
		let right: HashMap<_, _> = HashMap::new();

		let diffs = compare_records(&left, &right, DEFAULT_MTIME_TOLERANCE_NS);
		let relpaths: Vec<_> = diffs.iter().map(|d| d.relpath.as_str()).collect();
		assert_eq!(relpaths, vec!["a.txt", "z.txt"]);
	}

	#[test]
	fn summarize_diffs_tallies_each_state_once() {
		let left: HashMap<_, _> = vec![
			file("only_left.txt", 1, 0, 0o644),
			file("same.txt", 1, 0, 0o644),
			file("meta_drift.txt", 1, 0, 0o777),
			file("content_drift.txt", 1, 0, 0o644),
			file("maybe.txt", 1, 0, 0o644),
		]
		.into_iter()
		.collect();
		let right: HashMap<_, _> = vec![
			file("only_right.txt", 1, 0, 0o644),
			file("same.txt", 1, 0, 0o644),
			file("meta_drift.txt", 1, 0, 0o600),
			file("content_drift.txt", 2, 0, 0o644),
			file("maybe.txt", 1, 10_000_000_000, 0o644),
		]
		.into_iter()
		.collect();

		let diffs = compare_records(&left, &right, DEFAULT_MTIME_TOLERANCE_NS);
		let counters = summarize_diffs(&diffs);

		assert_eq!(counters.only_left, 1);
		assert_eq!(counters.only_right, 1);
		assert_eq!(counters.different_content, 1);
		assert_eq!(counters.uncertain, 1);
		assert_eq!(counters.metadata_only, 1);
		assert_eq!(counters.compared_paths, diffs.len() as u64);
	}

	#[test]
	fn symlinks_ignore_metadata_and_compare_via_target_key() {
		let mut left = HashMap::new();
		left.insert(
			"link".to_string(),
			FileRecord {
				relpath: "link".to_string(),
				node_type: NodeType::Symlink,
				size: 5,
				mtime_ns: 0,
				mode: 0o777,
				link_target: Some("x".to_string()),
				link_target_key: Some("inroot:x".to_string()),
				owner: None,
				group: None,
			},
		);
		let mut right = left.clone();
		right.get_mut("link").unwrap().mode = 0o644;

		let diffs = compare_records(&left, &right, DEFAULT_MTIME_TOLERANCE_NS);
		assert_eq!(diffs[0].content_state, ContentState::Identical);
		assert_eq!(diffs[0].metadata_state, MetadataState::NotApplicable);
	}
}
