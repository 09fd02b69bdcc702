//! Planner (C9): turns `(DiffRecord, action)` pairs into a deduplicated,
//! ordered list of primitive [`PlanOperation`] values.

use std::collections::{HashMap, HashSet};

use crate::deletion_intent::{DELETED_ON_LEFT, DELETED_ON_RIGHT};
use crate::types::{ContentState, DiffRecord, MetadataState, PlanAction, PlanOperation, PlanOperationKind};

/// Per-kind operation counts plus a total, as returned by
/// [`summarize_operations`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
	pub counts: HashMap<PlanOperationKind, usize>,
}

impl PlanSummary {
	pub fn total(&self) -> usize {
		self.counts.values().sum()
	}
}

fn emit_for_only_left(diff: &DiffRecord, action: PlanAction, out: &mut Vec<PlanOperation>) {
	use PlanOperationKind::*;
	let kind = match action {
		PlanAction::LeftWins => CopyRight,
		PlanAction::RightWins => DeleteLeft,
		PlanAction::Suggested => {
			if diff.metadata_source.as_deref() == Some(DELETED_ON_RIGHT) {
				DeleteLeft
			} else {
				CopyRight
			}
		}
		PlanAction::Ignore => return,
	};
	out.push(PlanOperation { kind, relpath: diff.relpath.clone() });
}

fn emit_for_only_right(diff: &DiffRecord, action: PlanAction, out: &mut Vec<PlanOperation>) {
	use PlanOperationKind::*;
	let kind = match action {
		PlanAction::RightWins => CopyLeft,
		PlanAction::LeftWins => DeleteRight,
		PlanAction::Suggested => {
			if diff.metadata_source.as_deref() == Some(DELETED_ON_LEFT) {
				DeleteRight
			} else {
				CopyLeft
			}
		}
		PlanAction::Ignore => return,
	};
	out.push(PlanOperation { kind, relpath: diff.relpath.clone() });
}

fn emit_for_content_conflict(diff: &DiffRecord, action: PlanAction, out: &mut Vec<PlanOperation>) {
	use PlanOperationKind::*;
	match action {
		PlanAction::LeftWins => {
			out.push(PlanOperation { kind: CopyRight, relpath: diff.relpath.clone() });
			if diff.metadata_state == MetadataState::Different {
				out.push(PlanOperation { kind: MetadataUpdateRight, relpath: diff.relpath.clone() });
			}
		}
		PlanAction::RightWins => {
			out.push(PlanOperation { kind: CopyLeft, relpath: diff.relpath.clone() });
			if diff.metadata_state == MetadataState::Different {
				out.push(PlanOperation { kind: MetadataUpdateLeft, relpath: diff.relpath.clone() });
			}
		}
		PlanAction::Suggested | PlanAction::Ignore => {}
	}
}

fn emit_for_metadata_only(diff: &DiffRecord, action: PlanAction, out: &mut Vec<PlanOperation>) {
	use PlanOperationKind::*;
	let kind = match action {
		PlanAction::LeftWins => MetadataUpdateRight,
		PlanAction::RightWins => MetadataUpdateLeft,
		PlanAction::Suggested => match diff.metadata_source.as_deref() {
			Some("left") => MetadataUpdateRight,
			Some("right") => MetadataUpdateLeft,
			_ => return,
		},
		PlanAction::Ignore => return,
	};
	out.push(PlanOperation { kind, relpath: diff.relpath.clone() });
}

/// Pure: `diffs` with their resolved per-path `action` (defaulting to
/// `Ignore` when no override is stored) become a deduplicated, ordered list
/// of operations, in first-generation order.
pub fn build_plan_operations(
	diffs: &[DiffRecord],
	action_overrides: &HashMap<String, PlanAction>,
) -> Vec<PlanOperation> {
	let mut ops = Vec::new();
	let mut seen: HashSet<(PlanOperationKind, String)> = HashSet::new();

	for diff in diffs {
		let action = action_overrides.get(&diff.relpath).copied().unwrap_or_default();
		if action == PlanAction::Ignore {
			continue;
		}

		let mut emitted = Vec::new();
		match diff.content_state {
			ContentState::OnlyLeft => emit_for_only_left(diff, action, &mut emitted),
			ContentState::OnlyRight => emit_for_only_right(diff, action, &mut emitted),
			ContentState::Different | ContentState::Unknown => emit_for_content_conflict(diff, action, &mut emitted),
			ContentState::Identical if diff.metadata_state == MetadataState::Different => {
				emit_for_metadata_only(diff, action, &mut emitted)
			}
			ContentState::Identical => {}
		}

		for op in emitted {
			let key = (op.kind, op.relpath.clone());
			if seen.insert(key) {
				ops.push(op);
			}
		}
	}

	ops
}

/// Per-kind counts and a total over a plan.
pub fn summarize_operations(ops: &[PlanOperation]) -> PlanSummary {
	let mut summary = PlanSummary::default();
	for op in ops {
		*summary.counts.entry(op.kind).or_insert(0) += 1;
	}
	summary
}
