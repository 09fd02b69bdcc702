//! Deletion-intent overlay (C6): turns "present on both sides last time,
//! only on one side now" into an explicit deletion hint the planner
//! consults under `Suggested`.

use std::collections::HashMap;

use crate::types::{ContentState, DiffRecord};

pub const DELETED_ON_LEFT: &str = "deleted_on_left";
pub const DELETED_ON_RIGHT: &str = "deleted_on_right";

fn was_present_on_both_sides(state: ContentState) -> bool {
	matches!(state, ContentState::Identical | ContentState::Different | ContentState::Unknown)
}

/// Annotate `diffs` in place with `metadata_source = "deleted_on_left"` or
/// `"deleted_on_right"` wherever the previous scan shows the path existed on
/// both sides and now exists on only one. Paths never previously seen on
/// both sides are left untouched (they are new, not deleted).
pub fn apply_intentional_deletion_hints(
	diffs: &mut [DiffRecord],
	previous_content_states: &HashMap<String, ContentState>,
) {
	for diff in diffs.iter_mut() {
		let previous = match previous_content_states.get(&diff.relpath) {
			Some(state) => *state,
			None => continue,
		};
		if !was_present_on_both_sides(previous) {
			continue;
		}

		match diff.content_state {
			ContentState::OnlyRight => diff.metadata_source = Some(DELETED_ON_LEFT.to_string()),
			ContentState::OnlyLeft => diff.metadata_source = Some(DELETED_ON_RIGHT.to_string()),
			_ => {}
		}
	}
}
