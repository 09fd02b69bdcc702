//! Shared tagged-variant types for the sync core.
//!
//! These mirror the data model directly: runtime reflection / duck typing in
//! the original implementation becomes closed sum types here, so matches are
//! exhaustive and new variants are a compile error at every call site.

use serde::{Deserialize, Serialize};

/// Kind of filesystem node a [`FileRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
	File,
	Directory,
	Symlink,
}

/// Content comparison outcome for a single relpath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentState {
	Identical,
	Different,
	OnlyLeft,
	OnlyRight,
	/// Same size, mtime divergence exceeds tolerance: content equality is
	/// undecidable without reading bytes.
	Unknown,
}

/// Metadata comparison outcome, independent of content state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataState {
	Identical,
	Different,
	/// Used whenever content comparison makes metadata comparison
	/// meaningless (one-sided diffs, symlinks).
	NotApplicable,
}

/// One scanned node, immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
	/// Canonical POSIX-form path relative to root. Never ends with `/`,
	/// never contains `.`/`..` segments, never empty.
	pub relpath: String,
	pub node_type: NodeType,
	/// For `Symlink`, this is the target string length in bytes.
	pub size: u64,
	pub mtime_ns: i128,
	/// POSIX permission bits, low 12 bits.
	pub mode: u32,
	pub link_target: Option<String>,
	pub link_target_key: Option<String>,
	pub owner: Option<String>,
	pub group: Option<String>,
}

/// A per-relpath divergence between two scans, immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRecord {
	pub relpath: String,
	pub content_state: ContentState,
	pub metadata_state: MetadataState,
	/// Field names that differ, drawn from `{"mode","mtime","type"}`.
	pub metadata_diff: Vec<String>,
	/// One "field: left=... right=..." string per `metadata_diff` entry.
	pub metadata_details: Vec<String>,
	/// Hint used by the `Suggested` planner: `"left"`, `"right"`,
	/// `"deleted_on_left"`, `"deleted_on_right"`, or absent.
	pub metadata_source: Option<String>,
	pub left_size: Option<u64>,
	pub right_size: Option<u64>,
}

/// Per-path user decision driving the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
	LeftWins,
	RightWins,
	#[default]
	Ignore,
	Suggested,
}

/// Primitive operation kind the apply engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOperationKind {
	CopyLeft,
	CopyRight,
	DeleteLeft,
	DeleteRight,
	MetadataUpdateLeft,
	MetadataUpdateRight,
}

impl PlanOperationKind {
	/// Token used in logs and progress events.
	pub fn token(self) -> &'static str {
		match self {
			PlanOperationKind::CopyLeft => "copy_left",
			PlanOperationKind::CopyRight => "copy_right",
			PlanOperationKind::DeleteLeft => "delete_left",
			PlanOperationKind::DeleteRight => "delete_right",
			PlanOperationKind::MetadataUpdateLeft => "metadata_update_left",
			PlanOperationKind::MetadataUpdateRight => "metadata_update_right",
		}
	}
}

/// One scheduled primitive operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanOperation {
	pub kind: PlanOperationKind,
	pub relpath: String,
}
