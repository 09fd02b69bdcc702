//! Scanner (C4): walks a rooted tree — local or remote — into a
//! `{relpath → FileRecord}` map plus a summary, honoring nested
//! `.dropboxignore` files and the hard-coded exclude set.

pub mod local;
pub mod remote;

pub use local::scan_local;
pub use remote::scan_remote;

use std::collections::HashMap;

use crate::types::FileRecord;

pub type FileMap = HashMap<String, FileRecord>;

/// One throttled progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanProgress {
	pub current_relpath: String,
	pub dirs_scanned: u64,
	pub files_seen: u64,
}

pub type ProgressCallback<'a> = dyn Fn(ScanProgress) + Send + Sync + 'a;

/// Terminal counters for one scan, mirroring the remote helper's `done`
/// event fields.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanSummary {
	pub dirs_scanned: u64,
	pub files_seen: u64,
	pub errors: Vec<String>,
}
