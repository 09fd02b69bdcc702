//! Review-state store (C7): a single-file redb database persisting the last
//! scan's diffs, per-path action overrides, and UI preferences across runs.
//!
//! Every public writer opens its own write transaction and commits it before
//! returning, matching the "single connection per unit of work" pattern the
//! teacher uses for its own stateful components. Schema is version-then-
//! rebuild: drift against the running binary's version wipes every table
//! rather than migrating it, since everything here is a cache of the next
//! scan's output.

use std::collections::HashMap;
use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::compare::{summarize_diffs, DiffCounters};
use crate::error::StoreError;
use crate::scan::ScanSummary;
use crate::types::{ContentState, DiffRecord, MetadataState, PlanAction};

const LIMSYNC: TableDefinition<&str, &str> = TableDefinition::new("limsync");
const STATE_META: TableDefinition<&str, &str> = TableDefinition::new("state_meta");
const CURRENT_DIFFS: TableDefinition<&str, &str> = TableDefinition::new("current_diffs");
const SCAN_ACTIONS: TableDefinition<&str, &str> = TableDefinition::new("scan_actions");
const UI_PREFS: TableDefinition<&str, &str> = TableDefinition::new("ui_prefs");

const VERSION_KEY: &str = "version";
const STATE_META_KEY: &str = "singleton";
const RUNNING_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The last scan's summary counters, carried alongside both endpoints'
/// rendered string forms. `counters` is recomputed by
/// [`Store::save_current_state`] from the diffs it's given, so any value
/// set here by the caller before saving is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
	pub left: String,
	pub right: String,
	pub summary: ScanSummary,
	/// Wall-clock seconds the left-hand scan took, measured by the caller
	/// around its `Scanner::scan` call.
	pub source_scan_seconds: f64,
	/// Wall-clock seconds the right-hand scan took, measured the same way.
	pub destination_scan_seconds: f64,
	#[serde(default)]
	pub counters: DiffCounters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionEntry {
	action: PlanAction,
	updated_at: u64,
}

fn now_unix_secs() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

pub struct Store {
	db: Database,
}

impl Store {
	/// Opens (creating if absent) the store at `path`, rebuilding every
	/// table if the persisted version sentinel doesn't match this binary.
	pub fn open(path: &Path) -> Result<Self, StoreError> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let db = Database::create(path)?;
		let store = Store { db };
		store.ensure_schema()?;
		Ok(store)
	}

	fn ensure_schema(&self) -> Result<(), StoreError> {
		let current_version: Option<String> = {
			let read_txn = self.db.begin_read()?;
			match read_txn.open_table(LIMSYNC) {
				Ok(table) => table.get(VERSION_KEY)?.map(|v| v.value().to_string()),
				Err(redb::TableError::TableDoesNotExist(_)) => None,
				Err(e) => return Err(e.into()),
			}
		};

		if current_version.as_deref() == Some(RUNNING_VERSION) {
			return Ok(());
		}

		let write_txn = self.db.begin_write()?;
		for table in [STATE_META, CURRENT_DIFFS, SCAN_ACTIONS, UI_PREFS, LIMSYNC] {
			write_txn.delete_table(table)?;
		}
		{
			let mut table = write_txn.open_table(LIMSYNC)?;
			table.insert(VERSION_KEY, RUNNING_VERSION)?;
		}
		write_txn.commit()?;
		Ok(())
	}

	/// Atomic replace of `state_meta` and `current_diffs`, garbage-collecting
	/// `scan_actions` down to the surviving path set. Used after a full scan.
	pub fn save_current_state(&self, meta: &StateMeta, diffs: &[DiffRecord]) -> Result<(), StoreError> {
		let meta = StateMeta { counters: summarize_diffs(diffs), ..meta.clone() };
		let write_txn = self.db.begin_write()?;
		{
			let mut meta_table = write_txn.open_table(STATE_META)?;
			meta_table.insert(STATE_META_KEY, serde_json::to_string(&meta)?.as_str())?;

			let surviving: std::collections::HashSet<&str> =
				diffs.iter().map(|d| d.relpath.as_str()).collect();

			let mut diffs_table = write_txn.open_table(CURRENT_DIFFS)?;
			let stale: Vec<String> = diffs_table
				.iter()?
				.filter_map(|entry| entry.ok())
				.map(|(k, _)| k.value().to_string())
				.filter(|k| !surviving.contains(k.as_str()))
				.collect();
			for key in &stale {
				diffs_table.remove(key.as_str())?;
			}
			for diff in diffs {
				diffs_table.insert(diff.relpath.as_str(), serde_json::to_string(diff)?.as_str())?;
			}

			let mut actions_table = write_txn.open_table(SCAN_ACTIONS)?;
			let stale_actions: Vec<String> = actions_table
				.iter()?
				.filter_map(|entry| entry.ok())
				.map(|(k, _)| k.value().to_string())
				.filter(|k| !surviving.contains(k.as_str()))
				.collect();
			for key in &stale_actions {
				actions_table.remove(key.as_str())?;
			}
		}
		write_txn.commit()?;
		Ok(())
	}

	/// Same as [`Store::save_current_state`] but restricted to rows whose
	/// relpath equals `scope_relpath` or (when `scope_is_dir`) is prefixed by
	/// `scope_relpath/`. Leaves `scan_actions` untouched outside the scope.
	pub fn replace_diffs_in_scope(
		&self,
		diffs: &[DiffRecord],
		scope_relpath: &str,
		scope_is_dir: bool,
	) -> Result<(), StoreError> {
		let prefix = format!("{}/", scope_relpath);
		let in_scope = |relpath: &str| -> bool {
			relpath == scope_relpath || (scope_is_dir && relpath.starts_with(&prefix))
		};

		let write_txn = self.db.begin_write()?;
		{
			let mut diffs_table = write_txn.open_table(CURRENT_DIFFS)?;
			let stale: Vec<String> = diffs_table
				.iter()?
				.filter_map(|entry| entry.ok())
				.map(|(k, _)| k.value().to_string())
				.filter(|k| in_scope(k))
				.collect();
			for key in &stale {
				diffs_table.remove(key.as_str())?;
			}
			for diff in diffs {
				diffs_table.insert(diff.relpath.as_str(), serde_json::to_string(diff)?.as_str())?;
			}
		}
		write_txn.commit()?;
		Ok(())
	}

	/// The most recently saved [`StateMeta`], or `None` before the first
	/// scan has been persisted.
	pub fn load_state_meta(&self) -> Result<Option<StateMeta>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = match read_txn.open_table(STATE_META) {
			Ok(table) => table,
			Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		match table.get(STATE_META_KEY)? {
			Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
			None => Ok(None),
		}
	}

	/// All persisted diffs, sorted by relpath (redb's key ordering is
	/// lexicographic on `&str`, so no further sort is needed).
	pub fn load_current_diffs(&self) -> Result<Vec<DiffRecord>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = match read_txn.open_table(CURRENT_DIFFS) {
			Ok(table) => table,
			Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};
		let mut out = Vec::new();
		for entry in table.iter()? {
			let (_, v) = entry?;
			out.push(serde_json::from_str(v.value())?);
		}
		Ok(out)
	}

	/// Content states from the last persisted scan, keyed by relpath —
	/// used by the deletion-intent overlay.
	pub fn load_previous_content_states(&self) -> Result<HashMap<String, ContentState>, StoreError> {
		Ok(self.load_current_diffs()?.into_iter().map(|d| (d.relpath, d.content_state)).collect())
	}

	pub fn load_action_overrides(&self) -> Result<HashMap<String, PlanAction>, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = match read_txn.open_table(SCAN_ACTIONS) {
			Ok(table) => table,
			Err(redb::TableError::TableDoesNotExist(_)) => return Ok(HashMap::new()),
			Err(e) => return Err(e.into()),
		};
		let mut out = HashMap::new();
		for entry in table.iter()? {
			let (k, v) = entry?;
			let parsed: ActionEntry = serde_json::from_str(v.value())?;
			out.insert(k.value().to_string(), parsed.action);
		}
		Ok(out)
	}

	pub fn upsert_action_overrides(&self, updates: &HashMap<String, PlanAction>) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(SCAN_ACTIONS)?;
			let updated_at = now_unix_secs();
			for (relpath, action) in updates {
				let entry = ActionEntry { action: *action, updated_at };
				table.insert(relpath.as_str(), serde_json::to_string(&entry)?.as_str())?;
			}
		}
		write_txn.commit()?;
		Ok(())
	}

	pub fn clear_action_overrides(&self) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		write_txn.delete_table(SCAN_ACTIONS)?;
		write_txn.open_table(SCAN_ACTIONS)?;
		write_txn.commit()?;
		Ok(())
	}

	pub fn delete_paths(&self, relpaths: &[String]) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut diffs_table = write_txn.open_table(CURRENT_DIFFS)?;
			let mut actions_table = write_txn.open_table(SCAN_ACTIONS)?;
			for relpath in relpaths {
				diffs_table.remove(relpath.as_str())?;
				actions_table.remove(relpath.as_str())?;
			}
		}
		write_txn.commit()?;
		Ok(())
	}

	/// Marks `relpaths` `(Identical, Identical)` and clears their metadata
	/// columns. Used by the apply engine once a path's operations all
	/// succeed; the row stays visible until the next scan.
	pub fn mark_paths_identical(&self, relpaths: &[String]) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(CURRENT_DIFFS)?;
			for relpath in relpaths {
				let current = table.get(relpath.as_str())?.map(|v| v.value().to_string());
				let Some(current) = current else { continue };
				let mut diff: DiffRecord = serde_json::from_str(&current)?;
				diff.content_state = ContentState::Identical;
				diff.metadata_state = MetadataState::Identical;
				diff.metadata_diff.clear();
				diff.metadata_details.clear();
				diff.metadata_source = None;
				table.insert(relpath.as_str(), serde_json::to_string(&diff)?.as_str())?;
			}
		}
		write_txn.commit()?;
		Ok(())
	}

	pub fn get_ui_pref(&self, key: &str, default: &str) -> Result<String, StoreError> {
		let read_txn = self.db.begin_read()?;
		let table = match read_txn.open_table(UI_PREFS) {
			Ok(table) => table,
			Err(redb::TableError::TableDoesNotExist(_)) => return Ok(default.to_string()),
			Err(e) => return Err(e.into()),
		};
		Ok(table.get(key)?.map(|v| v.value().to_string()).unwrap_or_else(|| default.to_string()))
	}

	pub fn set_ui_pref(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(UI_PREFS)?;
			table.insert(key, value)?;
		}
		write_txn.commit()?;
		Ok(())
	}
}
