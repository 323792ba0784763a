//! Cache/index invalidation rules: translating a mutating VFS
//! operation into dirty-queue rows for the search index, and into the
//! collapsed set of directories an external listing cache should drop
//! (that cache itself lives outside this process, but the facade
//! still computes what it would need to invalidate).

use gateway_store::model::{dirty_dedupe_key, DirtyOp, DirtyQueueItem};
use gateway_util::time::now_msec;

const DIRTY_AMPLIFICATION_LIMIT: usize = 200;
const DIRECTORY_INVALIDATION_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
	Upload,
	Update,
	Mkdir,
	Rename,
	Copy,
	BatchRemove,
	Remove,
}

#[derive(Debug, Clone)]
pub struct CacheInvalidationEvent {
	pub mount_id: String,
	pub storage_config_id: String,
	pub paths: Vec<String>,
	pub reason: InvalidationReason,
}

/// Maps one invalidation event into dirty-queue rows per §4.7's rules.
pub fn map_to_dirty_rows(event: &CacheInvalidationEvent) -> Vec<DirtyQueueItem> {
	let now = now_msec();
	let row = |mount_id: &str, fs_path: &str, op: DirtyOp| DirtyQueueItem {
		mount_id: mount_id.to_string(),
		fs_path: fs_path.to_string(),
		dedupe_key: dirty_dedupe_key(mount_id, fs_path, op),
		op,
		enqueued_at: now,
	};

	match event.reason {
		InvalidationReason::Rename if event.paths.len() == 2 => vec![
			row(&event.mount_id, &event.paths[0], DirtyOp::Delete),
			row(&event.mount_id, &event.paths[1], DirtyOp::Upsert),
		],
		InvalidationReason::BatchRemove => event
			.paths
			.iter()
			.map(|p| row(&event.mount_id, p, DirtyOp::Delete))
			.collect(),
		InvalidationReason::Remove => event
			.paths
			.iter()
			.map(|p| row(&event.mount_id, p, DirtyOp::Delete))
			.collect(),
		_ if event.paths.len() > DIRTY_AMPLIFICATION_LIMIT => {
			let prefix = common_directory_prefix(&event.paths);
			vec![row(&event.mount_id, &prefix, DirtyOp::Upsert)]
		}
		_ => event
			.paths
			.iter()
			.map(|p| row(&event.mount_id, p, DirtyOp::Upsert))
			.collect(),
	}
}

/// Longest shared directory prefix of a path set, used when a batch is
/// too large to enqueue path-by-path — the reconciler does a subtree
/// rebuild from this prefix instead.
pub fn common_directory_prefix(paths: &[String]) -> String {
	if paths.is_empty() {
		return "/".to_string();
	}
	let dirs: Vec<&str> = paths.iter().map(|p| containing_directory(p)).collect();
	let mut prefix = dirs[0].to_string();
	for dir in &dirs[1..] {
		while !dir.starts_with(prefix.as_str()) {
			match prefix.rfind('/') {
				Some(0) => {
					prefix = "/".to_string();
					break;
				}
				Some(idx) => prefix.truncate(idx),
				None => {
					prefix = "/".to_string();
					break;
				}
			}
		}
	}
	if prefix.is_empty() {
		"/".to_string()
	} else if prefix.ends_with('/') {
		prefix
	} else {
		format!("{}/", prefix)
	}
}

fn containing_directory(path: &str) -> &str {
	if path.ends_with('/') {
		return path;
	}
	match path.rfind('/') {
		Some(0) => "/",
		Some(idx) => &path[..idx],
		None => "/",
	}
}

/// Directory-granularity invalidation targets for an external listing
/// cache: normalize every path to its containing directory, collapse
/// to a set, and degrade to a mount-level invalidation (empty vec) if
/// that set is still too large.
pub fn directory_invalidation_targets(paths: &[String]) -> Vec<String> {
	let mut dirs: Vec<String> = paths
		.iter()
		.map(|p| {
			if p.ends_with('/') {
				p.clone()
			} else {
				containing_directory(p).to_string()
			}
		})
		.collect();
	dirs.sort();
	dirs.dedup();
	if dirs.len() > DIRECTORY_INVALIDATION_LIMIT {
		vec![]
	} else {
		dirs
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn event(reason: InvalidationReason, paths: &[&str]) -> CacheInvalidationEvent {
		CacheInvalidationEvent {
			mount_id: "m1".into(),
			storage_config_id: "cfg1".into(),
			paths: paths.iter().map(|s| s.to_string()).collect(),
			reason,
		}
	}

	#[test]
	fn rename_emits_delete_old_upsert_new() {
		let rows = map_to_dirty_rows(&event(InvalidationReason::Rename, &["/a.txt", "/b.txt"]));
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].op, DirtyOp::Delete);
		assert_eq!(rows[0].fs_path, "/a.txt");
		assert_eq!(rows[1].op, DirtyOp::Upsert);
		assert_eq!(rows[1].fs_path, "/b.txt");
	}

	#[test]
	fn batch_remove_emits_one_delete_per_path() {
		let rows = map_to_dirty_rows(&event(InvalidationReason::BatchRemove, &["/a.txt", "/b.txt", "/c.txt"]));
		assert_eq!(rows.len(), 3);
		assert!(rows.iter().all(|r| r.op == DirtyOp::Delete));
	}

	#[test]
	fn large_batch_degrades_to_prefix_upsert() {
		let paths: Vec<String> = (0..201).map(|i| format!("/dir/sub{}/file.txt", i)).collect();
		let event = CacheInvalidationEvent {
			mount_id: "m1".into(),
			storage_config_id: "cfg1".into(),
			paths,
			reason: InvalidationReason::Upload,
		};
		let rows = map_to_dirty_rows(&event);
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].op, DirtyOp::Upsert);
		assert_eq!(rows[0].fs_path, "/dir/");
	}

	#[test]
	fn default_case_emits_one_upsert_per_path() {
		let rows = map_to_dirty_rows(&event(InvalidationReason::Update, &["/a.txt"]));
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].op, DirtyOp::Upsert);
	}

	#[test]
	fn directory_targets_collapse_and_dedup() {
		let paths = vec!["/a/1.txt".to_string(), "/a/2.txt".to_string(), "/b/3.txt".to_string()];
		let targets = directory_invalidation_targets(&paths);
		assert_eq!(targets, vec!["/a".to_string(), "/b".to_string()]);
	}

	#[test]
	fn directory_targets_degrade_to_mount_level_when_too_many() {
		let paths: Vec<String> = (0..201).map(|i| format!("/dir{}/file.txt", i)).collect();
		assert!(directory_invalidation_targets(&paths).is_empty());
	}
}
