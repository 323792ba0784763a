//! Shared breadth-first subtree indexing, used both for a full mount
//! rebuild (root `/`, unbounded or `max_depth`-limited) and for a single
//! directory's subtree rebuild when the dirty queue reports a directory
//! touched deeply enough to invalidate its descendants.

use std::collections::VecDeque;

use gateway_fs::FsFacade;
use gateway_store::model::SearchIndexEntry;
use gateway_store::SearchIndexStore;
use gateway_util::background::CancellationToken;
use gateway_util::error::Error;
use gateway_util::time::now_msec;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReindexCounts {
	pub scanned_dirs: u64,
	pub discovered_count: u64,
	pub upserted_count: u64,
	pub pending_count: u64,
}

/// Walks `root_path` and everything beneath it (bounded by `max_depth`
/// relative to `root_path` when given), buffering entries and flushing
/// them to the index in batches of `batch_size`. Calls `on_progress`
/// after every directory dequeued and after every flush.
pub async fn reindex_subtree(
	facade: &FsFacade,
	index: &SearchIndexStore,
	mount_id: &str,
	root_path: &str,
	run_id: &str,
	max_depth: Option<u32>,
	batch_size: usize,
	cancel: &CancellationToken,
	mut on_progress: impl FnMut(ReindexCounts),
) -> Result<ReindexCounts, Error> {
	let mut counts = ReindexCounts::default();
	let mut buffer: Vec<SearchIndexEntry> = vec![];
	let mut queue: VecDeque<(String, u32)> = VecDeque::new();
	queue.push_back((root_path.to_string(), 0));

	while let Some((dir_path, depth)) = queue.pop_front() {
		if cancel.is_cancelled() {
			flush(index, mount_id, &mut buffer, &mut counts)?;
			return Err(Error::Cancelled);
		}

		let children = facade.list_directory(mount_id, &dir_path).await?;
		counts.scanned_dirs += 1;
		counts.discovered_count += children.len() as u64;
		counts.pending_count = buffer.len() as u64 + (queue.len() as u64);

		for item in children {
			if item.is_dir && max_depth.map(|d| depth + 1 <= d).unwrap_or(true) {
				queue.push_back((item.path.clone(), depth + 1));
			}
			buffer.push(SearchIndexEntry {
				mount_id: mount_id.to_string(),
				fs_path: item.path,
				name: item.name,
				is_dir: item.is_dir,
				size: item.size,
				modified_ms: item.last_modified,
				mimetype: item.content_type,
				index_run_id: Some(run_id.to_string()),
				updated_at: now_msec(),
			});
		}

		if buffer.len() >= batch_size {
			flush(index, mount_id, &mut buffer, &mut counts)?;
		}
		on_progress(counts);
	}

	flush(index, mount_id, &mut buffer, &mut counts)?;
	on_progress(counts);
	Ok(counts)
}

fn flush(
	index: &SearchIndexStore,
	_mount_id: &str,
	buffer: &mut Vec<SearchIndexEntry>,
	counts: &mut ReindexCounts,
) -> Result<(), Error> {
	if buffer.is_empty() {
		return Ok(());
	}
	index.upsert_entries(buffer)?;
	counts.upserted_count += buffer.len() as u64;
	buffer.clear();
	Ok(())
}
