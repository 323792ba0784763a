//! `fs_index_apply_dirty`: drains the dirty queue and reconciles the
//! search index against it. Only mounts whose index is
//! `ready` are touched; rows for mounts still indexing, in error, or
//! never indexed are left in the queue untouched so a later run can
//! pick them up once the mount becomes ready.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_fs::FsFacade;
use gateway_store::model::{DirtyOp, DirtyQueueItem, MountIndexStatus};
use gateway_store::SearchIndexStore;
use gateway_util::error::Error;
use serde::Deserialize;
use serde_json::json;

use crate::model::JobRecord;
use crate::registry::{ExecutionOutcome, ExecutionStatus, JobContext, TaskHandler};

use super::reindex::reindex_subtree;

const DEFAULT_BATCH_SIZE: usize = 200;
const MIN_BATCH_SIZE: usize = 20;
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Default, Deserialize)]
struct ApplyDirtyPayload {
	#[serde(default)]
	batch_size: Option<usize>,
}

pub struct FsIndexApplyDirtyHandler {
	facade: Arc<FsFacade>,
	index: Arc<SearchIndexStore>,
}

impl FsIndexApplyDirtyHandler {
	pub fn new(facade: Arc<FsFacade>, index: Arc<SearchIndexStore>) -> Self {
		Self { facade, index }
	}

	/// Applies one dirty-queue row for a mount already confirmed `ready`.
	async fn apply_one(&self, item: &DirtyQueueItem, ctx: &JobContext) -> Result<(), Error> {
		match item.op {
			DirtyOp::Delete => {
				self.index.delete_entry(&item.mount_id, &item.fs_path)?;
				self.index.delete_by_path_prefix(&item.mount_id, &format!("{}/", item.fs_path.trim_end_matches('/')))?;
			}
			DirtyOp::Upsert => match self.facade.stat(&item.mount_id, &item.fs_path).await {
				Ok(stat) if stat.is_dir => {
					let run_id = uuid::Uuid::new_v4().to_string();
					let dir_entry = gateway_store::model::SearchIndexEntry {
						mount_id: item.mount_id.clone(),
						fs_path: stat.path,
						name: stat.name,
						is_dir: true,
						size: stat.size,
						modified_ms: stat.last_modified,
						mimetype: stat.content_type,
						index_run_id: Some(run_id.clone()),
						updated_at: gateway_util::time::now_msec(),
					};
					self.index.upsert_entries(std::slice::from_ref(&dir_entry))?;
					reindex_subtree(
						&self.facade,
						&self.index,
						&item.mount_id,
						&item.fs_path,
						&run_id,
						None,
						DEFAULT_BATCH_SIZE,
						&ctx.cancel,
						|_counts| {},
					)
					.await?;
					let prefix = format!("{}/", item.fs_path.trim_end_matches('/'));
					self.index.cleanup_prefix_by_run_id(&item.mount_id, &prefix, &run_id)?;
				}
				Ok(stat) => {
					let entry = gateway_store::model::SearchIndexEntry {
						mount_id: item.mount_id.clone(),
						fs_path: stat.path,
						name: stat.name,
						is_dir: false,
						size: stat.size,
						modified_ms: stat.last_modified,
						mimetype: stat.content_type,
						index_run_id: None,
						updated_at: gateway_util::time::now_msec(),
					};
					self.index.upsert_entries(std::slice::from_ref(&entry))?;
				}
				Err(e) if e.kind() == "NotFound" => {
					// Upstream already removed it by the time we got here.
					self.index.delete_entry(&item.mount_id, &item.fs_path)?;
				}
				Err(e) => return Err(e),
			},
		}
		Ok(())
	}
}

#[async_trait]
impl TaskHandler for FsIndexApplyDirtyHandler {
	fn task_type(&self) -> &'static str {
		"fs_index_apply_dirty"
	}

	fn validate(&self, payload: &serde_json::Value) -> Result<(), Error> {
		let parsed: ApplyDirtyPayload = serde_json::from_value(payload.clone())
			.map_err(|e| Error::validation(format!("invalid fs_index_apply_dirty payload: {}", e)))?;
		if let Some(bs) = parsed.batch_size {
			if bs == 0 {
				return Err(Error::validation("batch_size must be positive"));
			}
		}
		Ok(())
	}

	fn create_stats_template(&self, _payload: &serde_json::Value) -> serde_json::Value {
		json!({ "applied": 0, "skippedNotReady": 0, "failed": 0 })
	}

	async fn execute(&self, job: &JobRecord, ctx: &JobContext) -> Result<ExecutionOutcome, Error> {
		let payload: ApplyDirtyPayload = serde_json::from_value(job.payload.clone())?;
		let batch_size = payload
			.batch_size
			.unwrap_or(DEFAULT_BATCH_SIZE)
			.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);

		let mount_ids = self.facade.mount_ids();
		let states = self.index.get_index_states(&mount_ids)?;

		let mut applied = 0u64;
		let mut failed = 0u64;
		let mut consumed_keys = vec![];
		let mut not_ready_reasons: HashMap<String, &'static str> = HashMap::new();

		'mounts: for mount_id in &mount_ids {
			if ctx.is_cancelled() {
				break;
			}
			let ready = matches!(
				states.get(mount_id).and_then(|s| s.status),
				Some(MountIndexStatus::Ready)
			);
			if !ready {
				not_ready_reasons.insert(mount_id.clone(), "index_not_ready");
				continue;
			}

			// Per-mount batch: a backlog on one mount never starves the
			// dirty rows of another ready mount.
			let batch = self.index.list_dirty_batch(mount_id, batch_size)?;
			for item in &batch {
				if ctx.is_cancelled() {
					break 'mounts;
				}
				match self.apply_one(item, ctx).await {
					Ok(()) => {
						applied += 1;
						consumed_keys.push(item.dedupe_key.clone());
					}
					Err(e) => {
						failed += 1;
						warn!(
							"failed to apply dirty entry {} on mount {}: {}",
							item.fs_path, item.mount_id, e
						);
					}
				}
				ctx.update_progress(json!({
					"applied": applied,
					"skippedNotReady": not_ready_reasons.len(),
					"failed": failed,
				}));
			}
		}

		if !consumed_keys.is_empty() {
			self.index.delete_dirty_by_keys(&consumed_keys)?;
		}

		Ok(ExecutionOutcome {
			status: if failed > 0 { ExecutionStatus::Partial } else { ExecutionStatus::Completed },
			stats: json!({
				"applied": applied,
				"skippedNotReady": not_ready_reasons.len(),
				"failed": failed,
				"notReadyMounts": not_ready_reasons,
			}),
		})
	}
}
