//! `fs_index_rebuild`: full reindex of one or more mounts from
//! scratch. Each mount gets its own run id so stale rows left behind by
//! a previous (possibly interrupted) run can be told apart from rows
//! this run actually touched, and dropped in one pass at the end.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_fs::FsFacade;
use gateway_store::SearchIndexStore;
use gateway_util::error::Error;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::model::JobRecord;
use crate::registry::{ExecutionOutcome, ExecutionStatus, JobContext, TaskHandler};

use super::reindex::reindex_subtree;

const DEFAULT_BATCH_SIZE: usize = 200;
const MIN_BATCH_SIZE: usize = 20;
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct RebuildPayload {
	mount_ids: Vec<String>,
	max_depth: Option<u32>,
	#[serde(default)]
	batch_size: Option<usize>,
}

pub struct FsIndexRebuildHandler {
	facade: Arc<FsFacade>,
	index: Arc<SearchIndexStore>,
}

impl FsIndexRebuildHandler {
	pub fn new(facade: Arc<FsFacade>, index: Arc<SearchIndexStore>) -> Self {
		Self { facade, index }
	}
}

#[async_trait]
impl TaskHandler for FsIndexRebuildHandler {
	fn task_type(&self) -> &'static str {
		"fs_index_rebuild"
	}

	fn validate(&self, payload: &serde_json::Value) -> Result<(), Error> {
		let parsed: RebuildPayload = serde_json::from_value(payload.clone())
			.map_err(|e| Error::validation(format!("invalid fs_index_rebuild payload: {}", e)))?;
		if parsed.mount_ids.is_empty() {
			return Err(Error::validation("mount_ids must not be empty"));
		}
		if let Some(bs) = parsed.batch_size {
			if bs == 0 {
				return Err(Error::validation("batch_size must be positive"));
			}
		}
		Ok(())
	}

	fn create_stats_template(&self, payload: &serde_json::Value) -> serde_json::Value {
		let mount_ids: Vec<String> = payload
			.get("mount_ids")
			.and_then(|v| v.as_array())
			.map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
			.unwrap_or_default();
		json!({ "mounts": mount_ids.into_iter().map(|m| (m, json!({
			"scannedDirs": 0, "discoveredCount": 0, "upsertedCount": 0, "pendingCount": 0,
		}))).collect::<HashMap<_, _>>() })
	}

	async fn execute(&self, job: &JobRecord, ctx: &JobContext) -> Result<ExecutionOutcome, Error> {
		let payload: RebuildPayload = serde_json::from_value(job.payload.clone())?;
		let batch_size = payload
			.batch_size
			.unwrap_or(DEFAULT_BATCH_SIZE)
			.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);

		let mut any_failed = false;
		let mut per_mount: HashMap<String, serde_json::Value> = HashMap::new();

		for mount_id in &payload.mount_ids {
			if ctx.is_cancelled() {
				self.index.mark_error(mount_id, "cancelled before this mount was scanned")?;
				any_failed = true;
				continue;
			}

			let run_id = Uuid::new_v4().to_string();
			self.index.mark_indexing(mount_id, &job.job_id)?;

			let mount_id_owned = mount_id.clone();
			let result = reindex_subtree(
				&self.facade,
				&self.index,
				mount_id,
				"/",
				&run_id,
				payload.max_depth,
				batch_size,
				&ctx.cancel,
				|counts| {
					per_mount.insert(
						mount_id_owned.clone(),
						json!({
							"scannedDirs": counts.scanned_dirs,
							"discoveredCount": counts.discovered_count,
							"upsertedCount": counts.upserted_count,
							"pendingCount": counts.pending_count,
						}),
					);
					ctx.update_progress(json!({ "mounts": per_mount }));
				},
			)
			.await;

			match result {
				Ok(_) => {
					self.index.cleanup_mount_by_run_id(mount_id, &run_id)?;
					self.index.clear_dirty_by_mount(mount_id)?;
					self.index.mark_ready(mount_id, &run_id)?;
				}
				Err(e) => {
					any_failed = true;
					let message = if matches!(e, Error::Cancelled) {
						"cancelled".to_string()
					} else {
						e.to_string()
					};
					warn!("index rebuild failed for mount {}: {}", mount_id, message);
					self.index.mark_error(mount_id, &message)?;
				}
			}
		}

		Ok(ExecutionOutcome {
			status: if any_failed { ExecutionStatus::Partial } else { ExecutionStatus::Completed },
			stats: json!({ "mounts": per_mount }),
		})
	}
}
