//! The background task engine and the two index handlers it hosts:
//! `fs_index_rebuild` and `fs_index_apply_dirty`.

#[macro_use]
extern crate tracing;

pub mod engine;
pub mod handlers;
pub mod model;
pub mod registry;
pub mod store;

pub use engine::{CallerContext, JobEngine};
pub use handlers::{FsIndexApplyDirtyHandler, FsIndexRebuildHandler};
pub use model::{AllowedActions, JobFilter, JobRecord, JobStatus, JobTrigger};
pub use registry::{
	CreatePolicy, ExecutionOutcome, ExecutionStatus, JobContext, JobTypeCatalog, JobTypeCatalogEntry,
	RetryCapability, TaskHandler, TaskRegistry, Visibility,
};
pub use store::JobStore;

/// Builds the registry + catalog for the two built-in index handlers
/// and wires a ready-to-use `JobEngine` over them. The gateway binary
/// calls this once at startup; additional task types (if any are added
/// later) would extend this function rather than be registered ad hoc.
pub fn build_index_engine(
	facade: std::sync::Arc<gateway_fs::FsFacade>,
	index: std::sync::Arc<gateway_store::SearchIndexStore>,
	store: std::sync::Arc<JobStore>,
) -> Result<std::sync::Arc<JobEngine>, gateway_util::error::Error> {
	let mut registry = TaskRegistry::new();
	registry.register(std::sync::Arc::new(FsIndexRebuildHandler::new(
		facade.clone(),
		index.clone(),
	)));
	registry.register(std::sync::Arc::new(FsIndexApplyDirtyHandler::new(facade, index)));

	let mut catalog = JobTypeCatalog::new();
	catalog.insert(JobTypeCatalogEntry {
		task_type: "fs_index_rebuild",
		visibility: Visibility::OwnerOnly { permission: Some("fs.index.manage") },
		create_policy: CreatePolicy::AdminOnly,
		retry: RetryCapability::CopyRetry,
		i18n_key: "jobs.fsIndexRebuild",
	});
	catalog.insert(JobTypeCatalogEntry {
		task_type: "fs_index_apply_dirty",
		visibility: Visibility::AdminOnly,
		create_policy: CreatePolicy::AdminOnly,
		retry: RetryCapability::CopyRetry,
		i18n_key: "jobs.fsIndexApplyDirty",
	});

	JobEngine::new(registry, catalog, store)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::collections::HashMap;
	use std::sync::Arc;

	fn open_engine() -> Arc<JobEngine> {
		let dir = mktemp::Temp::new_dir().unwrap();
		let index = Arc::new(gateway_store::SearchIndexStore::open(dir.join("idx.db")).unwrap());
		let facade = Arc::new(gateway_fs::FsFacade::new(HashMap::new(), HashMap::new(), index.clone()));
		let jobs_db = dir.join("jobs.sled");
		let job_store = Arc::new(JobStore::open(jobs_db).unwrap());
		build_index_engine(facade, index, job_store).unwrap()
	}

	#[test]
	fn consistency_check_passes_for_builtin_handlers() {
		open_engine();
	}

	#[tokio::test]
	async fn non_admin_cannot_create_admin_only_job_type() {
		let engine = open_engine();
		let caller = CallerContext {
			user_id: "u1".into(),
			is_admin: false,
		};
		let err = engine
			.create_job("fs_index_apply_dirty", json!({}), &caller, JobTrigger::User)
			.unwrap_err();
		assert_eq!(err.kind(), "Authorization");
	}

	#[tokio::test]
	async fn admin_can_create_and_cancel_a_job() {
		let engine = open_engine();
		let admin = CallerContext::admin();
		let job = engine
			.create_job(
				"fs_index_rebuild",
				json!({ "mount_ids": ["m1"] }),
				&admin,
				JobTrigger::User,
			)
			.unwrap();
		let actions = engine.allowed_actions(&job, &admin);
		assert!(actions.can_view);
	}

	#[test]
	fn unknown_job_type_is_not_found() {
		let engine = open_engine();
		let admin = CallerContext::admin();
		let err = engine
			.create_job("does_not_exist", json!({}), &admin, JobTrigger::User)
			.unwrap_err();
		assert_eq!(err.kind(), "NotFound");
	}
}
