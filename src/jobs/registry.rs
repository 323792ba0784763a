//! Task registry and job type catalog: the process-wide map from
//! `task_type` to its handler, alongside the parallel catalog of
//! policy metadata about that type (visibility, creation policy, retry
//! capability, i18n key). Kept as two maps rather than one so a
//! handler implementation and its exposed policy can be reviewed and
//! tested independently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_util::background::CancellationToken;
use gateway_util::error::Error;

use crate::model::JobRecord;

/// Who is allowed to create/see a job of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
	AdminOnly,
	OwnerOnly { permission: Option<&'static str> },
}

/// Whether a job of this type can be retried by cloning its payload
/// into a fresh job (`copy_retry`), or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCapability {
	None,
	CopyRetry,
}

/// Who is allowed to create a job of this type. Kept separate from
/// `Visibility` — a type can be owner-visible yet admin-created only
/// (e.g. a rebuild triggered from the admin console but whose progress
/// any affected owner may watch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
	AdminOnly,
	AnyUser,
}

#[derive(Debug, Clone, Copy)]
pub struct JobTypeCatalogEntry {
	pub task_type: &'static str,
	pub visibility: Visibility,
	pub create_policy: CreatePolicy,
	pub retry: RetryCapability,
	pub i18n_key: &'static str,
}

/// Progress/cancellation handle passed into a running handler.
pub struct JobContext {
	pub job_id: String,
	pub cancel: CancellationToken,
	progress: Box<dyn Fn(serde_json::Value) + Send + Sync>,
}

impl JobContext {
	pub fn new(
		job_id: String,
		cancel: CancellationToken,
		progress: Box<dyn Fn(serde_json::Value) + Send + Sync>,
	) -> Self {
		Self {
			job_id,
			cancel,
			progress,
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub fn update_progress(&self, stats: serde_json::Value) {
		(self.progress)(stats)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
	Completed,
	Partial,
}

pub struct ExecutionOutcome {
	pub status: ExecutionStatus,
	pub stats: serde_json::Value,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
	fn task_type(&self) -> &'static str;

	/// Rejects a malformed payload before a job row is ever created.
	fn validate(&self, payload: &serde_json::Value) -> Result<(), Error>;

	/// The initial `stats` blob a newly created job is seeded with,
	/// before the first progress update arrives.
	fn create_stats_template(&self, payload: &serde_json::Value) -> serde_json::Value;

	async fn execute(
		&self,
		job: &JobRecord,
		ctx: &JobContext,
	) -> Result<ExecutionOutcome, Error>;
}

#[derive(Default)]
pub struct TaskRegistry {
	handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
		self.handlers.insert(handler.task_type(), handler);
	}

	pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
		self.handlers.get(task_type).cloned()
	}

	pub fn task_types(&self) -> Vec<&'static str> {
		self.handlers.keys().copied().collect()
	}
}

#[derive(Default)]
pub struct JobTypeCatalog {
	entries: HashMap<&'static str, JobTypeCatalogEntry>,
}

impl JobTypeCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, entry: JobTypeCatalogEntry) {
		self.entries.insert(entry.task_type, entry);
	}

	pub fn get(&self, task_type: &str) -> Option<&JobTypeCatalogEntry> {
		self.entries.get(task_type)
	}

	pub fn task_types(&self) -> Vec<&'static str> {
		self.entries.keys().copied().collect()
	}
}

/// Every registered handler must have a matching catalog entry and vice
/// versa; a mismatch is a startup bug, not something to paper over at
/// runtime, so this aborts startup rather than returning a per-job
/// error later.
pub fn consistency_check(registry: &TaskRegistry, catalog: &JobTypeCatalog) -> Result<(), Error> {
	let mut handler_types: Vec<&str> = registry.task_types();
	let mut catalog_types: Vec<&str> = catalog.task_types();
	handler_types.sort_unstable();
	catalog_types.sort_unstable();

	for t in &handler_types {
		if catalog.get(t).is_none() {
			return Err(Error::Message(format!(
				"task handler {} is registered without a job type catalog entry",
				t
			)));
		}
	}
	for t in &catalog_types {
		if registry.get(t).is_none() {
			return Err(Error::Message(format!(
				"job type catalog entry {} has no registered task handler",
				t
			)));
		}
	}
	Ok(())
}
