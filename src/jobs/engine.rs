//! Job lifecycle, authorization and progress batching.
//!
//! Execution itself runs on a detached `tokio::spawn`ed task per job —
//! there's no dedicated worker pool the way `gateway_coordinator`'s
//! expiry reaper polls on a timer, because a job's lifetime is bounded
//! by its own handler rather than by a recurring schedule.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gateway_util::background::CancellationToken;
use gateway_util::error::Error;
use gateway_util::time::now_msec;
use tokio::sync::watch;
use uuid::Uuid;

use crate::model::{AllowedActions, JobFilter, JobRecord, JobStatus, JobTrigger};
use crate::registry::{
	consistency_check, CreatePolicy, ExecutionStatus, JobContext, JobTypeCatalog, TaskRegistry,
	Visibility,
};
use crate::store::JobStore;

/// Progress updates are coalesced so a handler calling `updateProgress`
/// once per item doesn't turn into one store write per item: a flush
/// only actually persists every 25 calls or 1.5s, whichever comes
/// first.
const PROGRESS_BATCH_COUNT: u32 = 25;
const PROGRESS_BATCH_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct CallerContext {
	pub user_id: String,
	pub is_admin: bool,
}

impl CallerContext {
	pub fn admin() -> Self {
		Self {
			user_id: "admin".into(),
			is_admin: true,
		}
	}
}

pub struct JobEngine {
	registry: TaskRegistry,
	catalog: JobTypeCatalog,
	store: Arc<JobStore>,
	cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl JobEngine {
	pub fn new(registry: TaskRegistry, catalog: JobTypeCatalog, store: Arc<JobStore>) -> Result<Arc<Self>, Error> {
		consistency_check(&registry, &catalog)?;
		let recovered = store.recover_interrupted()?;
		if recovered > 0 {
			warn!("marked {} interrupted job(s) as failed on startup", recovered);
		}
		Ok(Arc::new(Self {
			registry,
			catalog,
			store,
			cancels: Mutex::new(HashMap::new()),
		}))
	}

	fn entry(&self, task_type: &str) -> Result<&crate::registry::JobTypeCatalogEntry, Error> {
		self.catalog
			.get(task_type)
			.ok_or_else(|| Error::not_found(format!("unknown job type {}", task_type)))
	}

	fn visible_to(&self, job: &JobRecord, caller: &CallerContext) -> bool {
		if caller.is_admin {
			return true;
		}
		let Some(entry) = self.catalog.get(&job.task_type) else {
			return false;
		};
		if matches!(entry.visibility, Visibility::AdminOnly) {
			return false;
		}
		job.user_id == caller.user_id
	}

	pub fn create_job(
		self: &Arc<Self>,
		task_type: &str,
		payload: serde_json::Value,
		caller: &CallerContext,
		trigger: JobTrigger,
	) -> Result<JobRecord, Error> {
		let entry = self.entry(task_type)?;
		if matches!(entry.create_policy, CreatePolicy::AdminOnly) && !caller.is_admin {
			return Err(Error::Authorization(format!(
				"job type {} may only be created by an administrator",
				task_type
			)));
		}

		let handler = self
			.registry
			.get(task_type)
			.ok_or_else(|| Error::Message(format!("job type {} has no registered handler", task_type)))?;
		handler.validate(&payload)?;
		let stats = handler.create_stats_template(&payload);

		let now = now_msec();
		let job = JobRecord {
			job_id: Uuid::new_v4().to_string(),
			task_type: task_type.to_string(),
			status: JobStatus::Pending,
			payload,
			stats,
			user_id: caller.user_id.clone(),
			user_type: if caller.is_admin { "admin".into() } else { "user".into() },
			trigger,
			error_message: None,
			created_at: now,
			started_at: None,
			finished_at: None,
		};
		self.store.put(&job)?;
		self.spawn_execution(job.clone(), handler);
		Ok(job)
	}

	fn spawn_execution(self: &Arc<Self>, mut job: JobRecord, handler: Arc<dyn crate::registry::TaskHandler>) {
		let (tx, rx) = watch::channel(false);
		self.cancels.lock().unwrap().insert(job.job_id.clone(), tx);
		let cancel = CancellationToken::new(rx);
		let engine = Arc::clone(self);

		tokio::spawn(async move {
			job.status = JobStatus::Running;
			job.started_at = Some(now_msec());
			if let Err(e) = engine.store.put(&job) {
				error!("failed to persist job {} start: {}", job.job_id, e);
				return;
			}

			let progress = ProgressBatcher::new(Arc::clone(&engine.store), job.clone());
			let ctx = JobContext::new(job.job_id.clone(), cancel, progress.callback());

			let outcome = handler.execute(&job, &ctx).await;
			progress.flush_now();

			let job_id = job.job_id.clone();
			let mut job = engine.store.require(&job_id).unwrap_or(job);
			job.finished_at = Some(now_msec());
			match outcome {
				Ok(result) => {
					job.status = match result.status {
						ExecutionStatus::Completed => JobStatus::Completed,
						ExecutionStatus::Partial => JobStatus::Partial,
					};
					job.stats = result.stats;
				}
				Err(Error::Cancelled) => {
					job.status = JobStatus::Cancelled;
				}
				Err(e) => {
					job.status = JobStatus::Failed;
					job.error_message = Some(e.to_string());
				}
			}
			if let Err(e) = engine.store.put(&job) {
				error!("failed to persist job {} completion: {}", job.job_id, e);
			}
			engine.cancels.lock().unwrap().remove(&job.job_id);
		});
	}

	pub fn get_job(&self, job_id: &str, caller: &CallerContext) -> Result<JobRecord, Error> {
		let job = self.store.require(job_id)?;
		if !self.visible_to(&job, caller) {
			return Err(Error::not_found(format!("job {} not found", job_id)));
		}
		Ok(job)
	}

	pub fn list_jobs(&self, caller: &CallerContext, mut filter: JobFilter) -> Result<Vec<JobRecord>, Error> {
		if !caller.is_admin {
			filter.user_id = Some(caller.user_id.clone());
		}
		let jobs = self.store.list(&filter)?;
		Ok(jobs
			.into_iter()
			.filter(|j| self.visible_to(j, caller))
			.collect())
	}

	pub fn cancel_job(&self, job_id: &str, caller: &CallerContext) -> Result<JobRecord, Error> {
		let job = self.get_job(job_id, caller)?;
		let actions = self.allowed_actions(&job, caller);
		if !actions.can_cancel {
			return Err(Error::Authorization("job cannot be cancelled".into()));
		}
		if let Some(tx) = self.cancels.lock().unwrap().get(job_id) {
			let _ = tx.send(true);
		}
		Ok(job)
	}

	pub fn delete_job(&self, job_id: &str, caller: &CallerContext) -> Result<(), Error> {
		let job = self.get_job(job_id, caller)?;
		let actions = self.allowed_actions(&job, caller);
		if !actions.can_delete {
			return Err(Error::Authorization("job cannot be deleted".into()));
		}
		self.store.delete(job_id)
	}

	pub fn retry_job(
		self: &Arc<Self>,
		job_id: &str,
		caller: &CallerContext,
	) -> Result<JobRecord, Error> {
		let job = self.get_job(job_id, caller)?;
		let actions = self.allowed_actions(&job, caller);
		if !actions.can_retry {
			return Err(Error::Authorization("job cannot be retried".into()));
		}
		self.create_job(&job.task_type, job.payload.clone(), caller, JobTrigger::User)
	}

	pub fn allowed_actions(&self, job: &JobRecord, caller: &CallerContext) -> AllowedActions {
		let owns_or_admin = caller.is_admin || job.user_id == caller.user_id;
		let can_view = self.visible_to(job, caller);
		let retry_capable = self
			.catalog
			.get(&job.task_type)
			.map(|e| matches!(e.retry, crate::registry::RetryCapability::CopyRetry))
			.unwrap_or(false);

		AllowedActions {
			can_view,
			can_cancel: can_view && owns_or_admin && job.status.is_active(),
			can_delete: can_view && owns_or_admin && job.status.is_terminal(),
			can_retry: can_view
				&& owns_or_admin
				&& retry_capable
				&& matches!(job.status, JobStatus::Failed | JobStatus::Partial),
		}
	}
}

/// Coalesces `JobContext::update_progress` calls into periodic store
/// writes. Holds the last-seen stats blob so a final `flush_now` at job
/// completion never loses an update that arrived just under the
/// threshold.
struct ProgressBatcher {
	store: Arc<JobStore>,
	job: Mutex<JobRecord>,
	state: Mutex<BatchState>,
}

struct BatchState {
	last_flush: Instant,
	calls_since_flush: u32,
	pending: Option<serde_json::Value>,
}

impl ProgressBatcher {
	fn new(store: Arc<JobStore>, job: JobRecord) -> Arc<Self> {
		Arc::new(Self {
			store,
			job: Mutex::new(job),
			state: Mutex::new(BatchState {
				last_flush: Instant::now(),
				calls_since_flush: 0,
				pending: None,
			}),
		})
	}

	fn callback(self: &Arc<Self>) -> Box<dyn Fn(serde_json::Value) + Send + Sync> {
		let this = Arc::clone(self);
		Box::new(move |stats| this.record(stats))
	}

	fn record(&self, stats: serde_json::Value) {
		let mut state = self.state.lock().unwrap();
		state.pending = Some(stats);
		state.calls_since_flush += 1;
		let due = state.calls_since_flush >= PROGRESS_BATCH_COUNT
			|| state.last_flush.elapsed() >= PROGRESS_BATCH_INTERVAL;
		if due {
			self.flush_locked(&mut state);
		}
	}

	fn flush_locked(&self, state: &mut BatchState) {
		if let Some(stats) = state.pending.take() {
			let mut job = self.job.lock().unwrap();
			job.stats = stats;
			let _ = self.store.put(&job);
		}
		state.calls_since_flush = 0;
		state.last_flush = Instant::now();
	}

	fn flush_now(&self) {
		let mut state = self.state.lock().unwrap();
		self.flush_locked(&mut state);
	}
}
