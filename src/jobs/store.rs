//! Durable job records, kept the same way the session ledger keeps
//! upload sessions: a flat `sled::Tree` keyed by id, JSON-encoded rows.

use std::path::Path;

use gateway_util::error::Error;

use crate::model::{JobFilter, JobRecord, JobStatus};

pub struct JobStore {
	jobs: sled::Tree,
}

impl JobStore {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
		let db = sled::Config::default()
			.path(path.as_ref())
			.open()
			.map_err(|e| Error::Infrastructure(format!("unable to open job db: {}", e)))?;
		Ok(Self {
			jobs: db.open_tree("jobs")?,
		})
	}

	pub fn put(&self, job: &JobRecord) -> Result<(), Error> {
		let bytes = serde_json::to_vec(job)?;
		self.jobs.insert(job.job_id.as_bytes(), bytes)?;
		Ok(())
	}

	pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>, Error> {
		match self.jobs.get(job_id.as_bytes())? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	pub fn require(&self, job_id: &str) -> Result<JobRecord, Error> {
		self.get(job_id)?
			.ok_or_else(|| Error::not_found(format!("job {} not found", job_id)))
	}

	pub fn delete(&self, job_id: &str) -> Result<(), Error> {
		self.jobs.remove(job_id.as_bytes())?;
		Ok(())
	}

	pub fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, Error> {
		let mut out = vec![];
		for item in self.jobs.iter() {
			let (_, value) = item?;
			let job: JobRecord = serde_json::from_slice(&value)?;
			if let Some(uid) = &filter.user_id {
				if &job.user_id != uid {
					continue;
				}
			}
			if let Some(tt) = &filter.task_type {
				if &job.task_type != tt {
					continue;
				}
			}
			if let Some(status) = &filter.status {
				if job.status != *status {
					continue;
				}
			}
			out.push(job);
		}
		out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(out)
	}

	/// Any job still marked `Running` or `Pending` when the store is
	/// opened was interrupted by a process restart — no executor is
	/// driving it anymore, so it can never reach a terminal state on its
	/// own. Mark it `Failed` and fold the finding into its stats so a
	/// caller can tell the failure wasn't operational.
	pub fn recover_interrupted(&self) -> Result<u64, Error> {
		let mut n = 0;
		for item in self.jobs.iter() {
			let (key, value) = item?;
			let mut job: JobRecord = serde_json::from_slice(&value)?;
			if job.status.is_active() {
				job.status = JobStatus::Failed;
				job.error_message = Some("interrupted by a gateway restart".into());
				job.finished_at = Some(gateway_util::time::now_msec());
				let bytes = serde_json::to_vec(&job)?;
				self.jobs.insert(key, bytes)?;
				n += 1;
			}
		}
		Ok(n)
	}
}
