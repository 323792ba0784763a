//! Job record model for the background job engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Pending,
	Running,
	Completed,
	Partial,
	Failed,
	Cancelled,
}

impl JobStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
		)
	}

	pub fn is_active(&self) -> bool {
		matches!(self, JobStatus::Pending | JobStatus::Running)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
	User,
	System,
	Schedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
	pub job_id: String,
	pub task_type: String,
	pub status: JobStatus,
	pub payload: serde_json::Value,
	pub stats: serde_json::Value,
	pub user_id: String,
	pub user_type: String,
	pub trigger: JobTrigger,
	pub error_message: Option<String>,
	pub created_at: u64,
	pub started_at: Option<u64>,
	pub finished_at: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
	pub user_id: Option<String>,
	pub task_type: Option<String>,
	pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedActions {
	pub can_view: bool,
	pub can_cancel: bool,
	pub can_delete: bool,
	pub can_retry: bool,
}
