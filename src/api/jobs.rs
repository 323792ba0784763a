//! Job admin endpoints: thin HTTP wrapping around `JobEngine`, which
//! already owns every authorization/visibility decision — this module
//! only shapes requests/responses.

use std::sync::Arc;

use hyper::{Body, Request, Response};
use serde::{Deserialize, Serialize};

use gateway_jobs::{AllowedActions, JobFilter, JobRecord, JobStatus, JobTrigger};

use crate::caller::caller_from_request;
use crate::error::ApiError;
use crate::helpers::{json_ok_response, no_content_response, parse_json_body, query_params};
use crate::state::ApiState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
	#[serde(flatten)]
	job: JobRecord,
	allowed_actions: AllowedActions,
}

fn respond(job: JobRecord, actions: AllowedActions) -> Result<Response<Body>, ApiError> {
	json_ok_response(&JobResponse { job, allowed_actions: actions })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobBody {
	task_type: String,
	#[serde(default)]
	payload: serde_json::Value,
}

pub async fn create_job(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let caller = caller_from_request(&req)?;
	let body: CreateJobBody = parse_json_body(req).await?;
	let ctx = gateway_jobs::CallerContext { user_id: caller.user_id, is_admin: caller.is_admin };
	let job = state
		.jobs
		.create_job(&body.task_type, body.payload, &ctx, JobTrigger::User)
		.map_err(ApiError::from)?;
	let actions = state.jobs.allowed_actions(&job, &ctx);
	respond(job, actions)
}

pub async fn get_job(req: Request<Body>, state: Arc<ApiState>, job_id: &str) -> Result<Response<Body>, ApiError> {
	let caller = caller_from_request(&req)?;
	let ctx = gateway_jobs::CallerContext { user_id: caller.user_id, is_admin: caller.is_admin };
	let job = state.jobs.get_job(job_id, &ctx).map_err(ApiError::from)?;
	let actions = state.jobs.allowed_actions(&job, &ctx);
	respond(job, actions)
}

pub async fn cancel_job(req: Request<Body>, state: Arc<ApiState>, job_id: &str) -> Result<Response<Body>, ApiError> {
	let caller = caller_from_request(&req)?;
	let ctx = gateway_jobs::CallerContext { user_id: caller.user_id, is_admin: caller.is_admin };
	let job = state.jobs.cancel_job(job_id, &ctx).map_err(ApiError::from)?;
	let actions = state.jobs.allowed_actions(&job, &ctx);
	respond(job, actions)
}

pub async fn retry_job(req: Request<Body>, state: Arc<ApiState>, job_id: &str) -> Result<Response<Body>, ApiError> {
	let caller = caller_from_request(&req)?;
	let ctx = gateway_jobs::CallerContext { user_id: caller.user_id, is_admin: caller.is_admin };
	let job = state.jobs.retry_job(job_id, &ctx).map_err(ApiError::from)?;
	let actions = state.jobs.allowed_actions(&job, &ctx);
	respond(job, actions)
}

pub async fn delete_job(req: Request<Body>, state: Arc<ApiState>, job_id: &str) -> Result<Response<Body>, ApiError> {
	let caller = caller_from_request(&req)?;
	let ctx = gateway_jobs::CallerContext { user_id: caller.user_id, is_admin: caller.is_admin };
	state.jobs.delete_job(job_id, &ctx).map_err(ApiError::from)?;
	Ok(no_content_response())
}

pub async fn list_jobs(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let caller = caller_from_request(&req)?;
	let ctx = gateway_jobs::CallerContext { user_id: caller.user_id, is_admin: caller.is_admin };
	let params = query_params(&req);

	let status = match params.get("status").map(String::as_str) {
		None => None,
		Some("pending") => Some(JobStatus::Pending),
		Some("running") => Some(JobStatus::Running),
		Some("completed") => Some(JobStatus::Completed),
		Some("partial") => Some(JobStatus::Partial),
		Some("failed") => Some(JobStatus::Failed),
		Some("cancelled") => Some(JobStatus::Cancelled),
		Some(other) => {
			return Err(ApiError::from(gateway_util::error::Error::validation(format!(
				"unknown job status {}",
				other
			))))
		}
	};

	let filter = JobFilter {
		user_id: None,
		task_type: params.get("taskType").cloned(),
		status,
	};
	let jobs = state.jobs.list_jobs(&ctx, filter).map_err(ApiError::from)?;

	#[derive(Serialize)]
	#[serde(rename_all = "camelCase")]
	struct Item {
		#[serde(flatten)]
		job: JobRecord,
		allowed_actions: AllowedActions,
	}

	let items: Vec<Item> = jobs
		.into_iter()
		.map(|job| {
			let actions = state.jobs.allowed_actions(&job, &ctx);
			Item { job, allowed_actions: actions }
		})
		.collect();

	json_ok_response(&serde_json::json!({ "jobs": items }))
}
