//! `POST/GET /multipart/*`: the edge for the upload coordinator and
//! the raw chunk-forwarding endpoint the Telegram driver relies on.

use std::sync::Arc;

use futures::StreamExt;
use hyper::{Body, Request, Response};
use serde::{Deserialize, Serialize};

use gateway_coordinator::{
	ChunkRequest, CompleteUploadRequest, InitializeUploadRequest, ListPartsResponse, Policy,
	SignUploadRequest,
};
use gateway_drivers::capability::{CompletedPart, PartUrl};
use gateway_util::error::Error;

use crate::caller::caller_from_request;
use crate::error::ApiError;
use crate::helpers::{json_ok_response, parse_content_range, parse_json_body, query_params};
use crate::state::ApiState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitBody {
	storage_type: String,
	storage_config_id: String,
	mount_id: String,
	fs_path: String,
	file_name: String,
	file_size: u64,
	mime_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
	upload_id: String,
	strategy: &'static str,
	part_size: u64,
	total_parts: u32,
	presigned_urls: Vec<PartUrl>,
	upload_url: Option<String>,
	policy: Policy,
	recovered: bool,
}

pub async fn init(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let caller = caller_from_request(&req)?;
	let body: InitBody = parse_json_body(req).await?;
	let result = state
		.coordinator
		.initialize(InitializeUploadRequest {
			owner_user_id: caller.user_id,
			storage_type: body.storage_type,
			storage_config_id: body.storage_config_id,
			mount_id: body.mount_id,
			fs_path: body.fs_path,
			file_name: body.file_name,
			file_size: body.file_size,
			mime_type: body.mime_type,
		})
		.await
		.map_err(ApiError::from)?;

	json_ok_response(&InitResponse {
		upload_id: result.upload_id,
		strategy: match result.strategy {
			gateway_store::model::UploadStrategy::PerPartUrl => "per_part_url",
			gateway_store::model::UploadStrategy::SingleSession => "single_session",
		},
		part_size: result.part_size,
		total_parts: result.total_parts,
		presigned_urls: result.presigned_urls,
		upload_url: result.upload_url,
		policy: result.policy,
		recovered: result.recovered,
	})
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBody {
	upload_id: String,
	#[serde(default)]
	part_numbers: Vec<u32>,
}

pub async fn sign(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let body: SignBody = parse_json_body(req).await?;
	let result = state
		.coordinator
		.sign(SignUploadRequest {
			upload_id: body.upload_id,
			part_numbers: body.part_numbers,
		})
		.await
		.map_err(ApiError::from)?;
	json_ok_response(&result)
}

pub async fn list_parts(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let params = query_params(&req);
	let upload_id = params
		.get("upload_id")
		.ok_or_else(|| ApiError::from(Error::validation("upload_id query parameter is required")))?;
	let result = state.coordinator.list_parts(upload_id).await.map_err(ApiError::from)?;
	json_ok_response(&PartsResponse::from(result))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PartsResponse {
	parts: Vec<gateway_coordinator::PartSummary>,
	upload_not_found: bool,
	policy: Policy,
}

impl From<ListPartsResponse> for PartsResponse {
	fn from(r: ListPartsResponse) -> Self {
		Self {
			parts: r.parts,
			upload_not_found: r.upload_not_found,
			policy: r.policy,
		}
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletePartBody {
	part_number: u32,
	etag: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteBody {
	upload_id: String,
	#[serde(default)]
	parts: Option<Vec<CompletePartBody>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
	storage_path: String,
	public_url: Option<String>,
	etag: Option<String>,
	content_type: Option<String>,
}

pub async fn complete(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let body: CompleteBody = parse_json_body(req).await?;
	let result = state
		.coordinator
		.complete(CompleteUploadRequest {
			upload_id: body.upload_id,
			parts: body.parts.map(|parts| {
				parts
					.into_iter()
					.map(|p| CompletedPart { part_number: p.part_number, etag: p.etag })
					.collect()
			}),
		})
		.await
		.map_err(ApiError::from)?;

	state
		.facade
		.record_completed_upload(
			&result.mount_id,
			&result.fs_path,
			result.file_size,
			result.content_type.clone(),
			result.manifest.clone(),
		)
		.await
		.map_err(ApiError::from)?;

	json_ok_response(&CompleteResponse {
		storage_path: result.storage_path,
		public_url: result.public_url,
		etag: result.etag,
		content_type: result.content_type,
	})
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbortBody {
	upload_id: String,
}

pub async fn abort(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let body: AbortBody = parse_json_body(req).await?;
	state.coordinator.abort(&body.upload_id).await.map_err(ApiError::from)?;
	json_ok_response(&serde_json::json!({ "ok": true }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadChunkResponse {
	part_number: u32,
	size: u64,
	status: &'static str,
}

pub async fn upload_chunk(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let params = query_params(&req);
	let upload_id = params
		.get("upload_id")
		.ok_or_else(|| ApiError::from(Error::validation("upload_id query parameter is required")))?
		.clone();
	let range = parse_content_range(&req)?;

	let byte_start = range.byte_start;
	let byte_end = range.byte_end;
	let total = range.total;
	let body = req
		.into_body()
		.map(|chunk| chunk.map_err(|e| Error::Infrastructure(e.to_string())))
		.boxed();

	let part = state
		.chunk_uploader
		.upload_chunk(ChunkRequest {
			upload_id,
			byte_start,
			byte_end,
			total,
			data: body,
		})
		.await
		.map_err(ApiError::from)?;

	json_ok_response(&UploadChunkResponse {
		part_number: part.part_no,
		size: part.size,
		status: "uploaded",
	})
}
