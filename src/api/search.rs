//! `GET /search`: the read side of the VFS search index.
//!
//! Permission resolution that decides which mounts a caller may search
//! lives outside this process; this handler trusts an optional
//! `mountIds` allow-list forwarded by that layer and falls back to
//! every mount the facade knows about.

use std::sync::Arc;

use hyper::{Body, Request, Response};
use serde::Serialize;

use gateway_store::model::{SearchIndexEntry, SearchQuery, SearchScope};
use gateway_util::error::Error;

use crate::error::ApiError;
use crate::helpers::{json_ok_response, query_params};
use crate::state::ApiState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
	results: Vec<SearchIndexEntry>,
	total: Option<u64>,
	has_more: bool,
	next_cursor: Option<String>,
	index_ready: bool,
	skipped_mounts: Vec<String>,
	index_not_ready_mount_ids: Vec<String>,
	path_restricted: bool,
}

pub async fn search(req: Request<Body>, state: Arc<ApiState>) -> Result<Response<Body>, ApiError> {
	let params = query_params(&req);

	let query = params
		.get("query")
		.cloned()
		.ok_or_else(|| ApiError::from(Error::validation("query parameter is required")))?;

	let scope = match params.get("scope").map(String::as_str) {
		Some("mount") => SearchScope::Mount,
		Some("directory") => SearchScope::Directory,
		Some("global") | None => SearchScope::Global,
		Some(other) => {
			return Err(ApiError::from(Error::validation(format!("unknown scope {}", other))))
		}
	};

	let mount_id = params.get("mountId").cloned();
	if matches!(scope, SearchScope::Mount | SearchScope::Directory) && mount_id.is_none() {
		return Err(ApiError::from(Error::validation("mountId is required for this scope")));
	}

	let path_prefix = params.get("path").cloned();
	let path_restricted = path_prefix.is_some();

	let limit = params
		.get("limit")
		.and_then(|v| v.parse::<usize>().ok())
		.unwrap_or(50);
	let cursor = params.get("cursor").cloned();

	let allowed_mount_ids = match params.get("mountIds") {
		Some(csv) => csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
		None => state.facade.mount_ids(),
	};

	let results = state
		.index
		.search(&SearchQuery {
			query,
			allowed_mount_ids,
			scope,
			mount_id,
			path_prefix,
			limit,
			cursor,
		})
		.map_err(ApiError::from)?;

	json_ok_response(&SearchResponse {
		results: results.results,
		total: results.total,
		has_more: results.has_more,
		next_cursor: results.next_cursor,
		index_ready: results.index_ready,
		skipped_mounts: results.skipped_mounts,
		index_not_ready_mount_ids: results.index_not_ready_mount_ids,
		path_restricted,
	})
}
