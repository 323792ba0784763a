//! Small helpers shared by every handler: JSON (de)serialization and
//! query-string parsing.

use std::collections::HashMap;

use hyper::{Body, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ApiError;

pub fn json_ok_response<T: Serialize>(body: &T) -> Result<Response<Body>, ApiError> {
	json_response(StatusCode::OK, body)
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Body>, ApiError> {
	let bytes = serde_json::to_vec(body)?;
	Ok(Response::builder()
		.status(status)
		.header("content-type", "application/json")
		.body(Body::from(bytes))
		.unwrap())
}

pub fn no_content_response() -> Response<Body> {
	Response::builder()
		.status(StatusCode::NO_CONTENT)
		.body(Body::empty())
		.unwrap()
}

pub async fn parse_json_body<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ApiError> {
	let bytes = hyper::body::to_bytes(req.into_body()).await?;
	if bytes.is_empty() {
		return serde_json::from_slice(b"{}").map_err(ApiError::from);
	}
	serde_json::from_slice(&bytes).map_err(ApiError::from)
}

pub fn query_params(req: &Request<Body>) -> HashMap<String, String> {
	req.uri()
		.query()
		.map(|q| {
			form_urlencoded::parse(q.as_bytes())
				.into_owned()
				.collect::<HashMap<String, String>>()
		})
		.unwrap_or_default()
}

/// Parses a `Content-Range: bytes <start>-<end>/<total|*>` request
/// header (RFC 9110 §14.4) — distinct from the `Range` response-side
/// format the `http-range` crate targets, so this narrow grammar is
/// hand-rolled rather than pulling in a second header-parsing crate.
pub struct ContentRange {
	pub byte_start: u64,
	pub byte_end: u64,
	pub total: Option<u64>,
}

pub fn parse_content_range(req: &Request<Body>) -> Result<ContentRange, ApiError> {
	let header = req
		.headers()
		.get("content-range")
		.and_then(|v| v.to_str().ok())
		.ok_or(ApiError::BadContentRange)?;

	let rest = header.strip_prefix("bytes ").ok_or(ApiError::BadContentRange)?;
	let (range, total) = rest.split_once('/').ok_or(ApiError::BadContentRange)?;
	let (start, end) = range.split_once('-').ok_or(ApiError::BadContentRange)?;

	let byte_start: u64 = start.parse().map_err(|_| ApiError::BadContentRange)?;
	let byte_end: u64 = end.parse().map_err(|_| ApiError::BadContentRange)?;
	if byte_end < byte_start {
		return Err(ApiError::BadContentRange);
	}
	let total = if total == "*" {
		None
	} else {
		Some(total.parse().map_err(|_| ApiError::BadContentRange)?)
	};

	Ok(ContentRange { byte_start, byte_end, total })
}
