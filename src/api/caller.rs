//! Resolves the calling identity for a request. The gateway sits behind
//! an authenticating reverse proxy in production the same way the
//! teacher's admin API expects a bearer token to already be validated
//! upstream — so this trusts two forwarded headers rather than
//! re-implementing session/token verification.

use hyper::{Body, Request};

use gateway_jobs::CallerContext;

use crate::error::ApiError;

pub fn caller_from_request(req: &Request<Body>) -> Result<CallerContext, ApiError> {
	let user_id = req
		.headers()
		.get("x-user-id")
		.and_then(|v| v.to_str().ok())
		.filter(|v| !v.is_empty())
		.ok_or(ApiError::MissingCaller)?
		.to_string();
	let is_admin = req
		.headers()
		.get("x-user-type")
		.and_then(|v| v.to_str().ok())
		.map(|v| v.eq_ignore_ascii_case("admin"))
		.unwrap_or(false);
	Ok(CallerContext { user_id, is_admin })
}
