//! External interfaces: the HTTP edge over the multipart coordinator,
//! search index and job engine. The router here is a thin shape
//! contract only — real auth, TLS termination and the rest of the
//! gateway's HTTP surface (WebDAV, the directory listing cache, the
//! Vue UI) live upstream of this crate.

#[macro_use]
extern crate tracing;

pub mod caller;
pub mod error;
pub mod helpers;
pub mod jobs;
pub mod multipart;
pub mod search;
pub mod state;

use std::sync::Arc;

use hyper::{Body, Method, Request, Response};

use error::ApiError;
use state::ApiState;

/// Dispatches one HTTP request. Kept as a plain function (rather than
/// a `tower`/`hyper::service` type) so the gateway binary's
/// `make_service_fn` closure is the only place that needs to know
/// about `hyper`'s service traits.
pub async fn route(req: Request<Body>, state: Arc<ApiState>) -> Response<Body> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

	let result = dispatch(&method, &segments, req, state).await;
	match result {
		Ok(resp) => resp,
		Err(e) => {
			warn!("request {} {} failed: {}", method, path, e);
			e.into_response()
		}
	}
}

async fn dispatch(
	method: &Method,
	segments: &[&str],
	req: Request<Body>,
	state: Arc<ApiState>,
) -> Result<Response<Body>, ApiError> {
	match (method, segments) {
		(&Method::POST, ["multipart", "init"]) => multipart::init(req, state).await,
		(&Method::POST, ["multipart", "sign"]) => multipart::sign(req, state).await,
		(&Method::GET, ["multipart", "parts"]) => multipart::list_parts(req, state).await,
		(&Method::POST, ["multipart", "complete"]) => multipart::complete(req, state).await,
		(&Method::POST, ["multipart", "abort"]) => multipart::abort(req, state).await,
		(&Method::PUT, ["multipart", "upload-chunk"]) => multipart::upload_chunk(req, state).await,

		(&Method::GET, ["search"]) => search::search(req, state).await,

		(&Method::POST, ["jobs"]) => jobs::create_job(req, state).await,
		(&Method::GET, ["jobs"]) => jobs::list_jobs(req, state).await,
		(&Method::GET, ["jobs", id]) => jobs::get_job(req, state, id).await,
		(&Method::POST, ["jobs", id, "cancel"]) => jobs::cancel_job(req, state, id).await,
		(&Method::POST, ["jobs", id, "retry"]) => jobs::retry_job(req, state, id).await,
		(&Method::DELETE, ["jobs", id]) => jobs::delete_job(req, state, id).await,

		_ => Err(ApiError::NotRouted(method.to_string(), format!("/{}", segments.join("/")))),
	}
}
