//! Maps the core error taxonomy onto HTTP status codes and a small
//! JSON error body.

use err_derive::Error as ErrDerive;
use hyper::{Body, Response, StatusCode};
use serde::Serialize;

#[derive(Debug, ErrDerive)]
pub enum ApiError {
	#[error(display = "{}", _0)]
	Core(gateway_util::error::Error),

	#[error(display = "malformed request body: {}", _0)]
	BadBody(String),

	#[error(display = "missing or malformed Content-Range header")]
	BadContentRange,

	#[error(display = "caller identity is required")]
	MissingCaller,

	#[error(display = "no route matches {} {}", _0, _1)]
	NotRouted(String, String),

	#[error(display = "internal error: {}", _0)]
	Hyper(String),
}

impl From<gateway_util::error::Error> for ApiError {
	fn from(e: gateway_util::error::Error) -> Self {
		ApiError::Core(e)
	}
}

impl From<hyper::Error> for ApiError {
	fn from(e: hyper::Error) -> Self {
		ApiError::Hyper(e.to_string())
	}
}

impl From<serde_json::Error> for ApiError {
	fn from(e: serde_json::Error) -> Self {
		ApiError::BadBody(e.to_string())
	}
}

impl ApiError {
	fn status(&self) -> StatusCode {
		match self {
			ApiError::Core(e) => match e.kind() {
				"Validation" => StatusCode::BAD_REQUEST,
				"NotFound" => StatusCode::NOT_FOUND,
				"Conflict" => StatusCode::CONFLICT,
				"Authorization" => StatusCode::FORBIDDEN,
				"Upstream" => StatusCode::BAD_GATEWAY,
				"Expired" => StatusCode::GONE,
				"Cancelled" => StatusCode::CONFLICT,
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			},
			ApiError::BadBody(_) | ApiError::BadContentRange => StatusCode::BAD_REQUEST,
			ApiError::MissingCaller => StatusCode::UNAUTHORIZED,
			ApiError::NotRouted(_, _) => StatusCode::NOT_FOUND,
			ApiError::Hyper(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn into_response(self) -> Response<Body> {
		#[derive(Serialize)]
		struct Body_ {
			error: String,
		}
		let status = self.status();
		let payload = Body_ { error: self.to_string() };
		let bytes = serde_json::to_vec(&payload).unwrap_or_else(|_| b"{\"error\":\"internal error\"}".to_vec());
		Response::builder()
			.status(status)
			.header("content-type", "application/json")
			.body(Body::from(bytes))
			.unwrap_or_else(|_| Response::new(Body::empty()))
	}
}
