//! The error taxonomy used across the gateway.
//!
//! Every fallible operation in the core returns `Result<T, Error>`. The
//! `kind()` of an error is what callers switch on (e.g. to decide the HTTP
//! status code at the edge); `retryable()` tells a caller whether it is
//! safe to retry the operation automatically.

use err_derive::Error as ErrDerive;

#[derive(Debug, ErrDerive)]
pub enum Error {
	/// Caller-supplied input violates a contract: malformed range, too
	/// many parts, zero-length file, wrong storage type, missing part
	/// at Complete, query shorter than the minimum length, etc.
	#[error(display = "Invalid request: {}", _0)]
	Validation(String),

	/// Target path, session or job does not exist.
	#[error(display = "Not found: {}", _0)]
	NotFound(String),

	/// Target already exists and the caller did not ask to overwrite it.
	#[error(display = "Conflict: {}", _0)]
	Conflict(String),

	/// Caller lacks permission for the path/job/action.
	#[error(display = "Not authorized: {}", _0)]
	Authorization(String),

	/// The backend returned a non-retryable error.
	#[error(display = "Upstream error: {}", _0)]
	Upstream(String),

	/// A signed URL or session is past its `expires_at`, or the backend
	/// reports the upload no longer exists (`NoSuchUpload`).
	#[error(display = "Expired: {}", _0)]
	Expired(String),

	/// Cooperative cancellation was observed.
	#[error(display = "Cancelled")]
	Cancelled,

	/// A store write failed (session ledger, search index, job record).
	#[error(display = "Infrastructure error: {}", _0)]
	Infrastructure(String),

	/// Catch-all for errors that don't need their own variant, e.g.
	/// bugs surfaced as `.expect()`-free internal failures.
	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	/// Whether the caller may safely retry the operation that produced
	/// this error. Only explicitly transient kinds are retryable; in
	/// particular `Upstream` is never retryable here — each driver's own
	/// bounded retry is the only place retries on backend calls happen.
	pub fn retryable(&self) -> bool {
		matches!(self, Error::Infrastructure(_))
	}

	pub fn kind(&self) -> &'static str {
		match self {
			Error::Validation(_) => "Validation",
			Error::NotFound(_) => "NotFound",
			Error::Conflict(_) => "Conflict",
			Error::Authorization(_) => "Authorization",
			Error::Upstream(_) => "Upstream",
			Error::Expired(_) => "Expired",
			Error::Cancelled => "Cancelled",
			Error::Infrastructure(_) => "Infrastructure",
			Error::Message(_) => "Message",
		}
	}

	pub fn validation(msg: impl Into<String>) -> Self {
		Error::Validation(msg.into())
	}
	pub fn not_found(msg: impl Into<String>) -> Self {
		Error::NotFound(msg.into())
	}
	pub fn upstream(msg: impl Into<String>) -> Self {
		Error::Upstream(msg.into())
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error::Infrastructure(format!("{}", e))
	}
}

impl From<sled::Error> for Error {
	fn from(e: sled::Error) -> Error {
		Error::Infrastructure(format!("sled: {}", e))
	}
}

impl From<rusqlite::Error> for Error {
	fn from(e: rusqlite::Error) -> Error {
		Error::Infrastructure(format!("sqlite: {}", e))
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Error {
		Error::Message(format!("json: {}", e))
	}
}

impl From<String> for Error {
	fn from(s: String) -> Error {
		Error::Message(s)
	}
}

impl From<&str> for Error {
	fn from(s: &str) -> Error {
		Error::Message(s.to_string())
	}
}

/// `.ok_or_message()` / `.err_context()` idiom for turning `Option`/`Result`
/// into a gateway `Error` with context.
pub trait OkOrMessage<T> {
	fn ok_or_message<M: Into<String>>(self, msg: M) -> Result<T, Error>;
}

impl<T> OkOrMessage<T> for Option<T> {
	fn ok_or_message<M: Into<String>>(self, msg: M) -> Result<T, Error> {
		self.ok_or_else(|| Error::Message(msg.into()))
	}
}

pub trait ErrContext<T> {
	fn err_context<M: Into<String>>(self, msg: M) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> ErrContext<T> for Result<T, E> {
	fn err_context<M: Into<String>>(self, msg: M) -> Result<T, Error> {
		self.map_err(|e| Error::Message(format!("{}: {}", msg.into(), e)))
	}
}
