//! The driver capability interface: one trait every backend
//! implements, dispatched by capability flag rather than by concrete
//! type, instead of matching on a backend enum at call sites.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;

use gateway_util::error::Error;

pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
	Reader,
	Writer,
	Proxy,
	Multipart,
	Atomic,
	Presigned,
}

/// A small bitset; six backends-worth of capability flags don't
/// warrant pulling in a bitflags crate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
	pub const fn empty() -> Self {
		Self(0)
	}

	pub const fn with(mut self, cap: Capability) -> Self {
		self.0 |= 1 << (cap as u8);
		self
	}

	pub fn has(&self, cap: Capability) -> bool {
		self.0 & (1 << (cap as u8)) != 0
	}

	pub fn from_caps(caps: &[Capability]) -> Self {
		let mut set = Self::empty();
		for c in caps {
			set = set.with(*c);
		}
		set
	}
}

#[derive(Debug, Clone)]
pub struct ItemStat {
	pub path: String,
	pub name: String,
	pub is_dir: bool,
	pub size: u64,
	pub content_type: Option<String>,
	pub etag: Option<String>,
	pub last_modified: u64,
}

pub struct DownloadDescriptor {
	pub size: u64,
	pub content_type: Option<String>,
	pub etag: Option<String>,
	pub last_modified: u64,
	pub supports_range: bool,
	pub stream: ByteStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverUploadStrategy {
	PerPartUrl,
	SingleSession,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrl {
	pub part_no: u32,
	pub url: String,
	pub expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct InitializeRequest {
	pub fs_path: String,
	pub file_name: String,
	pub file_size: u64,
	pub mime_type: Option<String>,
	pub requested_part_size: Option<u64>,
	pub multipart_concurrency: u32,
	pub url_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct InitializeResult {
	pub strategy: DriverUploadStrategy,
	pub provider_upload_id: Option<String>,
	pub part_size: u64,
	pub total_parts: u32,
	pub presigned_urls: Vec<PartUrl>,
	pub upload_url: Option<String>,
	pub next_expected_range: Option<String>,
	pub provider_meta: Value,
}

#[derive(Debug, Clone)]
pub struct SignRequest {
	pub provider_upload_id: Option<String>,
	pub provider_meta: Value,
	pub part_numbers: Vec<u32>,
	pub total_parts: u32,
	pub max_parts_per_request: u32,
	pub url_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SignResult {
	pub presigned_urls: Vec<PartUrl>,
	pub expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct RemotePart {
	pub part_number: u32,
	pub size: u64,
	pub etag: Option<String>,
	pub last_modified: Option<u64>,
	/// Per-part backend metadata as recorded on the part ledger
	/// (`UploadPart.provider_meta`). Carried through so manifest-building
	/// drivers (Telegram) can emit `message_id`/`chat_id`/`file_unique_id`
	/// per part instead of only the generic fields above.
	pub provider_meta: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPartsResult {
	pub parts: Vec<RemotePart>,
	pub upload_not_found: bool,
}

#[derive(Debug, Clone)]
pub struct CompletedPart {
	pub part_number: u32,
	pub etag: String,
}

#[derive(Debug, Clone)]
pub struct CompleteRequest {
	pub provider_upload_id: Option<String>,
	pub provider_meta: Value,
	pub parts: Option<Vec<CompletedPart>>,
}

#[derive(Debug, Clone)]
pub struct CompleteResult {
	pub storage_path: String,
	pub public_url: Option<String>,
	pub etag: Option<String>,
	pub content_type: Option<String>,
	/// Set by drivers that materialize a `content_ref` manifest instead
	/// of a single backend object (e.g. Telegram).
	pub manifest: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct AbortRequest {
	pub provider_upload_id: Option<String>,
	pub provider_meta: Value,
}

/// Result of handing one raw chunk straight to a `single_session`
/// driver — the coordinator owns the idempotency protocol and the
/// parts ledger; the driver only performs the one send.
#[derive(Debug, Clone)]
pub struct PartUploadResult {
	pub provider_part_id: String,
	pub provider_meta: Value,
}

/// Error shape a driver reports back to the coordinator/facade; it is
/// always collapsed into a [`gateway_util::Error`] before crossing the
/// crate boundary, `kind()` and `retryable()` already reflect §7.
pub type DriverError = Error;

fn unsupported(op: &str) -> Error {
	Error::Upstream(format!("operation {} is not supported by this driver", op))
}

#[async_trait]
pub trait Driver: Send + Sync {
	fn capabilities(&self) -> CapabilitySet;
	fn storage_config_id(&self) -> &str;

	async fn exists(&self, path: &str) -> Result<bool, Error>;
	async fn stat(&self, path: &str) -> Result<ItemStat, Error>;
	async fn list_directory(&self, path: &str) -> Result<Vec<ItemStat>, Error>;
	async fn download_file(&self, path: &str) -> Result<DownloadDescriptor, Error>;

	async fn create_directory(&self, _path: &str) -> Result<(), Error> {
		Err(unsupported("createDirectory"))
	}

	async fn upload_file(
		&self,
		_path: &str,
		_content_type: Option<&str>,
		_data: ByteStream,
	) -> Result<ItemStat, Error> {
		Err(unsupported("uploadFile"))
	}

	async fn update_file(
		&self,
		_path: &str,
		_content_type: Option<&str>,
		_data: ByteStream,
	) -> Result<ItemStat, Error> {
		Err(unsupported("updateFile"))
	}

	async fn rename_item(&self, _from: &str, _to: &str) -> Result<(), Error> {
		Err(unsupported("renameItem"))
	}

	async fn copy_item(&self, _from: &str, _to: &str) -> Result<(), Error> {
		Err(unsupported("copyItem"))
	}

	async fn batch_remove_items(&self, _paths: &[String]) -> Result<(), Error> {
		Err(unsupported("batchRemoveItems"))
	}

	async fn initialize(&self, _req: InitializeRequest) -> Result<InitializeResult, Error> {
		Err(unsupported("initialize"))
	}

	async fn sign(&self, _req: SignRequest) -> Result<SignResult, Error> {
		Err(unsupported("sign"))
	}

	async fn list_parts(
		&self,
		_provider_upload_id: Option<&str>,
		_provider_meta: &Value,
	) -> Result<ListPartsResult, Error> {
		Err(unsupported("listParts"))
	}

	async fn complete(&self, _req: CompleteRequest) -> Result<CompleteResult, Error> {
		Err(unsupported("complete"))
	}

	async fn abort(&self, _req: AbortRequest) -> Result<(), Error> {
		Err(unsupported("abort"))
	}

	/// Direct chunk ingestion for `single_session` drivers. Called at
	/// most once per `(part_no, byte_start, byte_end)` by the
	/// coordinator's idempotency protocol.
	async fn upload_part_direct(
		&self,
		_provider_meta: &Value,
		_part_no: u32,
		_byte_start: u64,
		_byte_end: u64,
		_data: ByteStream,
	) -> Result<PartUploadResult, Error> {
		Err(unsupported("uploadPartDirect"))
	}

	/// Builds the driver-specific manifest and writes the final VFS
	/// file node at Complete time for `single_session` drivers.
	async fn finalize_manifest(
		&self,
		_fs_path: &str,
		_provider_meta: &Value,
		_parts: Vec<RemotePart>,
	) -> Result<CompleteResult, Error> {
		Err(unsupported("finalizeManifest"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn capability_set_tracks_membership() {
		let set = CapabilitySet::from_caps(&[Capability::Reader, Capability::Multipart]);
		assert!(set.has(Capability::Reader));
		assert!(set.has(Capability::Multipart));
		assert!(!set.has(Capability::Writer));
	}
}
