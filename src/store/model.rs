//! Data model for the session/parts ledger and the search index store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStrategy {
	/// Client PUTs each part directly to the backend.
	PerPartUrl,
	/// Client PUTs each part to the gateway, which forwards it.
	SingleSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
	Initiated,
	InProgress,
	Completed,
	Aborted,
	Expired,
	Error,
}

impl SessionStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Expired
		)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
	pub id: String,
	pub owner_user_id: String,
	pub storage_type: String,
	pub storage_config_id: String,
	pub mount_id: String,
	pub fs_path: String,
	pub file_name: String,
	pub file_size: u64,
	pub mime_type: Option<String>,

	pub strategy: UploadStrategy,
	pub part_size: u64,
	pub total_parts: u32,
	pub bytes_uploaded: u64,
	pub uploaded_parts: u32,
	pub next_expected_range: Option<String>,

	pub provider_upload_id: Option<String>,
	pub provider_meta: serde_json::Value,

	pub status: SessionStatus,
	pub error_message: Option<String>,

	pub fingerprint_algo: String,
	pub fingerprint_value: String,

	pub created_at: u64,
	pub updated_at: u64,
	pub expires_at: u64,
}

/// A sparse set of field updates applied atomically to one session row.
/// `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
	pub status: Option<SessionStatus>,
	pub bytes_uploaded: Option<u64>,
	pub uploaded_parts: Option<u32>,
	pub next_expected_range: Option<Option<String>>,
	pub provider_upload_id: Option<Option<String>>,
	pub provider_meta: Option<serde_json::Value>,
	pub error_message: Option<Option<String>>,
	pub expires_at: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
	pub owner_user_id: Option<String>,
	pub storage_type: Option<String>,
	pub mount_id: Option<String>,
	pub fs_path_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartStatus {
	Pending,
	Uploading,
	Uploaded,
	Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPart {
	pub upload_id: String,
	pub part_no: u32,
	pub byte_start: u64,
	pub byte_end: u64,
	pub size: u64,
	pub status: PartStatus,
	pub provider_part_id: Option<String>,
	pub provider_meta: Option<serde_json::Value>,
	pub error_code: Option<String>,
	pub error_message: Option<String>,
	pub updated_at: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UploadedStats {
	pub bytes: u64,
	pub parts: u32,
}

// ---- Search index ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndexEntry {
	pub mount_id: String,
	pub fs_path: String,
	pub name: String,
	pub is_dir: bool,
	pub size: u64,
	pub modified_ms: u64,
	pub mimetype: Option<String>,
	pub index_run_id: Option<String>,
	pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirtyOp {
	Upsert,
	Delete,
}

impl DirtyOp {
	pub fn as_str(&self) -> &'static str {
		match self {
			DirtyOp::Upsert => "upsert",
			DirtyOp::Delete => "delete",
		}
	}
}

#[derive(Debug, Clone)]
pub struct DirtyQueueItem {
	pub mount_id: String,
	pub fs_path: String,
	pub op: DirtyOp,
	pub dedupe_key: String,
	pub enqueued_at: u64,
}

pub fn dirty_dedupe_key(mount_id: &str, fs_path: &str, op: DirtyOp) -> String {
	use std::collections::hash_map::DefaultHasher;
	use std::hash::{Hash, Hasher};
	let mut hasher = DefaultHasher::new();
	mount_id.hash(&mut hasher);
	fs_path.hash(&mut hasher);
	op.as_str().hash(&mut hasher);
	format!("{:016x}", hasher.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountIndexStatus {
	NotReady,
	Indexing,
	Ready,
	Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountIndexState {
	pub status: Option<MountIndexStatus>,
	pub last_run_id: Option<String>,
	pub last_indexed_at: Option<u64>,
	pub error_message: Option<String>,
	pub job_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
	pub query: String,
	pub allowed_mount_ids: Vec<String>,
	pub scope: SearchScope,
	pub mount_id: Option<String>,
	pub path_prefix: Option<String>,
	pub limit: usize,
	pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
	#[default]
	Global,
	Mount,
	Directory,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
	pub results: Vec<SearchIndexEntry>,
	pub total: Option<u64>,
	pub has_more: bool,
	pub next_cursor: Option<String>,
	pub index_ready: bool,
	/// Mounts omitted from a `scope = global` search because their
	/// index isn't `ready` yet.
	pub skipped_mounts: Vec<String>,
	/// The target mount(s) of a `scope = mount`/`directory` search that
	/// aren't `ready` — distinct from `skipped_mounts` because here the
	/// whole search came back empty, not just missing one contributor.
	pub index_not_ready_mount_ids: Vec<String>,
}
