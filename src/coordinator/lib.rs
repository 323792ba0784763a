//! Upload coordinator: the driver-agnostic façade over the session
//! store and the per-backend multipart drivers. Its own intelligence
//! is limited to three things: fingerprint recovery, policy
//! normalization, and the expiry reaper — everything else is
//! delegation.

#[macro_use]
extern crate tracing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use gateway_drivers::capability::{
	AbortRequest as DriverAbortRequest, CompleteRequest as DriverCompleteRequest,
	CompletedPart as DriverCompletedPart, DriverUploadStrategy, InitializeRequest as DriverInitRequest,
	RemotePart as DriverRemotePart, SignRequest as DriverSignRequest,
};
use gateway_drivers::Driver;
use gateway_store::model::{
	PartStatus, SessionFilter, SessionPatch, SessionStatus, UploadPart, UploadSession,
	UploadStrategy,
};
use gateway_store::SessionStore;
use gateway_util::background::{CancellationToken, Worker, WorkerState};
use gateway_util::error::Error;
use gateway_util::fingerprint::{self, FingerprintInput};
use gateway_util::time::now_msec;

pub const DEFAULT_URL_TTL_SECONDS: u64 = 15 * 60;
pub const DEFAULT_MULTIPART_CONCURRENCY: u32 = 8;
const REAPER_INTERVAL_MSEC: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
	pub refresh_policy: &'static str,
	pub signing_mode: &'static str,
	pub parts_ledger_policy: &'static str,
	pub max_parts_per_request: u32,
	pub url_ttl_seconds: Option<u64>,
	pub retry_policy: RetryPolicySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicySummary {
	pub max_attempts: u32,
}

fn policy_for(strategy: UploadStrategy, max_parts_per_request: u32, url_ttl_seconds: Option<u64>) -> Policy {
	Policy {
		refresh_policy: "server_decides",
		signing_mode: match strategy {
			UploadStrategy::PerPartUrl => "batched",
			UploadStrategy::SingleSession => "single_session",
		},
		parts_ledger_policy: match strategy {
			UploadStrategy::PerPartUrl => "server_can_list",
			UploadStrategy::SingleSession => "server_records",
		},
		max_parts_per_request,
		url_ttl_seconds,
		retry_policy: RetryPolicySummary { max_attempts: 3 },
	}
}

pub struct InitializeUploadRequest {
	pub owner_user_id: String,
	pub storage_type: String,
	pub storage_config_id: String,
	pub mount_id: String,
	pub fs_path: String,
	pub file_name: String,
	pub file_size: u64,
	pub mime_type: Option<String>,
}

pub struct InitializeUploadResponse {
	pub upload_id: String,
	pub strategy: UploadStrategy,
	pub part_size: u64,
	pub total_parts: u32,
	pub presigned_urls: Vec<gateway_drivers::capability::PartUrl>,
	pub upload_url: Option<String>,
	pub policy: Policy,
	pub recovered: bool,
}

pub struct SignUploadRequest {
	pub upload_id: String,
	pub part_numbers: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUploadResponse {
	pub presigned_urls: Vec<gateway_drivers::capability::PartUrl>,
	pub expires_in: u64,
	pub part_size: u64,
	pub total_parts: u32,
	pub policy: Policy,
}

pub struct ListPartsResponse {
	pub parts: Vec<PartSummary>,
	pub upload_not_found: bool,
	pub policy: Policy,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartSummary {
	pub part_number: u32,
	pub size: u64,
	pub etag: Option<String>,
}

pub struct CompleteUploadRequest {
	pub upload_id: String,
	pub parts: Option<Vec<DriverCompletedPart>>,
}

pub struct CompleteUploadResponse {
	pub storage_path: String,
	pub public_url: Option<String>,
	pub etag: Option<String>,
	pub content_type: Option<String>,
	pub manifest: Option<serde_json::Value>,
	pub mount_id: String,
	pub fs_path: String,
	pub file_size: u64,
}

/// Upload-coordinator façade over the session store and the
/// per-backend multipart drivers. Holds one driver per
/// `storage_config_id`; the caller is responsible for wiring drivers up
/// from configuration at startup.
pub struct UploadCoordinator {
	sessions: Arc<SessionStore>,
	drivers: HashMap<String, Arc<dyn Driver>>,
	default_url_ttl_seconds: u64,
	default_multipart_concurrency: u32,
	session_expiry_seconds: u64,
}

impl UploadCoordinator {
	pub fn new(
		sessions: Arc<SessionStore>,
		drivers: HashMap<String, Arc<dyn Driver>>,
		default_url_ttl_seconds: u64,
		default_multipart_concurrency: u32,
		session_expiry_seconds: u64,
	) -> Self {
		Self {
			sessions,
			drivers,
			default_url_ttl_seconds,
			default_multipart_concurrency,
			session_expiry_seconds,
		}
	}

	fn driver_for(&self, storage_config_id: &str) -> Result<&Arc<dyn Driver>, Error> {
		self.drivers
			.get(storage_config_id)
			.ok_or_else(|| Error::validation(format!("unknown storage_config_id {}", storage_config_id)))
	}

	pub async fn initialize(&self, req: InitializeUploadRequest) -> Result<InitializeUploadResponse, Error> {
		let fp = fingerprint::compute(&FingerprintInput {
			user_id: &req.owner_user_id,
			storage_config_id: &req.storage_config_id,
			mount_id: &req.mount_id,
			fs_path: &req.fs_path,
			file_name: &req.file_name,
			file_size: req.file_size,
		});

		if let Some(existing) = self.sessions.find_active_by_fingerprint(&fp.0)? {
			if existing.owner_user_id == req.owner_user_id {
				let max_parts = existing
					.provider_meta
					.get("maxPartsPerRequest")
					.and_then(|v| v.as_u64())
					.unwrap_or(self.default_multipart_concurrency as u64) as u32;
				return Ok(InitializeUploadResponse {
					upload_id: existing.id.clone(),
					strategy: existing.strategy,
					part_size: existing.part_size,
					total_parts: existing.total_parts,
					presigned_urls: vec![],
					upload_url: single_session_upload_url(&existing),
					policy: policy_for(existing.strategy, max_parts, Some(self.default_url_ttl_seconds)),
					recovered: true,
				});
			}
		}

		let driver = self.driver_for(&req.storage_config_id)?;
		let id = Uuid::new_v4().to_string();
		let multipart_concurrency = self.default_multipart_concurrency;

		let init = driver
			.initialize(DriverInitRequest {
				fs_path: req.fs_path.clone(),
				file_name: req.file_name.clone(),
				file_size: req.file_size,
				mime_type: req.mime_type.clone(),
				requested_part_size: None,
				multipart_concurrency,
				url_ttl_seconds: self.default_url_ttl_seconds,
			})
			.await?;

		let strategy = match init.strategy {
			DriverUploadStrategy::PerPartUrl => UploadStrategy::PerPartUrl,
			DriverUploadStrategy::SingleSession => UploadStrategy::SingleSession,
		};

		let now = now_msec();
		let session = UploadSession {
			id: id.clone(),
			owner_user_id: req.owner_user_id,
			storage_type: req.storage_type,
			storage_config_id: req.storage_config_id,
			mount_id: req.mount_id,
			fs_path: req.fs_path,
			file_name: req.file_name,
			file_size: req.file_size,
			mime_type: req.mime_type,
			strategy,
			part_size: init.part_size,
			total_parts: init.total_parts,
			bytes_uploaded: 0,
			uploaded_parts: 0,
			next_expected_range: init.next_expected_range.clone(),
			provider_upload_id: init.provider_upload_id,
			provider_meta: init.provider_meta,
			status: SessionStatus::Initiated,
			error_message: None,
			fingerprint_algo: fingerprint::FINGERPRINT_ALGO.to_string(),
			fingerprint_value: fp.0,
			created_at: now,
			updated_at: now,
			expires_at: now + self.session_expiry_seconds * 1000,
		};
		self.sessions.create_session(session.clone())?;

		let max_parts_per_request = multipart_concurrency.min(1000).max(1);
		Ok(InitializeUploadResponse {
			upload_id: id,
			strategy,
			part_size: init.part_size,
			total_parts: init.total_parts,
			presigned_urls: init.presigned_urls,
			upload_url: single_session_upload_url(&session),
			policy: policy_for(strategy, max_parts_per_request, Some(self.default_url_ttl_seconds)),
			recovered: false,
		})
	}

	pub async fn sign(&self, req: SignUploadRequest) -> Result<SignUploadResponse, Error> {
		let session = self.sessions.find_session(&req.upload_id)?;
		if session.strategy != UploadStrategy::PerPartUrl {
			return Err(Error::validation("sign is not applicable to single_session uploads"));
		}
		if session.status.is_terminal() {
			return Err(Error::validation("upload session is no longer active"));
		}
		let driver = self.driver_for(&session.storage_config_id)?;
		let max_parts_per_request = session
			.provider_meta
			.get("maxPartsPerRequest")
			.and_then(|v| v.as_u64())
			.unwrap_or(self.default_multipart_concurrency as u64) as u32;

		let result = driver
			.sign(DriverSignRequest {
				provider_upload_id: session.provider_upload_id.clone(),
				provider_meta: session.provider_meta.clone(),
				part_numbers: req.part_numbers,
				total_parts: session.total_parts,
				max_parts_per_request,
				url_ttl_seconds: self.default_url_ttl_seconds,
			})
			.await?;

		let now = now_msec();
		self.sessions.update_session(
			&req.upload_id,
			SessionPatch {
				status: if session.status == SessionStatus::Initiated {
					Some(SessionStatus::InProgress)
				} else {
					None
				},
				expires_at: Some(now + result.expires_in * 1000),
				..Default::default()
			},
		)?;

		Ok(SignUploadResponse {
			presigned_urls: result.presigned_urls,
			expires_in: result.expires_in,
			part_size: session.part_size,
			total_parts: session.total_parts,
			policy: policy_for(session.strategy, max_parts_per_request, Some(self.default_url_ttl_seconds)),
		})
	}

	pub async fn list_parts(&self, upload_id: &str) -> Result<ListPartsResponse, Error> {
		let session = self.sessions.find_session(upload_id)?;
		let max_parts_per_request = session
			.provider_meta
			.get("maxPartsPerRequest")
			.and_then(|v| v.as_u64())
			.unwrap_or(self.default_multipart_concurrency as u64) as u32;
		let policy = policy_for(session.strategy, max_parts_per_request, Some(self.default_url_ttl_seconds));

		match session.strategy {
			UploadStrategy::PerPartUrl => {
				let driver = self.driver_for(&session.storage_config_id)?;
				let result = driver
					.list_parts(session.provider_upload_id.as_deref(), &session.provider_meta)
					.await?;
				Ok(ListPartsResponse {
					parts: result
						.parts
						.into_iter()
						.map(|p| PartSummary {
							part_number: p.part_number,
							size: p.size,
							etag: p.etag,
						})
						.collect(),
					upload_not_found: result.upload_not_found,
					policy,
				})
			}
			UploadStrategy::SingleSession => {
				let parts = self.sessions.list_parts(upload_id)?;
				Ok(ListPartsResponse {
					parts: parts
						.into_iter()
						.filter(|p| p.status == PartStatus::Uploaded)
						.map(|p| PartSummary {
							part_number: p.part_no,
							size: p.size,
							etag: p.provider_part_id,
						})
						.collect(),
					upload_not_found: false,
					policy,
				})
			}
		}
	}

	pub async fn complete(&self, req: CompleteUploadRequest) -> Result<CompleteUploadResponse, Error> {
		let session = self.sessions.find_session(&req.upload_id)?;
		if session.status.is_terminal() {
			return Err(Error::validation("upload session is no longer active"));
		}
		let driver = self.driver_for(&session.storage_config_id)?;

		let (storage_path, public_url, etag, content_type, manifest, uploaded_parts) = match session.strategy {
			UploadStrategy::PerPartUrl => {
				let result = driver
					.complete(DriverCompleteRequest {
						provider_upload_id: session.provider_upload_id.clone(),
						provider_meta: session.provider_meta.clone(),
						parts: req.parts,
					})
					.await?;
				(
					result.storage_path,
					result.public_url,
					result.etag,
					result.content_type,
					result.manifest,
					session.total_parts,
				)
			}
			UploadStrategy::SingleSession => {
				let parts = self.sessions.list_parts(&req.upload_id)?;
				let uploaded: HashMap<u32, &UploadPart> = parts
					.iter()
					.filter(|p| p.status == PartStatus::Uploaded)
					.map(|p| (p.part_no, p))
					.collect();
				for part_no in 1..=session.total_parts {
					if !uploaded.contains_key(&part_no) {
						return Err(Error::validation(format!(
							"missing part {}/{}, resume required",
							part_no, session.total_parts
						)));
					}
				}
				let mut remote_parts: Vec<DriverRemotePart> = uploaded
					.values()
					.map(|p| DriverRemotePart {
						part_number: p.part_no,
						size: p.size,
						etag: p.provider_part_id.clone(),
						last_modified: Some(p.updated_at),
						provider_meta: p.provider_meta.clone(),
					})
					.collect();
				remote_parts.sort_by_key(|p| p.part_number);

				let result = driver
					.finalize_manifest(&session.fs_path, &session.provider_meta, remote_parts)
					.await?;
				(
					result.storage_path,
					result.public_url,
					result.etag,
					result.content_type,
					result.manifest,
					session.total_parts,
				)
			}
		};

		self.sessions.update_session(
			&req.upload_id,
			SessionPatch {
				status: Some(SessionStatus::Completed),
				bytes_uploaded: Some(session.file_size),
				uploaded_parts: Some(uploaded_parts),
				..Default::default()
			},
		)?;
		self.sessions.delete_parts_by_upload_id(&req.upload_id)?;

		Ok(CompleteUploadResponse {
			storage_path,
			public_url,
			etag,
			content_type,
			manifest,
			mount_id: session.mount_id,
			fs_path: session.fs_path,
			file_size: session.file_size,
		})
	}

	pub async fn abort(&self, upload_id: &str) -> Result<(), Error> {
		let session = self.sessions.find_session(upload_id)?;
		if session.status.is_terminal() {
			return Ok(());
		}
		if let Ok(driver) = self.driver_for(&session.storage_config_id) {
			if let Err(e) = driver
				.abort(DriverAbortRequest {
					provider_upload_id: session.provider_upload_id.clone(),
					provider_meta: session.provider_meta.clone(),
				})
				.await
			{
				warn!("best-effort abort of upload {} failed: {}", upload_id, e);
			}
		}
		self.sessions.update_session(
			upload_id,
			SessionPatch {
				status: Some(SessionStatus::Aborted),
				..Default::default()
			},
		)?;
		self.sessions.delete_parts_by_upload_id(upload_id)?;
		Ok(())
	}

	pub fn list_active(&self, filter: &SessionFilter) -> Result<Vec<UploadSession>, Error> {
		self.sessions.list_active_sessions(filter)
	}

	/// One pass of the expiry reaper: abort every active session past
	/// its `expires_at`.
	pub async fn reap_expired(&self) -> Result<u32, Error> {
		let now = now_msec();
		let mut reaped = 0;
		for session in self.sessions.list_active_sessions(&SessionFilter::default())? {
			if session.expires_at < now
				&& matches!(session.status, SessionStatus::Initiated | SessionStatus::InProgress)
			{
				if let Err(e) = self.abort(&session.id).await {
					error!("failed to reap expired session {}: {}", session.id, e);
				} else {
					reaped += 1;
				}
			}
		}
		Ok(reaped)
	}
}

fn single_session_upload_url(session: &UploadSession) -> Option<String> {
	match session.strategy {
		UploadStrategy::SingleSession => Some(format!("/api/fs/multipart/upload-chunk?upload_id={}", session.id)),
		UploadStrategy::PerPartUrl => None,
	}
}

/// Periodic session-expiry sweep, run as a background worker alongside
/// the index/dirty-apply jobs.
pub struct ExpiryReaperWorker {
	coordinator: Arc<UploadCoordinator>,
}

impl ExpiryReaperWorker {
	pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
		Self { coordinator }
	}
}

#[async_trait]
impl Worker for ExpiryReaperWorker {
	fn name(&self) -> String {
		"upload_session_reaper".into()
	}

	async fn work(&mut self, _must_exit: &mut watch::Receiver<bool>) -> Result<WorkerState, Error> {
		let reaped = self.coordinator.reap_expired().await?;
		if reaped > 0 {
			debug!("reaped {} expired upload sessions", reaped);
		}
		Ok(WorkerState::Idle)
	}

	async fn wait_for_work(&mut self) -> WorkerState {
		tokio::time::sleep(std::time::Duration::from_millis(REAPER_INTERVAL_MSEC)).await;
		WorkerState::Busy
	}
}

/// Per-chunk ingestion for `single_session` drivers (Telegram, spec
/// §4.5): owns the idempotency protocol and the parts ledger so the
/// driver itself only performs the one send.
pub struct ChunkUploader {
	sessions: Arc<SessionStore>,
	drivers: HashMap<String, Arc<dyn Driver>>,
	/// One lock per `(upload_id, part_no)`, handed out lazily. Guards the
	/// whole check-existing/mark-uploading/call-backend sequence so two
	/// concurrent chunk requests for the identical part serialize instead
	/// of racing past the "no existing part yet" check together.
	chunk_locks: tokio::sync::Mutex<HashMap<(String, u32), Arc<tokio::sync::Mutex<()>>>>,
}

pub struct ChunkRequest {
	pub upload_id: String,
	pub byte_start: u64,
	pub byte_end: u64,
	pub total: Option<u64>,
	pub data: gateway_drivers::capability::ByteStream,
}

impl ChunkUploader {
	pub fn new(sessions: Arc<SessionStore>, drivers: HashMap<String, Arc<dyn Driver>>) -> Self {
		Self { sessions, drivers, chunk_locks: tokio::sync::Mutex::new(HashMap::new()) }
	}

	async fn lock_for(&self, upload_id: &str, part_no: u32) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.chunk_locks.lock().await;
		locks
			.entry((upload_id.to_string(), part_no))
			.or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
			.clone()
	}

	pub async fn upload_chunk(&self, req: ChunkRequest) -> Result<UploadPart, Error> {
		let session = self.sessions.find_session(&req.upload_id)?;
		if session.strategy != UploadStrategy::SingleSession {
			return Err(Error::validation("upload-chunk only applies to single_session uploads"));
		}
		if session.status.is_terminal() {
			return Err(Error::validation("upload session is no longer active"));
		}

		let part_no = (req.byte_start / session.part_size) as u32 + 1;
		let cancel = CancellationToken::never();

		// Serializes the whole check-existing/mark-uploading/call-backend
		// sequence per (upload_id, part_no): without this, two concurrent
		// requests for the same chunk can both observe "no part yet" and
		// both call the backend.
		let part_lock = self.lock_for(&req.upload_id, part_no).await;
		let _guard = part_lock.lock().await;

		if let Some(existing) = self.sessions.get_part(&req.upload_id, part_no)? {
			let range_matches = existing.byte_start == req.byte_start && existing.byte_end == req.byte_end;
			if range_matches && existing.status == PartStatus::Uploaded {
				return Ok(existing);
			}
			if range_matches && existing.status == PartStatus::Uploading {
				if let Some(settled) = self.poll_until_uploaded(&req.upload_id, part_no, &cancel).await? {
					return Ok(settled);
				}
				// fell through: still not settled after polling, re-attempt below
			}
		}

		self.sessions.upsert_part(UploadPart {
			upload_id: req.upload_id.clone(),
			part_no,
			byte_start: req.byte_start,
			byte_end: req.byte_end,
			size: req.byte_end - req.byte_start + 1,
			status: PartStatus::Uploading,
			provider_part_id: None,
			provider_meta: None,
			error_code: None,
			error_message: None,
			updated_at: now_msec(),
		})?;

		let driver = self
			.drivers
			.get(&session.storage_config_id)
			.ok_or_else(|| Error::validation(format!("unknown storage_config_id {}", session.storage_config_id)))?;

		match driver
			.upload_part_direct(&session.provider_meta, part_no, req.byte_start, req.byte_end, req.data)
			.await
		{
			Ok(uploaded) => {
				let part = UploadPart {
					upload_id: req.upload_id.clone(),
					part_no,
					byte_start: req.byte_start,
					byte_end: req.byte_end,
					size: req.byte_end - req.byte_start + 1,
					status: PartStatus::Uploaded,
					provider_part_id: Some(uploaded.provider_part_id),
					provider_meta: Some(uploaded.provider_meta),
					error_code: None,
					error_message: None,
					updated_at: now_msec(),
				};
				self.sessions.upsert_part(part.clone())?;
				let stats = self.sessions.get_uploaded_stats_by_upload_ids(&[req.upload_id.clone()])?;
				if let Some(stat) = stats.get(&req.upload_id) {
					self.sessions.update_session(
						&req.upload_id,
						SessionPatch {
							bytes_uploaded: Some(stat.bytes),
							uploaded_parts: Some(stat.parts),
							next_expected_range: Some(Some(format!("{}-", req.byte_end + 1))),
							status: Some(SessionStatus::InProgress),
							..Default::default()
						},
					)?;
				}
				Ok(part)
			}
			Err(e) => {
				self.sessions.upsert_part(UploadPart {
					upload_id: req.upload_id.clone(),
					part_no,
					byte_start: req.byte_start,
					byte_end: req.byte_end,
					size: req.byte_end - req.byte_start + 1,
					status: PartStatus::Error,
					provider_part_id: None,
					provider_meta: None,
					error_code: Some(e.kind().to_string()),
					error_message: Some(e.to_string()),
					updated_at: now_msec(),
				})?;
				Err(e)
			}
		}
	}

	async fn poll_until_uploaded(
		&self,
		upload_id: &str,
		part_no: u32,
		cancel: &CancellationToken,
	) -> Result<Option<UploadPart>, Error> {
		for _ in 0..24 {
			cancel.check()?;
			tokio::time::sleep(std::time::Duration::from_millis(500)).await;
			if let Some(part) = self.sessions.get_part(upload_id, part_no)? {
				if part.status == PartStatus::Uploaded {
					return Ok(Some(part));
				}
				if part.status == PartStatus::Error {
					break;
				}
			}
		}
		Ok(None)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use bytes::Bytes;
	use futures::stream::{self, StreamExt};
	use gateway_drivers::capability::{
		CapabilitySet, DownloadDescriptor, ItemStat, PartUploadResult,
	};

	#[test]
	fn policy_reflects_strategy() {
		let p = policy_for(UploadStrategy::PerPartUrl, 8, Some(900));
		assert_eq!(p.signing_mode, "batched");
		assert_eq!(p.parts_ledger_policy, "server_can_list");

		let p2 = policy_for(UploadStrategy::SingleSession, 1, None);
		assert_eq!(p2.signing_mode, "single_session");
		assert_eq!(p2.parts_ledger_policy, "server_records");
	}

	struct CountingDriver {
		calls: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl Driver for CountingDriver {
		fn capabilities(&self) -> CapabilitySet {
			CapabilitySet::empty()
		}
		fn storage_config_id(&self) -> &str {
			"cfg1"
		}
		async fn exists(&self, _path: &str) -> Result<bool, Error> {
			Ok(true)
		}
		async fn stat(&self, _path: &str) -> Result<ItemStat, Error> {
			Err(Error::Upstream("not needed in test".into()))
		}
		async fn list_directory(&self, _path: &str) -> Result<Vec<ItemStat>, Error> {
			Ok(vec![])
		}
		async fn download_file(&self, _path: &str) -> Result<DownloadDescriptor, Error> {
			Err(Error::Upstream("not needed in test".into()))
		}
		async fn upload_part_direct(
			&self,
			_provider_meta: &serde_json::Value,
			part_no: u32,
			byte_start: u64,
			byte_end: u64,
			data: gateway_drivers::capability::ByteStream,
		) -> Result<PartUploadResult, Error> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			// Gives the second concurrent call a chance to race in before
			// this one finishes, if the idempotency lock didn't hold it back.
			tokio::time::sleep(std::time::Duration::from_millis(50)).await;
			let _ = data;
			Ok(PartUploadResult {
				provider_part_id: format!("part-{}", part_no),
				provider_meta: json!({ "byte_start": byte_start, "byte_end": byte_end }),
			})
		}
	}

	fn single_session_record(upload_id: &str) -> UploadSession {
		UploadSession {
			id: upload_id.into(),
			owner_user_id: "user-a".into(),
			storage_type: "TELEGRAM".into(),
			storage_config_id: "cfg1".into(),
			mount_id: "mount1".into(),
			fs_path: "/a/b.bin".into(),
			file_name: "b.bin".into(),
			file_size: 30,
			mime_type: None,
			strategy: UploadStrategy::SingleSession,
			part_size: 10,
			total_parts: 3,
			bytes_uploaded: 0,
			uploaded_parts: 0,
			next_expected_range: Some("0-".into()),
			provider_upload_id: None,
			provider_meta: json!({}),
			status: SessionStatus::Initiated,
			error_message: None,
			fingerprint_algo: "blake2b-512".into(),
			fingerprint_value: "fp1".into(),
			created_at: 0,
			updated_at: 0,
			expires_at: u64::MAX,
		}
	}

	fn chunk_req(upload_id: &str) -> ChunkRequest {
		ChunkRequest {
			upload_id: upload_id.into(),
			byte_start: 0,
			byte_end: 9,
			total: Some(30),
			data: stream::once(async { Ok::<Bytes, Error>(Bytes::from_static(b"0123456789")) }).boxed(),
		}
	}

	#[tokio::test]
	async fn concurrent_chunk_uploads_call_backend_at_most_once() {
		let dir = mktemp::Temp::new_dir().unwrap();
		let sessions = Arc::new(SessionStore::open(dir.join("sessions.sled")).unwrap());
		sessions.create_session(single_session_record("u1")).unwrap();

		let calls = Arc::new(AtomicUsize::new(0));
		let mut drivers: HashMap<String, Arc<dyn Driver>> = HashMap::new();
		drivers.insert("cfg1".into(), Arc::new(CountingDriver { calls: calls.clone() }));
		let uploader = Arc::new(ChunkUploader::new(sessions, drivers));

		let (u1, u2) = (uploader.clone(), uploader.clone());
		let (r1, r2) = tokio::join!(
			tokio::spawn(async move { u1.upload_chunk(chunk_req("u1")).await }),
			tokio::spawn(async move { u2.upload_chunk(chunk_req("u1")).await }),
		);
		let p1 = r1.unwrap().unwrap();
		let p2 = r2.unwrap().unwrap();
		assert_eq!(p1.part_no, 1);
		assert_eq!(p2.part_no, 1);
		assert_eq!(calls.load(Ordering::SeqCst), 1, "backend must be called at most once for the same (session, partNo, range)");
	}
}
