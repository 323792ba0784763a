//! Telegram chat-file multipart driver.
//!
//! Telegram cannot store "one big file" the way an object store can,
//! so a file becomes an ordered run of message attachments; Complete
//! materializes a manifest describing that run. The idempotency
//! protocol around re-sent chunks and the parts ledger itself live in
//! the upload coordinator — this driver only performs the one send per
//! part and the one manifest build, which keeps it free of a
//! dependency on the session store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile};
use tokio::sync::Semaphore;

use gateway_util::error::Error;
use gateway_util::retry::{Attempt, RetryPolicy};
use gateway_util::background::CancellationToken;

use crate::capability::{
	AbortRequest, ByteStream, Capability, CapabilitySet, CompleteRequest, CompleteResult, Driver,
	DriverUploadStrategy, DownloadDescriptor, InitializeRequest, InitializeResult, ItemStat,
	ListPartsResult, PartUploadResult, RemotePart, SignRequest, SignResult,
};

pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_PART_SIZE: u64 = 100 * 1024 * 1024;
pub const MAX_PARTS: u32 = 10_000;
pub const DEFAULT_CONCURRENCY: usize = 2;

pub struct TelegramMultipartDriver {
	bot: Bot,
	storage_config_id: String,
	default_chat_id: String,
	semaphore: Arc<Semaphore>,
	retry: RetryPolicy,
}

impl TelegramMultipartDriver {
	pub fn new(bot: Bot, storage_config_id: String, default_chat_id: String, concurrency: usize) -> Self {
		Self {
			bot,
			storage_config_id,
			default_chat_id,
			semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
			retry: RetryPolicy::default(),
		}
	}

	fn part_size_for(file_size: u64, requested: Option<u64>) -> Result<(u64, u32), Error> {
		if file_size == 0 {
			return Err(Error::validation("cannot multipart-upload a zero-length file"));
		}
		let minimum_viable = (file_size + MAX_PARTS as u64 - 1) / MAX_PARTS as u64;
		let mut part_size = requested.unwrap_or(MIN_PART_SIZE).max(minimum_viable);
		part_size = part_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
		let total_parts = ((file_size + part_size - 1) / part_size) as u32;
		if total_parts > MAX_PARTS {
			return Err(Error::validation("file requires more than 10000 parts"));
		}
		Ok((part_size, total_parts.max(1)))
	}

	fn chat_id(&self, provider_meta: &serde_json::Value) -> ChatId {
		let raw = provider_meta
			.get("targetChatId")
			.and_then(|v| v.as_str())
			.unwrap_or(&self.default_chat_id);
		ChatId(raw.parse().unwrap_or(0))
	}
}

#[async_trait]
impl Driver for TelegramMultipartDriver {
	fn capabilities(&self) -> CapabilitySet {
		CapabilitySet::from_caps(&[Capability::Reader, Capability::Writer, Capability::Multipart, Capability::Proxy])
	}

	fn storage_config_id(&self) -> &str {
		&self.storage_config_id
	}

	async fn exists(&self, _path: &str) -> Result<bool, Error> {
		// The VFS layer tracks existence through indexed manifests; the
		// driver itself has no directory concept to query.
		Err(Error::Upstream("exists is resolved by the VFS index, not the Telegram driver".into()))
	}

	async fn stat(&self, _path: &str) -> Result<ItemStat, Error> {
		Err(Error::Upstream("stat is resolved by the VFS index, not the Telegram driver".into()))
	}

	async fn list_directory(&self, _path: &str) -> Result<Vec<ItemStat>, Error> {
		Err(Error::Upstream("Telegram has no native directory listing".into()))
	}

	async fn download_file(&self, path: &str) -> Result<DownloadDescriptor, Error> {
		let _ = path;
		Err(Error::Upstream(
			"download_file for Telegram manifests is handled by the FS facade's manifest reassembly path".into(),
		))
	}

	async fn initialize(&self, req: InitializeRequest) -> Result<InitializeResult, Error> {
		let (part_size, total_parts) = Self::part_size_for(req.file_size, req.requested_part_size)?;
		Ok(InitializeResult {
			strategy: DriverUploadStrategy::SingleSession,
			provider_upload_id: None,
			part_size,
			total_parts,
			presigned_urls: vec![],
			upload_url: None,
			next_expected_range: Some("0-".to_string()),
			provider_meta: json!({ "targetChatId": self.default_chat_id }),
		})
	}

	async fn list_parts(
		&self,
		_provider_upload_id: Option<&str>,
		_provider_meta: &serde_json::Value,
	) -> Result<ListPartsResult, Error> {
		// The coordinator is authoritative for parts in single_session
		// mode (`partsLedgerPolicy = server_records`); the backend has
		// no concept of "parts" to list.
		Ok(ListPartsResult::default())
	}

	async fn sign(&self, _req: SignRequest) -> Result<SignResult, Error> {
		Err(Error::Upstream("Telegram sessions are single_session; sign is not applicable".into()))
	}

	async fn upload_part_direct(
		&self,
		provider_meta: &serde_json::Value,
		part_no: u32,
		byte_start: u64,
		byte_end: u64,
		data: ByteStream,
	) -> Result<PartUploadResult, Error> {
		use futures::stream::StreamExt;
		let mut bytes = vec![];
		let mut data = data;
		while let Some(chunk) = data.next().await {
			bytes.extend_from_slice(&chunk?);
		}

		let chat_id = self.chat_id(provider_meta);
		let file_name = format!("part-{:06}.bin", part_no);
		let _permit = self.semaphore.clone().acquire_owned().await.map_err(|_| Error::Cancelled)?;
		let cancel = CancellationToken::never();

		let message = self
			.retry
			.run(&cancel, |_attempt| {
				let bot = self.bot.clone();
				let bytes = bytes.clone();
				let file_name = file_name.clone();
				async move {
					let file = InputFile::memory(bytes).file_name(file_name);
					match bot.send_document(chat_id, file).await {
						Ok(msg) => Attempt::Ok(msg),
						Err(teloxide::RequestError::RetryAfter(d)) => Attempt::RateLimited(Some(d)),
						Err(e) => Attempt::Failed(Error::Upstream(format!("sendDocument failed: {}", e))),
					}
				}
			})
			.await?;

		let document = message
			.document()
			.ok_or_else(|| Error::Upstream("sendDocument response carried no document".into()))?;

		Ok(PartUploadResult {
			provider_part_id: document.file.id.clone(),
			provider_meta: json!({
				"partNo": part_no,
				"size": byte_end - byte_start + 1,
				"file_id": document.file.id,
				"file_unique_id": document.file.unique_id,
				"message_id": message.id.0,
				"chat_id": chat_id.0.to_string(),
			}),
		})
	}

	async fn complete(&self, _req: CompleteRequest) -> Result<CompleteResult, Error> {
		Err(Error::Upstream(
			"Telegram sessions complete through finalize_manifest, not complete".into(),
		))
	}

	async fn finalize_manifest(
		&self,
		fs_path: &str,
		provider_meta: &serde_json::Value,
		parts: Vec<RemotePart>,
	) -> Result<CompleteResult, Error> {
		let chat_id = self.chat_id(provider_meta);
		let manifest_parts: Vec<_> = parts
			.iter()
			.map(|p| {
				let meta = p.provider_meta.as_ref();
				let get_str = |key: &str| meta.and_then(|m| m.get(key)).and_then(|v| v.as_str()).map(str::to_string);
				let get_i64 = |key: &str| meta.and_then(|m| m.get(key)).and_then(|v| v.as_i64());
				json!({
					"partNo": p.part_number,
					"size": p.size,
					"file_id": p.etag.clone().unwrap_or_default(),
					"file_unique_id": get_str("file_unique_id").unwrap_or_default(),
					"message_id": get_i64("message_id").unwrap_or_default(),
					"chat_id": get_str("chat_id").unwrap_or_else(|| chat_id.0.to_string()),
				})
			})
			.collect();
		let manifest = json!({
			"kind": "telegram_manifest_v1",
			"storage_type": "TELEGRAM",
			"target_chat_id": chat_id.0.to_string(),
			"parts": manifest_parts,
		});
		Ok(CompleteResult {
			storage_path: fs_path.to_string(),
			public_url: None,
			etag: None,
			content_type: None,
			manifest: Some(manifest),
		})
	}

	async fn abort(&self, _req: AbortRequest) -> Result<(), Error> {
		// No backend-side cleanup is possible: the sent messages stay in
		// the chat. Session/parts cleanup happens in the coordinator.
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn part_size_rejects_zero_length_file() {
		let err = TelegramMultipartDriver::part_size_for(0, None).unwrap_err();
		assert_eq!(err.kind(), "Validation");
	}

	#[test]
	fn part_size_defaults_within_chat_backend_bounds() {
		let (part_size, total_parts) =
			TelegramMultipartDriver::part_size_for(50 * 1024 * 1024, None).unwrap();
		assert!(part_size >= MIN_PART_SIZE && part_size <= MAX_PART_SIZE);
		assert_eq!(total_parts, 10);
	}

	#[test]
	fn part_size_grows_to_respect_max_parts() {
		let huge = MIN_PART_SIZE * (MAX_PARTS as u64) * 2;
		let (part_size, total_parts) = TelegramMultipartDriver::part_size_for(huge, None).unwrap();
		assert!(total_parts <= MAX_PARTS);
		assert!(part_size > MIN_PART_SIZE);
	}
}
