//! S3-compatible multipart driver.
//!
//! The signing-window discipline here — presign a *small* batch, never
//! the whole upload, then top up on demand — is the one genuinely
//! novel piece of this driver; everything else is a thin translation
//! layer over `aws-sdk-s3`.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use futures::stream::StreamExt;
use serde_json::json;

use gateway_util::error::Error;
use gateway_util::time::now_msec;

use crate::cache::StatCache;
use crate::capability::{
	AbortRequest, ByteStream, Capability, CapabilitySet, CompleteRequest, CompleteResult,
	CompletedPart, Driver, DriverUploadStrategy, DownloadDescriptor, InitializeRequest,
	InitializeResult, ItemStat, ListPartsResult, PartUrl, RemotePart, SignRequest, SignResult,
};

pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
pub const MAX_PARTS: u32 = 10_000;
pub const MAX_OBJECT_SIZE: u64 = MAX_PART_SIZE * MAX_PARTS as u64;
const LIST_PARTS_PAGE_SIZE: i32 = 1000;
const LIST_PARTS_MAX_PAGES: u32 = 50;

pub struct S3MultipartDriver {
	client: Client,
	bucket: String,
	storage_config_id: String,
	stat_cache: StatCache,
}

impl S3MultipartDriver {
	pub fn new(client: Client, bucket: String, storage_config_id: String) -> Self {
		Self {
			client,
			bucket,
			storage_config_id,
			stat_cache: StatCache::default(),
		}
	}

	fn key_for(&self, fs_path: &str) -> String {
		fs_path.trim_start_matches('/').to_string()
	}

	fn part_size_for(file_size: u64, requested: Option<u64>) -> Result<(u64, u32), Error> {
		if file_size == 0 {
			return Err(Error::validation("cannot multipart-upload a zero-length file"));
		}
		if file_size > MAX_OBJECT_SIZE {
			return Err(Error::validation(format!(
				"file size {} exceeds the maximum object size {}",
				file_size, MAX_OBJECT_SIZE
			)));
		}

		let minimum_viable = (file_size + MAX_PARTS as u64 - 1) / MAX_PARTS as u64;
		let mut part_size = requested.unwrap_or(minimum_viable).max(minimum_viable);
		part_size = part_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);

		let total_parts = ((file_size + part_size - 1) / part_size) as u32;
		if total_parts > MAX_PARTS {
			return Err(Error::validation("file requires more than 10000 parts"));
		}
		Ok((part_size, total_parts.max(1)))
	}

	async fn presign_parts(
		&self,
		upload_id: &str,
		key: &str,
		part_numbers: impl Iterator<Item = u32>,
		ttl: Duration,
	) -> Result<Vec<PartUrl>, Error> {
		let expires_at = now_msec() + ttl.as_millis() as u64;
		let mut out = vec![];
		for part_no in part_numbers {
			let presigned = self
				.client
				.upload_part()
				.bucket(&self.bucket)
				.key(key)
				.upload_id(upload_id)
				.part_number(part_no as i32)
				.presigned(
					PresigningConfig::expires_in(ttl)
						.map_err(|e| Error::Infrastructure(e.to_string()))?,
				)
				.await
				.map_err(classify_s3_error)?;
			out.push(PartUrl {
				part_no,
				url: presigned.uri().to_string(),
				expires_at,
			});
		}
		Ok(out)
	}

	async fn list_remote_parts(
		&self,
		upload_id: &str,
		key: &str,
	) -> Result<ListPartsResult, Error> {
		let mut parts = vec![];
		let mut marker: Option<String> = None;
		for _ in 0..LIST_PARTS_MAX_PAGES {
			let mut req = self
				.client
				.list_parts()
				.bucket(&self.bucket)
				.key(key)
				.upload_id(upload_id)
				.max_parts(LIST_PARTS_PAGE_SIZE);
			if let Some(m) = &marker {
				req = req.part_number_marker(m);
			}
			let resp = match req.send().await {
				Ok(resp) => resp,
				Err(e) if is_no_such_upload(&e) => {
					return Ok(ListPartsResult {
						parts: vec![],
						upload_not_found: true,
					})
				}
				Err(e) => return Err(classify_s3_error(e)),
			};

			for p in resp.parts() {
				parts.push(RemotePart {
					part_number: p.part_number().unwrap_or_default() as u32,
					size: p.size().unwrap_or_default() as u64,
					etag: p.e_tag().map(|s| s.trim_matches('"').to_string()),
					last_modified: p.last_modified().map(|t| t.as_secs_f64() as u64 * 1000),
					provider_meta: None,
				});
			}

			if resp.is_truncated().unwrap_or(false) {
				marker = resp.next_part_number_marker().map(|s| s.to_string());
				if marker.is_none() {
					break;
				}
			} else {
				break;
			}
		}
		Ok(ListPartsResult {
			parts,
			upload_not_found: false,
		})
	}

	fn provider_meta(&self, key: &str, url_ttl_seconds: u64, max_parts_per_request: u32) -> serde_json::Value {
		json!({
			"bucket": self.bucket,
			"key": key,
			"urlTtlSeconds": url_ttl_seconds,
			"maxPartsPerRequest": max_parts_per_request,
		})
	}
}

#[async_trait]
impl Driver for S3MultipartDriver {
	fn capabilities(&self) -> CapabilitySet {
		CapabilitySet::from_caps(&[
			Capability::Reader,
			Capability::Writer,
			Capability::Multipart,
			Capability::Atomic,
			Capability::Presigned,
		])
	}

	fn storage_config_id(&self) -> &str {
		&self.storage_config_id
	}

	async fn exists(&self, path: &str) -> Result<bool, Error> {
		let key = self.key_for(path);
		match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
			Ok(_) => Ok(true),
			Err(e) if is_not_found(&e) => Ok(false),
			Err(e) => Err(classify_s3_error(e)),
		}
	}

	async fn stat(&self, path: &str) -> Result<ItemStat, Error> {
		if let Some(cached) = self.stat_cache.get(&self.storage_config_id, path) {
			return Ok(cached);
		}
		let key = self.key_for(path);
		let resp = self
			.client
			.head_object()
			.bucket(&self.bucket)
			.key(&key)
			.send()
			.await
			.map_err(classify_s3_error)?;
		let stat = ItemStat {
			path: path.to_string(),
			name: key.rsplit('/').next().unwrap_or(&key).to_string(),
			is_dir: false,
			size: resp.content_length().unwrap_or_default() as u64,
			content_type: resp.content_type().map(|s| s.to_string()),
			etag: resp.e_tag().map(|s| s.trim_matches('"').to_string()),
			last_modified: resp
				.last_modified()
				.map(|t| t.as_secs_f64() as u64 * 1000)
				.unwrap_or(0),
		};
		self.stat_cache.put(&self.storage_config_id, path, stat.clone());
		Ok(stat)
	}

	async fn list_directory(&self, path: &str) -> Result<Vec<ItemStat>, Error> {
		let prefix = self.key_for(path);
		let prefix = if prefix.is_empty() || prefix.ends_with('/') {
			prefix
		} else {
			format!("{}/", prefix)
		};
		let resp = self
			.client
			.list_objects_v2()
			.bucket(&self.bucket)
			.prefix(&prefix)
			.delimiter("/")
			.send()
			.await
			.map_err(classify_s3_error)?;

		let mut out = vec![];
		for common in resp.common_prefixes() {
			if let Some(p) = common.prefix() {
				let name = p.trim_end_matches('/').rsplit('/').next().unwrap_or(p).to_string();
				out.push(ItemStat {
					path: format!("/{}", p.trim_end_matches('/')),
					name,
					is_dir: true,
					size: 0,
					content_type: None,
					etag: None,
					last_modified: 0,
				});
			}
		}
		for obj in resp.contents() {
			if let Some(key) = obj.key() {
				if key == prefix {
					continue;
				}
				out.push(ItemStat {
					path: format!("/{}", key),
					name: key.rsplit('/').next().unwrap_or(key).to_string(),
					is_dir: false,
					size: obj.size().unwrap_or_default() as u64,
					content_type: None,
					etag: obj.e_tag().map(|s| s.trim_matches('"').to_string()),
					last_modified: obj
						.last_modified()
						.map(|t| t.as_secs_f64() as u64 * 1000)
						.unwrap_or(0),
				});
			}
		}
		Ok(out)
	}

	async fn download_file(&self, path: &str) -> Result<DownloadDescriptor, Error> {
		let key = self.key_for(path);
		let resp = self
			.client
			.get_object()
			.bucket(&self.bucket)
			.key(&key)
			.send()
			.await
			.map_err(classify_s3_error)?;
		let size = resp.content_length().unwrap_or_default() as u64;
		let content_type = resp.content_type().map(|s| s.to_string());
		let etag = resp.e_tag().map(|s| s.trim_matches('"').to_string());
		let last_modified = resp
			.last_modified()
			.map(|t| t.as_secs_f64() as u64 * 1000)
			.unwrap_or(0);
		let stream: ByteStream = resp
			.body
			.map(|chunk| chunk.map_err(|e| Error::Upstream(e.to_string())))
			.boxed();
		Ok(DownloadDescriptor {
			size,
			content_type,
			etag,
			last_modified,
			supports_range: true,
			stream,
		})
	}

	async fn create_directory(&self, path: &str) -> Result<(), Error> {
		let mut key = self.key_for(path);
		if !key.ends_with('/') {
			key.push('/');
		}
		self.client
			.put_object()
			.bucket(&self.bucket)
			.key(&key)
			.body(aws_sdk_s3::primitives::ByteStream::from_static(b""))
			.send()
			.await
			.map_err(classify_s3_error)?;
		Ok(())
	}

	async fn upload_file(
		&self,
		path: &str,
		content_type: Option<&str>,
		data: ByteStream,
	) -> Result<ItemStat, Error> {
		let key = self.key_for(path);
		let bytes = collect_bytes(data).await?;
		let size = bytes.len() as u64;
		let mut req = self
			.client
			.put_object()
			.bucket(&self.bucket)
			.key(&key)
			.body(aws_sdk_s3::primitives::ByteStream::from(bytes));
		if let Some(ct) = content_type {
			req = req.content_type(ct);
		}
		let resp = req.send().await.map_err(classify_s3_error)?;
		self.stat_cache.invalidate(&self.storage_config_id, path);
		Ok(ItemStat {
			path: path.to_string(),
			name: key.rsplit('/').next().unwrap_or(&key).to_string(),
			is_dir: false,
			size,
			content_type: content_type.map(|s| s.to_string()),
			etag: resp.e_tag().map(|s| s.trim_matches('"').to_string()),
			last_modified: now_msec(),
		})
	}

	async fn update_file(
		&self,
		path: &str,
		content_type: Option<&str>,
		data: ByteStream,
	) -> Result<ItemStat, Error> {
		self.upload_file(path, content_type, data).await
	}

	async fn rename_item(&self, from: &str, to: &str) -> Result<(), Error> {
		self.copy_item(from, to).await?;
		self.batch_remove_items(&[from.to_string()]).await
	}

	async fn copy_item(&self, from: &str, to: &str) -> Result<(), Error> {
		let source = format!("{}/{}", self.bucket, self.key_for(from));
		let dest_key = self.key_for(to);
		self.client
			.copy_object()
			.bucket(&self.bucket)
			.key(&dest_key)
			.copy_source(source)
			.send()
			.await
			.map_err(classify_s3_error)?;
		self.stat_cache.invalidate(&self.storage_config_id, to);
		Ok(())
	}

	async fn batch_remove_items(&self, paths: &[String]) -> Result<(), Error> {
		for path in paths {
			let key = self.key_for(path);
			self.client
				.delete_object()
				.bucket(&self.bucket)
				.key(&key)
				.send()
				.await
				.map_err(classify_s3_error)?;
			self.stat_cache.invalidate(&self.storage_config_id, path);
		}
		Ok(())
	}

	async fn initialize(&self, req: InitializeRequest) -> Result<InitializeResult, Error> {
		let (part_size, total_parts) = Self::part_size_for(req.file_size, req.requested_part_size)?;
		let key = self.key_for(&req.fs_path);

		let mut create = self.client.create_multipart_upload().bucket(&self.bucket).key(&key);
		if let Some(mime) = &req.mime_type {
			create = create.content_type(mime);
		}
		let created = create.send().await.map_err(classify_s3_error)?;
		let upload_id = created
			.upload_id()
			.ok_or_else(|| Error::Upstream("backend did not return an upload id".into()))?
			.to_string();

		let max_parts_per_request = req.multipart_concurrency.min(1000).max(1);
		let first_batch = total_parts.min(max_parts_per_request);
		let ttl = Duration::from_secs(req.url_ttl_seconds);
		let presigned_urls = self
			.presign_parts(&upload_id, &key, 1..=first_batch, ttl)
			.await?;

		Ok(InitializeResult {
			strategy: DriverUploadStrategy::PerPartUrl,
			provider_upload_id: Some(upload_id),
			part_size,
			total_parts,
			presigned_urls,
			upload_url: None,
			next_expected_range: None,
			provider_meta: self.provider_meta(&key, req.url_ttl_seconds, max_parts_per_request),
		})
	}

	async fn sign(&self, req: SignRequest) -> Result<SignResult, Error> {
		let upload_id = req
			.provider_upload_id
			.as_deref()
			.ok_or_else(|| Error::validation("session has no provider upload id"))?;
		let key = req
			.provider_meta
			.get("key")
			.and_then(|v| v.as_str())
			.ok_or_else(|| Error::validation("session is missing its object key"))?;
		let ttl = Duration::from_secs(req.url_ttl_seconds);

		let part_numbers: Vec<u32> = if req.part_numbers.is_empty() {
			if req.max_parts_per_request == 0 {
				return Err(Error::validation("maxPartsPerRequest must be positive"));
			}
			let listing = self.list_remote_parts(upload_id, key).await?;
			if listing.upload_not_found {
				return Err(Error::validation("upload expired"));
			}
			let uploaded: std::collections::HashSet<u32> =
				listing.parts.iter().map(|p| p.part_number).collect();
			let mut expected = 1;
			while uploaded.contains(&expected) {
				expected += 1;
			}
			let last = (expected + req.max_parts_per_request - 1).min(req.total_parts);
			if expected > req.total_parts {
				vec![]
			} else {
				(expected..=last).collect()
			}
		} else {
			if req.part_numbers.len() as u32 > req.max_parts_per_request {
				return Err(Error::validation(format!(
					"requested {} parts exceeds maxPartsPerRequest {}",
					req.part_numbers.len(),
					req.max_parts_per_request
				)));
			}
			req.part_numbers
		};

		let presigned_urls = self
			.presign_parts(upload_id, key, part_numbers.into_iter(), ttl)
			.await?;
		Ok(SignResult {
			presigned_urls,
			expires_in: req.url_ttl_seconds,
		})
	}

	async fn list_parts(
		&self,
		provider_upload_id: Option<&str>,
		provider_meta: &serde_json::Value,
	) -> Result<ListPartsResult, Error> {
		let upload_id = provider_upload_id
			.ok_or_else(|| Error::validation("session has no provider upload id"))?;
		let key = provider_meta
			.get("key")
			.and_then(|v| v.as_str())
			.ok_or_else(|| Error::validation("session is missing its object key"))?;
		self.list_remote_parts(upload_id, key).await
	}

	async fn complete(&self, req: CompleteRequest) -> Result<CompleteResult, Error> {
		let upload_id = req
			.provider_upload_id
			.as_deref()
			.ok_or_else(|| Error::validation("session has no provider upload id"))?;
		let key = req
			.provider_meta
			.get("key")
			.and_then(|v| v.as_str())
			.ok_or_else(|| Error::validation("session is missing its object key"))?;

		let mut parts: Vec<CompletedPart> = match req.parts {
			Some(parts) => parts,
			None => {
				let listing = self.list_remote_parts(upload_id, key).await?;
				listing
					.parts
					.into_iter()
					.map(|p| CompletedPart {
						part_number: p.part_number,
						etag: p.etag.unwrap_or_default(),
					})
					.collect()
			}
		};
		parts.sort_by_key(|p| p.part_number);

		let completed = CompletedMultipartUpload::builder()
			.set_parts(Some(
				parts
					.iter()
					.map(|p| {
						S3CompletedPart::builder()
							.part_number(p.part_number as i32)
							.e_tag(&p.etag)
							.build()
					})
					.collect(),
			))
			.build();

		let resp = self
			.client
			.complete_multipart_upload()
			.bucket(&self.bucket)
			.key(key)
			.upload_id(upload_id)
			.multipart_upload(completed)
			.send()
			.await
			.map_err(classify_s3_error)?;

		self.stat_cache.invalidate(&self.storage_config_id, key);
		Ok(CompleteResult {
			storage_path: format!("/{}", key),
			public_url: resp.location().map(|s| s.to_string()),
			etag: resp.e_tag().map(|s| s.trim_matches('"').to_string()),
			content_type: None,
			manifest: None,
		})
	}

	async fn abort(&self, req: AbortRequest) -> Result<(), Error> {
		let upload_id = req
			.provider_upload_id
			.as_deref()
			.ok_or_else(|| Error::validation("session has no provider upload id"))?;
		let key = req
			.provider_meta
			.get("key")
			.and_then(|v| v.as_str())
			.ok_or_else(|| Error::validation("session is missing its object key"))?;
		self.client
			.abort_multipart_upload()
			.bucket(&self.bucket)
			.key(key)
			.upload_id(upload_id)
			.send()
			.await
			.map_err(classify_s3_error)?;
		Ok(())
	}
}

async fn collect_bytes(mut stream: ByteStream) -> Result<Vec<u8>, Error> {
	let mut buf = vec![];
	while let Some(chunk) = stream.next().await {
		buf.extend_from_slice(&chunk?);
	}
	Ok(buf)
}

fn is_no_such_upload<E: ProvideErrorMetadata>(err: &E) -> bool {
	err.code() == Some("NoSuchUpload")
}

fn is_not_found<E: ProvideErrorMetadata>(err: &E) -> bool {
	matches!(err.code(), Some("NoSuchKey") | Some("NotFound"))
}

fn classify_s3_error<E: ProvideErrorMetadata + std::fmt::Display>(err: E) -> Error {
	match err.code() {
		Some("NoSuchUpload") => Error::Expired("upload expired".into()),
		Some("AccessDenied") => Error::Upstream(format!("backend denied access: {}", err)),
		Some("NoSuchKey") | Some("NotFound") => Error::not_found(err.to_string()),
		_ => Error::Upstream(err.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn part_size_rejects_zero_length_file() {
		let err = S3MultipartDriver::part_size_for(0, None).unwrap_err();
		assert_eq!(err.kind(), "Validation");
	}

	#[test]
	fn part_size_rejects_object_over_max_size() {
		let err = S3MultipartDriver::part_size_for(MAX_OBJECT_SIZE + 1, None).unwrap_err();
		assert_eq!(err.kind(), "Validation");
	}

	#[test]
	fn part_size_clamps_to_minimum() {
		let (part_size, total_parts) = S3MultipartDriver::part_size_for(1024, None).unwrap();
		assert_eq!(part_size, MIN_PART_SIZE);
		assert_eq!(total_parts, 1);
	}

	#[test]
	fn part_size_grows_to_respect_max_parts() {
		// A huge file at the minimum part size would need more than
		// MAX_PARTS parts, so the driver must grow the part size instead.
		let huge = MIN_PART_SIZE * (MAX_PARTS as u64) * 2;
		let (part_size, total_parts) = S3MultipartDriver::part_size_for(huge, None).unwrap();
		assert!(total_parts <= MAX_PARTS);
		assert!(part_size > MIN_PART_SIZE);
	}
}
