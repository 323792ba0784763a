//! Virtual/index-only driver: a read-only view over aggregated
//! mounts that have no native directory concept of their own, backed
//! entirely by whatever already indexed the content rather than a
//! live backend call.
//!
//! Kept decoupled from `gateway_store` so the driver crate never
//! depends on the store crate — callers (the coordinator/fs facade)
//! inject an [`IndexLookup`] implementation that wraps the real
//! search index store.

use async_trait::async_trait;
use std::sync::Arc;

use gateway_util::error::Error;

use crate::capability::{Capability, CapabilitySet, Driver, DownloadDescriptor, ItemStat};

#[async_trait]
pub trait IndexLookup: Send + Sync {
	async fn stat(&self, path: &str) -> Result<ItemStat, Error>;
	async fn list_directory(&self, path: &str) -> Result<Vec<ItemStat>, Error>;
}

pub struct VirtualDriver {
	storage_config_id: String,
	index: Arc<dyn IndexLookup>,
}

impl VirtualDriver {
	pub fn new(storage_config_id: String, index: Arc<dyn IndexLookup>) -> Self {
		Self {
			storage_config_id,
			index,
		}
	}
}

#[async_trait]
impl Driver for VirtualDriver {
	fn capabilities(&self) -> CapabilitySet {
		CapabilitySet::from_caps(&[Capability::Reader])
	}

	fn storage_config_id(&self) -> &str {
		&self.storage_config_id
	}

	async fn exists(&self, path: &str) -> Result<bool, Error> {
		match self.index.stat(path).await {
			Ok(_) => Ok(true),
			Err(e) if e.kind() == "NotFound" => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn stat(&self, path: &str) -> Result<ItemStat, Error> {
		self.index.stat(path).await
	}

	async fn list_directory(&self, path: &str) -> Result<Vec<ItemStat>, Error> {
		self.index.list_directory(path).await
	}

	async fn download_file(&self, _path: &str) -> Result<DownloadDescriptor, Error> {
		Err(Error::Upstream(
			"virtual driver is index-only; content is served by the owning backend driver".into(),
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct FixedIndex(ItemStat);

	#[async_trait]
	impl IndexLookup for FixedIndex {
		async fn stat(&self, _path: &str) -> Result<ItemStat, Error> {
			Ok(self.0.clone())
		}
		async fn list_directory(&self, _path: &str) -> Result<Vec<ItemStat>, Error> {
			Ok(vec![self.0.clone()])
		}
	}

	#[tokio::test]
	async fn exists_delegates_to_index() {
		let stat = ItemStat {
			path: "/a".into(),
			name: "a".into(),
			is_dir: false,
			size: 1,
			content_type: None,
			etag: None,
			last_modified: 0,
		};
		let driver = VirtualDriver::new("virt1".into(), Arc::new(FixedIndex(stat)));
		assert!(driver.exists("/a").await.unwrap());
	}
}
