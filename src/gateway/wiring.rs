//! Builds every driver, store and façade named in `gateway.toml` into
//! the object graph the API layer runs against. Kept in its own module
//! so `main.rs` stays a thin "read config, wire, serve" sequence,
//! separating node bootstrap from CLI parsing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gateway_coordinator::{ChunkUploader, UploadCoordinator};
use gateway_drivers::capability::{Driver, ItemStat};
use gateway_drivers::r#virtual::{IndexLookup, VirtualDriver};
use gateway_drivers::s3::S3MultipartDriver;
use gateway_drivers::telegram::TelegramMultipartDriver;
use gateway_fs::{FsFacade, MountInfo};
use gateway_jobs::JobEngine;
use gateway_jobs::JobStore;
use gateway_store::model::SearchIndexEntry;
use gateway_store::{SearchIndexStore, SessionStore};
use gateway_util::config::{Config, StorageConfig};
use gateway_util::error::{Error, ErrContext};

pub struct Built {
	pub coordinator: Arc<UploadCoordinator>,
	pub chunk_uploader: Arc<ChunkUploader>,
	pub facade: Arc<FsFacade>,
	pub index: Arc<SearchIndexStore>,
	pub jobs: Arc<JobEngine>,
}

pub async fn build(config: &Config) -> Result<Built, Error> {
	std::fs::create_dir_all(&config.metadata_dir)
		.err_context(format!("unable to create metadata_dir {}", config.metadata_dir.display()))?;

	let sessions = Arc::new(SessionStore::open(config.metadata_dir.join("sessions.sled"))?);
	let index = Arc::new(SearchIndexStore::open(config.metadata_dir.join("index.db"))?);
	let job_store = Arc::new(JobStore::open(config.metadata_dir.join("jobs.sled"))?);

	// A virtual storage_config has no backend of its own; it serves
	// exactly the one mount bound to it straight out of the index, so
	// its driver needs that mount_id up front.
	let mut mount_of_storage_config: HashMap<&str, &str> = HashMap::new();
	for m in &config.mounts {
		mount_of_storage_config.entry(&m.storage_config_id).or_insert(&m.mount_id);
	}

	let mut drivers: HashMap<String, Arc<dyn Driver>> = HashMap::new();
	for sc in &config.storage_configs {
		let driver = build_driver(sc, &index, &mount_of_storage_config).await?;
		drivers.insert(sc.id().to_string(), driver);
	}

	let mut mounts: HashMap<String, MountInfo> = HashMap::new();
	for m in &config.mounts {
		if !drivers.contains_key(&m.storage_config_id) {
			return Err(Error::validation(format!(
				"mount {} references unknown storage_config_id {}",
				m.mount_id, m.storage_config_id
			)));
		}
		mounts.insert(
			m.mount_id.clone(),
			MountInfo { mount_id: m.mount_id.clone(), storage_config_id: m.storage_config_id.clone() },
		);
	}

	let coordinator = Arc::new(UploadCoordinator::new(
		sessions.clone(),
		drivers.clone(),
		config.multipart.url_ttl_seconds,
		config.multipart.multipart_concurrency as u32,
		config.multipart.session_expiry_seconds,
	));
	let chunk_uploader = Arc::new(ChunkUploader::new(sessions.clone(), drivers.clone()));
	let facade = Arc::new(FsFacade::new(drivers, mounts, index.clone()));
	let jobs = gateway_jobs::build_index_engine(facade.clone(), index.clone(), job_store)?;

	Ok(Built { coordinator, chunk_uploader, facade, index, jobs })
}

async fn build_driver(
	sc: &StorageConfig,
	index: &Arc<SearchIndexStore>,
	mount_of_storage_config: &HashMap<&str, &str>,
) -> Result<Arc<dyn Driver>, Error> {
	match sc {
		StorageConfig::S3 { id, endpoint, region, bucket, access_key_id, secret_access_key, path_style } => {
			let creds = aws_sdk_s3::config::Credentials::new(
				access_key_id.clone(),
				secret_access_key.clone(),
				None,
				None,
				"gateway-config",
			);
			let s3_config = aws_sdk_s3::config::Builder::new()
				.region(aws_sdk_s3::config::Region::new(region.clone()))
				.endpoint_url(endpoint.clone())
				.credentials_provider(creds)
				.force_path_style(*path_style)
				.build();
			let client = aws_sdk_s3::Client::from_conf(s3_config);
			Ok(Arc::new(S3MultipartDriver::new(client, bucket.clone(), id.clone())))
		}
		StorageConfig::Telegram { id, bot_token, default_chat_id } => {
			let bot = teloxide::Bot::new(bot_token.clone());
			Ok(Arc::new(TelegramMultipartDriver::new(bot, id.clone(), default_chat_id.to_string(), 2)))
		}
		StorageConfig::Virtual { id } => {
			let mount_id = mount_of_storage_config
				.get(id.as_str())
				.ok_or_else(|| Error::validation(format!("virtual storage_config {} has no bound mount", id)))?
				.to_string();
			let adapter = IndexAdapter { index: index.clone(), mount_id };
			Ok(Arc::new(VirtualDriver::new(id.clone(), Arc::new(adapter))))
		}
	}
}

/// Bridges [`SearchIndexStore`] to the driver crate's narrow
/// [`IndexLookup`] seam, so `gateway_drivers` never has to depend on
/// `gateway_store` directly (the trait's own doc comment calls this
/// out). Scoped to the one mount its storage_config backs.
struct IndexAdapter {
	index: Arc<SearchIndexStore>,
	mount_id: String,
}

fn item_stat_of(e: SearchIndexEntry) -> ItemStat {
	ItemStat {
		path: e.fs_path,
		name: e.name,
		is_dir: e.is_dir,
		size: e.size,
		content_type: e.mimetype,
		etag: None,
		last_modified: e.modified_ms,
	}
}

#[async_trait]
impl IndexLookup for IndexAdapter {
	async fn stat(&self, path: &str) -> Result<ItemStat, Error> {
		self.index
			.get_entry(&self.mount_id, path)?
			.map(item_stat_of)
			.ok_or_else(|| Error::not_found(format!("{} not indexed", path)))
	}

	async fn list_directory(&self, path: &str) -> Result<Vec<ItemStat>, Error> {
		Ok(self
			.index
			.list_children(&self.mount_id, path)?
			.into_iter()
			.map(item_stat_of)
			.collect())
	}
}
