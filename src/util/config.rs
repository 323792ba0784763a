//! Static configuration loading: a plain `toml`-deserialized struct
//! plus a `read_config` entry point.
//! Parsing and validating this file is the only "static configuration
//! loading" responsibility the core has; wiring it into a running
//! process is left to the `gateway` binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrContext};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Directory holding the session ledger (sled) and search index
	/// (sqlite) database files.
	pub metadata_dir: PathBuf,

	/// Address the gateway's HTTP API listens on.
	#[serde(default = "default_api_bind_addr")]
	pub api_bind_addr: SocketAddr,

	#[serde(default)]
	pub multipart: MultipartConfig,

	#[serde(default)]
	pub index: IndexConfig,

	#[serde(default)]
	pub jobs: JobsConfig,

	/// Per-mount storage backend configuration, keyed by
	/// `storage_config_id`.
	#[serde(default)]
	pub storage_configs: Vec<StorageConfig>,

	/// VFS mounts, each bound to one entry in `storage_configs`.
	#[serde(default)]
	pub mounts: Vec<MountConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MountConfig {
	pub mount_id: String,
	pub storage_config_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MultipartConfig {
	#[serde(default = "default_url_ttl_seconds")]
	pub url_ttl_seconds: u64,
	#[serde(default = "default_multipart_concurrency")]
	pub multipart_concurrency: usize,
	#[serde(default = "default_telegram_concurrency")]
	pub telegram_concurrency: usize,
	#[serde(default = "default_session_expiry_seconds")]
	pub session_expiry_seconds: u64,
}

impl Default for MultipartConfig {
	fn default() -> Self {
		Self {
			url_ttl_seconds: default_url_ttl_seconds(),
			multipart_concurrency: default_multipart_concurrency(),
			telegram_concurrency: default_telegram_concurrency(),
			session_expiry_seconds: default_session_expiry_seconds(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
	#[serde(default = "default_rebuild_batch_size")]
	pub rebuild_batch_size: usize,
	#[serde(default = "default_dirty_degrade_threshold")]
	pub dirty_degrade_threshold: usize,
}

impl Default for IndexConfig {
	fn default() -> Self {
		Self {
			rebuild_batch_size: default_rebuild_batch_size(),
			dirty_degrade_threshold: default_dirty_degrade_threshold(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
	#[serde(default = "default_job_concurrency")]
	pub concurrency: usize,
	#[serde(default = "default_progress_report_items")]
	pub progress_report_items: u64,
	#[serde(default = "default_progress_report_millis")]
	pub progress_report_millis: u64,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			concurrency: default_job_concurrency(),
			progress_report_items: default_progress_report_items(),
			progress_report_millis: default_progress_report_millis(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum StorageConfig {
	S3 {
		id: String,
		endpoint: String,
		region: String,
		bucket: String,
		access_key_id: String,
		secret_access_key: String,
		#[serde(default)]
		path_style: bool,
	},
	Telegram {
		id: String,
		bot_token: String,
		default_chat_id: i64,
	},
	Virtual {
		id: String,
	},
}

impl StorageConfig {
	pub fn id(&self) -> &str {
		match self {
			StorageConfig::S3 { id, .. } => id,
			StorageConfig::Telegram { id, .. } => id,
			StorageConfig::Virtual { id } => id,
		}
	}
}

fn default_api_bind_addr() -> SocketAddr {
	"127.0.0.1:3905".parse().unwrap()
}
fn default_url_ttl_seconds() -> u64 {
	900
}
fn default_multipart_concurrency() -> usize {
	8
}
fn default_telegram_concurrency() -> usize {
	2
}
fn default_session_expiry_seconds() -> u64 {
	24 * 3600
}
fn default_rebuild_batch_size() -> usize {
	200
}
fn default_dirty_degrade_threshold() -> usize {
	200
}
fn default_job_concurrency() -> usize {
	4
}
fn default_progress_report_items() -> u64 {
	25
}
fn default_progress_report_millis() -> u64 {
	1500
}

pub fn read_config(path: impl AsRef<Path>) -> Result<Config, Error> {
	let path = path.as_ref();
	let data = std::fs::read_to_string(path)
		.err_context(format!("unable to read config file {}", path.display()))?;
	let config: Config =
		toml::from_str(&data).err_context(format!("invalid config file {}", path.display()))?;
	Ok(config)
}
