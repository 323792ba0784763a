//! The set of components every handler is dispatched against, built
//! once at startup by the gateway binary and shared behind an `Arc`.

use std::sync::Arc;

use gateway_coordinator::{ChunkUploader, UploadCoordinator};
use gateway_fs::FsFacade;
use gateway_jobs::JobEngine;
use gateway_store::SearchIndexStore;

pub struct ApiState {
	pub coordinator: Arc<UploadCoordinator>,
	pub chunk_uploader: Arc<ChunkUploader>,
	pub facade: Arc<FsFacade>,
	pub index: Arc<SearchIndexStore>,
	pub jobs: Arc<JobEngine>,
}
