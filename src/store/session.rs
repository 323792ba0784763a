//! Session store: durable, single-row-atomic records for multipart
//! sessions and their parts.
//!
//! Backed directly by `sled` trees keyed with composite byte keys,
//! rather than through a replicated table abstraction — no multi-row
//! transactions are required here, only single-row atomicity.

use std::collections::HashMap;
use std::path::Path;

use gateway_util::error::Error;
use gateway_util::time::now_msec;

use crate::model::{
	SessionFilter, SessionPatch, SessionStatus, UploadPart, UploadSession, UploadedStats,
};

pub struct SessionStore {
	sessions: sled::Tree,
	parts: sled::Tree,
	by_fingerprint: sled::Tree,
}

impl SessionStore {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
		let db = sled::Config::default()
			.path(path.as_ref())
			.open()
			.map_err(|e| Error::Infrastructure(format!("unable to open session db: {}", e)))?;
		Ok(Self {
			sessions: db.open_tree("upload_sessions")?,
			parts: db.open_tree("upload_parts")?,
			by_fingerprint: db.open_tree("upload_sessions_by_fingerprint")?,
		})
	}

	pub fn create_session(&self, record: UploadSession) -> Result<String, Error> {
		if record.id.is_empty()
			|| record.mount_id.is_empty()
			|| record.fs_path.is_empty()
			|| record.file_name.is_empty()
			|| record.storage_config_id.is_empty()
		{
			return Err(Error::validation(
				"session is missing one or more required fields",
			));
		}

		if let Some(existing) = self.find_active_by_fingerprint(&record.fingerprint_value)? {
			if existing.owner_user_id != record.owner_user_id {
				return Err(Error::validation(
					"an active upload to this target already exists for another user",
				));
			}
		}

		self.put_session(&record)?;
		self.by_fingerprint.insert(
			record.fingerprint_value.as_bytes(),
			record.id.as_bytes(),
		)?;
		Ok(record.id)
	}

	pub fn find_session(&self, id: &str) -> Result<UploadSession, Error> {
		self.get_session(id)?
			.ok_or_else(|| Error::not_found(format!("upload session {} not found", id)))
	}

	pub fn find_active_by_fingerprint(
		&self,
		fingerprint_value: &str,
	) -> Result<Option<UploadSession>, Error> {
		let Some(id) = self.by_fingerprint.get(fingerprint_value.as_bytes())? else {
			return Ok(None);
		};
		let id = String::from_utf8_lossy(&id).to_string();
		match self.get_session(&id)? {
			Some(session) if !session.status.is_terminal() => Ok(Some(session)),
			_ => {
				// Stale index entry: the session finished since it was
				// recorded. Clean it up and report no active session.
				self.by_fingerprint.remove(fingerprint_value.as_bytes())?;
				Ok(None)
			}
		}
	}

	pub fn list_active_sessions(
		&self,
		filter: &SessionFilter,
	) -> Result<Vec<UploadSession>, Error> {
		let mut out = vec![];
		for item in self.sessions.iter() {
			let (_, value) = item?;
			let session: UploadSession = serde_json::from_slice(&value)?;
			if session.status.is_terminal() {
				continue;
			}
			if let Some(uid) = &filter.owner_user_id {
				if &session.owner_user_id != uid {
					continue;
				}
			}
			if let Some(st) = &filter.storage_type {
				if &session.storage_type != st {
					continue;
				}
			}
			if let Some(mid) = &filter.mount_id {
				if &session.mount_id != mid {
					continue;
				}
			}
			if let Some(prefix) = &filter.fs_path_prefix {
				if !session.fs_path.starts_with(prefix.as_str()) {
					continue;
				}
			}
			out.push(session);
		}
		Ok(out)
	}

	pub fn update_session(&self, id: &str, patch: SessionPatch) -> Result<UploadSession, Error> {
		let mut session = self.find_session(id)?;

		if session.status.is_terminal() {
			return Err(Error::validation(format!(
				"session {} is {:?} and immutable",
				id, session.status
			)));
		}

		if let Some(new_parts) = patch.uploaded_parts {
			if new_parts < session.uploaded_parts {
				return Err(Error::validation(
					"uploaded_parts may not decrease",
				));
			}
		}
		if let Some(new_bytes) = patch.bytes_uploaded {
			if new_bytes < session.bytes_uploaded {
				return Err(Error::validation("bytes_uploaded may not decrease"));
			}
			if new_bytes > session.file_size {
				return Err(Error::validation(
					"bytes_uploaded may not exceed file_size",
				));
			}
		}

		let was_active = !session.status.is_terminal();

		if let Some(status) = patch.status {
			session.status = status;
		}
		if let Some(b) = patch.bytes_uploaded {
			session.bytes_uploaded = b;
		}
		if let Some(p) = patch.uploaded_parts {
			session.uploaded_parts = p;
		}
		if let Some(r) = patch.next_expected_range {
			session.next_expected_range = r;
		}
		if let Some(p) = patch.provider_upload_id {
			session.provider_upload_id = p;
		}
		if let Some(m) = patch.provider_meta {
			session.provider_meta = m;
		}
		if let Some(e) = patch.error_message {
			session.error_message = e;
		}
		if let Some(exp) = patch.expires_at {
			session.expires_at = exp;
		}
		session.updated_at = now_msec();

		self.put_session(&session)?;

		if was_active && session.status.is_terminal() {
			self.by_fingerprint
				.remove(session.fingerprint_value.as_bytes())?;
		}

		Ok(session)
	}

	fn get_session(&self, id: &str) -> Result<Option<UploadSession>, Error> {
		match self.sessions.get(id.as_bytes())? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	fn put_session(&self, session: &UploadSession) -> Result<(), Error> {
		let bytes = serde_json::to_vec(session)?;
		self.sessions.insert(session.id.as_bytes(), bytes)?;
		Ok(())
	}

	// ---- Parts ----

	fn part_key(upload_id: &str, part_no: u32) -> Vec<u8> {
		let mut key = upload_id.as_bytes().to_vec();
		key.push(0);
		key.extend_from_slice(&part_no.to_be_bytes());
		key
	}

	pub fn upsert_part(&self, part: UploadPart) -> Result<(), Error> {
		let key = Self::part_key(&part.upload_id, part.part_no);
		let bytes = serde_json::to_vec(&part)?;
		self.parts.insert(key, bytes)?;
		Ok(())
	}

	pub fn get_part(&self, upload_id: &str, part_no: u32) -> Result<Option<UploadPart>, Error> {
		let key = Self::part_key(upload_id, part_no);
		match self.parts.get(key)? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	pub fn list_parts(&self, upload_id: &str) -> Result<Vec<UploadPart>, Error> {
		let mut prefix = upload_id.as_bytes().to_vec();
		prefix.push(0);
		let mut out = vec![];
		for item in self.parts.scan_prefix(&prefix) {
			let (_, value) = item?;
			out.push(serde_json::from_slice(&value)?);
		}
		out.sort_by_key(|p: &UploadPart| p.part_no);
		Ok(out)
	}

	pub fn delete_parts_by_upload_id(&self, upload_id: &str) -> Result<(), Error> {
		let mut prefix = upload_id.as_bytes().to_vec();
		prefix.push(0);
		let keys: Vec<_> = self
			.parts
			.scan_prefix(&prefix)
			.map(|item| item.map(|(k, _)| k))
			.collect::<Result<_, _>>()?;
		for key in keys {
			self.parts.remove(key)?;
		}
		Ok(())
	}

	pub fn get_uploaded_stats_by_upload_ids(
		&self,
		upload_ids: &[String],
	) -> Result<HashMap<String, UploadedStats>, Error> {
		let mut out = HashMap::new();
		for id in upload_ids {
			let mut stats = UploadedStats::default();
			for part in self.list_parts(id)? {
				if part.status == crate::model::PartStatus::Uploaded {
					stats.bytes += part.size;
					stats.parts += 1;
				}
			}
			out.insert(id.clone(), stats);
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::UploadStrategy;

	fn sample_session(id: &str, user: &str, fp: &str) -> UploadSession {
		UploadSession {
			id: id.into(),
			owner_user_id: user.into(),
			storage_type: "S3".into(),
			storage_config_id: "cfg1".into(),
			mount_id: "mount1".into(),
			fs_path: "/a/b.bin".into(),
			file_name: "b.bin".into(),
			file_size: 100,
			mime_type: None,
			strategy: UploadStrategy::PerPartUrl,
			part_size: 10,
			total_parts: 10,
			bytes_uploaded: 0,
			uploaded_parts: 0,
			next_expected_range: None,
			provider_upload_id: None,
			provider_meta: serde_json::json!({}),
			status: SessionStatus::Initiated,
			error_message: None,
			fingerprint_algo: "blake2b-512".into(),
			fingerprint_value: fp.into(),
			created_at: 0,
			updated_at: 0,
			expires_at: 0,
		}
	}

	fn open_tmp() -> SessionStore {
		let dir = mktemp::Temp::new_dir().unwrap();
		SessionStore::open(dir.to_path_buf()).unwrap()
	}

	#[test]
	fn create_and_find() {
		let store = open_tmp();
		store.create_session(sample_session("u1", "user-a", "fp1")).unwrap();
		let found = store.find_session("u1").unwrap();
		assert_eq!(found.owner_user_id, "user-a");
	}

	#[test]
	fn fingerprint_collision_different_user_rejected() {
		let store = open_tmp();
		store.create_session(sample_session("u1", "user-a", "fp1")).unwrap();
		let err = store
			.create_session(sample_session("u2", "user-b", "fp1"))
			.unwrap_err();
		assert_eq!(err.kind(), "Validation");
	}

	#[test]
	fn fingerprint_resume_same_user_allowed_by_coordinator_lookup() {
		let store = open_tmp();
		store.create_session(sample_session("u1", "user-a", "fp1")).unwrap();
		let existing = store.find_active_by_fingerprint("fp1").unwrap();
		assert!(existing.is_some());
	}

	#[test]
	fn uploaded_parts_cannot_decrease() {
		let store = open_tmp();
		store.create_session(sample_session("u1", "user-a", "fp1")).unwrap();
		store
			.update_session(
				"u1",
				SessionPatch {
					uploaded_parts: Some(3),
					..Default::default()
				},
			)
			.unwrap();
		let err = store
			.update_session(
				"u1",
				SessionPatch {
					uploaded_parts: Some(1),
					..Default::default()
				},
			)
			.unwrap_err();
		assert_eq!(err.kind(), "Validation");
	}

	#[test]
	fn completed_session_is_immutable() {
		let store = open_tmp();
		store.create_session(sample_session("u1", "user-a", "fp1")).unwrap();
		store
			.update_session(
				"u1",
				SessionPatch {
					status: Some(SessionStatus::Completed),
					..Default::default()
				},
			)
			.unwrap();
		let err = store
			.update_session(
				"u1",
				SessionPatch {
					bytes_uploaded: Some(50),
					..Default::default()
				},
			)
			.unwrap_err();
		assert_eq!(err.kind(), "Validation");
	}

	#[test]
	fn parts_idempotent_on_upload_id_part_no() {
		let store = open_tmp();
		let mut part = UploadPart {
			upload_id: "u1".into(),
			part_no: 1,
			byte_start: 0,
			byte_end: 9,
			size: 10,
			status: crate::model::PartStatus::Uploading,
			provider_part_id: None,
			provider_meta: None,
			error_code: None,
			error_message: None,
			updated_at: 0,
		};
		store.upsert_part(part.clone()).unwrap();
		part.status = crate::model::PartStatus::Uploaded;
		part.provider_part_id = Some("etag1".into());
		store.upsert_part(part).unwrap();

		let parts = store.list_parts("u1").unwrap();
		assert_eq!(parts.len(), 1);
		assert_eq!(parts[0].status, crate::model::PartStatus::Uploaded);
	}
}
