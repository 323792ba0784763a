//! The search index store: the VFS full text index plus the
//! dirty-queue backlog that keeps it converging with upstream drivers
//! that don't push change notifications.
//!
//! Built on `rusqlite`'s FTS5 trigram tokenizer, which gives
//! contains-semantics search with a three-character minimum query
//! length without a hand-rolled postings index. `rusqlite` is already
//! one of the storage backends available to the rest of this
//! codebase, so this stays within the inherited stack rather than
//! reaching for a new search engine crate.

use std::collections::HashMap;
use std::sync::Mutex;

use gateway_util::error::Error;
use gateway_util::time::now_msec;
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{
	DirtyQueueItem, DirtyOp, MountIndexState, MountIndexStatus, SearchIndexEntry, SearchQuery,
	SearchResults, SearchScope,
};

const MIN_QUERY_LEN: usize = 3;
const CURSOR_SEP: char = '\u{1f}';

pub struct SearchIndexStore {
	conn: Mutex<Connection>,
}

impl SearchIndexStore {
	pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
		let conn = Connection::open(path.as_ref())
			.map_err(|e| Error::Infrastructure(format!("unable to open index db: {}", e)))?;
		conn.execute_batch(
			"
			CREATE TABLE IF NOT EXISTS search_index (
				mount_id TEXT NOT NULL,
				fs_path TEXT NOT NULL,
				name TEXT NOT NULL,
				is_dir INTEGER NOT NULL,
				size INTEGER NOT NULL,
				modified_ms INTEGER NOT NULL,
				mimetype TEXT,
				index_run_id TEXT,
				updated_at INTEGER NOT NULL,
				PRIMARY KEY (mount_id, fs_path)
			);

			CREATE VIRTUAL TABLE IF NOT EXISTS search_index_fts USING fts5(
				mount_id UNINDEXED,
				fs_path UNINDEXED,
				name,
				tokenize = 'trigram'
			);

			CREATE TABLE IF NOT EXISTS mount_index_state (
				mount_id TEXT PRIMARY KEY,
				status TEXT NOT NULL,
				last_run_id TEXT,
				last_indexed_at INTEGER,
				error_message TEXT,
				job_id TEXT
			);

			CREATE TABLE IF NOT EXISTS dirty_queue (
				dedupe_key TEXT PRIMARY KEY,
				mount_id TEXT NOT NULL,
				fs_path TEXT NOT NULL,
				op TEXT NOT NULL,
				enqueued_at INTEGER NOT NULL
			);
			CREATE INDEX IF NOT EXISTS dirty_queue_enqueued_at ON dirty_queue (enqueued_at);
			",
		)
		.map_err(|e| Error::Infrastructure(format!("index schema init failed: {}", e)))?;
		Ok(Self {
			conn: Mutex::new(conn),
		})
	}

	pub fn upsert_entries(&self, entries: &[SearchIndexEntry]) -> Result<(), Error> {
		let mut conn = self.conn.lock().unwrap();
		let tx = conn.transaction()?;
		for entry in entries {
			tx.execute(
				"DELETE FROM search_index_fts WHERE mount_id = ?1 AND fs_path = ?2",
				params![entry.mount_id, entry.fs_path],
			)?;
			tx.execute(
				"INSERT INTO search_index
					(mount_id, fs_path, name, is_dir, size, modified_ms, mimetype, index_run_id, updated_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
				 ON CONFLICT(mount_id, fs_path) DO UPDATE SET
					name = excluded.name,
					is_dir = excluded.is_dir,
					size = excluded.size,
					modified_ms = excluded.modified_ms,
					mimetype = excluded.mimetype,
					index_run_id = excluded.index_run_id,
					updated_at = excluded.updated_at",
				params![
					entry.mount_id,
					entry.fs_path,
					entry.name,
					entry.is_dir,
					entry.size,
					entry.modified_ms,
					entry.mimetype,
					entry.index_run_id,
					entry.updated_at,
				],
			)?;
			tx.execute(
				"INSERT INTO search_index_fts (mount_id, fs_path, name) VALUES (?1, ?2, ?3)",
				params![entry.mount_id, entry.fs_path, entry.name],
			)?;
		}
		tx.commit()?;
		Ok(())
	}

	/// Looks up a single indexed node, for backends (the virtual
	/// driver) that have no directory structure of their own and serve
	/// `stat`/`listDirectory` entirely out of what's already indexed.
	pub fn get_entry(&self, mount_id: &str, fs_path: &str) -> Result<Option<SearchIndexEntry>, Error> {
		let conn = self.conn.lock().unwrap();
		conn.query_row(
			"SELECT mount_id, fs_path, name, is_dir, size, modified_ms, mimetype, index_run_id, updated_at
			 FROM search_index WHERE mount_id = ?1 AND fs_path = ?2",
			params![mount_id, fs_path],
			|row| {
				Ok(SearchIndexEntry {
					mount_id: row.get(0)?,
					fs_path: row.get(1)?,
					name: row.get(2)?,
					is_dir: row.get(3)?,
					size: row.get(4)?,
					modified_ms: row.get(5)?,
					mimetype: row.get(6)?,
					index_run_id: row.get(7)?,
					updated_at: row.get(8)?,
				})
			},
		)
		.optional()
		.map_err(Error::from)
	}

	/// Direct children of `dir_path` (one level, not the whole
	/// subtree) within `mount_id`, ordered directory-first then by
	/// name — the same listing a live backend's `listDirectory` would
	/// return.
	pub fn list_children(&self, mount_id: &str, dir_path: &str) -> Result<Vec<SearchIndexEntry>, Error> {
		let prefix = if dir_path.ends_with('/') {
			dir_path.to_string()
		} else {
			format!("{}/", dir_path)
		};
		let conn = self.conn.lock().unwrap();
		let mut stmt = conn.prepare(
			"SELECT mount_id, fs_path, name, is_dir, size, modified_ms, mimetype, index_run_id, updated_at
			 FROM search_index
			 WHERE mount_id = ?1 AND fs_path LIKE ?2 ESCAPE '\\'
			 ORDER BY is_dir DESC, name ASC",
		)?;
		let like_prefix = format!("{}%", escape_like(&prefix));
		let rows = stmt.query_map(params![mount_id, like_prefix], |row| {
			Ok(SearchIndexEntry {
				mount_id: row.get(0)?,
				fs_path: row.get(1)?,
				name: row.get(2)?,
				is_dir: row.get(3)?,
				size: row.get(4)?,
				modified_ms: row.get(5)?,
				mimetype: row.get(6)?,
				index_run_id: row.get(7)?,
				updated_at: row.get(8)?,
			})
		})?;
		let mut out = vec![];
		for row in rows {
			let entry = row?;
			// LIKE-prefix match includes deeper descendants too; keep
			// only the direct children of `dir_path`.
			let rest = &entry.fs_path[prefix.len()..];
			if !rest.is_empty() && !rest.contains('/') {
				out.push(entry);
			}
		}
		Ok(out)
	}

	pub fn delete_entry(&self, mount_id: &str, fs_path: &str) -> Result<(), Error> {
		let conn = self.conn.lock().unwrap();
		conn.execute(
			"DELETE FROM search_index_fts WHERE mount_id = ?1 AND fs_path = ?2",
			params![mount_id, fs_path],
		)?;
		conn.execute(
			"DELETE FROM search_index WHERE mount_id = ?1 AND fs_path = ?2",
			params![mount_id, fs_path],
		)?;
		Ok(())
	}

	pub fn delete_by_path_prefix(&self, mount_id: &str, prefix: &str) -> Result<u64, Error> {
		let conn = self.conn.lock().unwrap();
		let like = format!("{}%", escape_like(prefix));
		conn.execute(
			"DELETE FROM search_index_fts WHERE mount_id = ?1 AND fs_path IN
				(SELECT fs_path FROM search_index WHERE mount_id = ?1 AND fs_path LIKE ?2 ESCAPE '\\')",
			params![mount_id, like],
		)?;
		let n = conn.execute(
			"DELETE FROM search_index WHERE mount_id = ?1 AND fs_path LIKE ?2 ESCAPE '\\'",
			params![mount_id, like],
		)?;
		Ok(n as u64)
	}

	/// Drops entries left over from a stale rebuild: anything tagged
	/// with a run id other than the one that just finished.
	pub fn cleanup_mount_by_run_id(&self, mount_id: &str, run_id: &str) -> Result<u64, Error> {
		let conn = self.conn.lock().unwrap();
		conn.execute(
			"DELETE FROM search_index_fts WHERE mount_id = ?1 AND fs_path IN
				(SELECT fs_path FROM search_index WHERE mount_id = ?1
					AND (index_run_id IS NULL OR index_run_id != ?2))",
			params![mount_id, run_id],
		)?;
		let n = conn.execute(
			"DELETE FROM search_index WHERE mount_id = ?1 AND (index_run_id IS NULL OR index_run_id != ?2)",
			params![mount_id, run_id],
		)?;
		Ok(n as u64)
	}

	pub fn cleanup_prefix_by_run_id(
		&self,
		mount_id: &str,
		prefix: &str,
		run_id: &str,
	) -> Result<u64, Error> {
		let conn = self.conn.lock().unwrap();
		let like = format!("{}%", escape_like(prefix));
		conn.execute(
			"DELETE FROM search_index_fts WHERE mount_id = ?1 AND fs_path IN
				(SELECT fs_path FROM search_index WHERE mount_id = ?1 AND fs_path LIKE ?2 ESCAPE '\\'
					AND (index_run_id IS NULL OR index_run_id != ?3))",
			params![mount_id, like, run_id],
		)?;
		let n = conn.execute(
			"DELETE FROM search_index WHERE mount_id = ?1 AND fs_path LIKE ?2 ESCAPE '\\'
				AND (index_run_id IS NULL OR index_run_id != ?3)",
			params![mount_id, like, run_id],
		)?;
		Ok(n as u64)
	}

	pub fn get_index_states(
		&self,
		mount_ids: &[String],
	) -> Result<HashMap<String, MountIndexState>, Error> {
		let conn = self.conn.lock().unwrap();
		let mut out = HashMap::new();
		for mount_id in mount_ids {
			let state = conn
				.query_row(
					"SELECT status, last_run_id, last_indexed_at, error_message, job_id
					 FROM mount_index_state WHERE mount_id = ?1",
					params![mount_id],
					|row| {
						let status: String = row.get(0)?;
						Ok(MountIndexState {
							status: Some(parse_status(&status)),
							last_run_id: row.get(1)?,
							last_indexed_at: row.get(2)?,
							error_message: row.get(3)?,
							job_id: row.get(4)?,
						})
					},
				)
				.optional()?
				.unwrap_or_default();
			out.insert(mount_id.clone(), state);
		}
		Ok(out)
	}

	pub fn mark_indexing(&self, mount_id: &str, job_id: &str) -> Result<(), Error> {
		let conn = self.conn.lock().unwrap();
		conn.execute(
			"INSERT INTO mount_index_state (mount_id, status, job_id)
			 VALUES (?1, 'indexing', ?2)
			 ON CONFLICT(mount_id) DO UPDATE SET status = 'indexing', job_id = excluded.job_id, error_message = NULL",
			params![mount_id, job_id],
		)?;
		Ok(())
	}

	pub fn mark_ready(&self, mount_id: &str, run_id: &str) -> Result<(), Error> {
		let conn = self.conn.lock().unwrap();
		conn.execute(
			"INSERT INTO mount_index_state (mount_id, status, last_run_id, last_indexed_at, job_id, error_message)
			 VALUES (?1, 'ready', ?2, ?3, NULL, NULL)
			 ON CONFLICT(mount_id) DO UPDATE SET
				status = 'ready', last_run_id = excluded.last_run_id,
				last_indexed_at = excluded.last_indexed_at, job_id = NULL, error_message = NULL",
			params![mount_id, run_id, now_msec() as i64],
		)?;
		Ok(())
	}

	pub fn mark_error(&self, mount_id: &str, message: &str) -> Result<(), Error> {
		let conn = self.conn.lock().unwrap();
		conn.execute(
			"INSERT INTO mount_index_state (mount_id, status, error_message, job_id)
			 VALUES (?1, 'error', ?2, NULL)
			 ON CONFLICT(mount_id) DO UPDATE SET status = 'error', error_message = excluded.error_message, job_id = NULL",
			params![mount_id, message],
		)?;
		Ok(())
	}

	pub fn clear_dirty_by_mount(&self, mount_id: &str) -> Result<u64, Error> {
		let conn = self.conn.lock().unwrap();
		let n = conn.execute("DELETE FROM dirty_queue WHERE mount_id = ?1", params![mount_id])?;
		Ok(n as u64)
	}

	/// Inserts a dirty-queue entry, coalescing with any existing entry
	/// for the same `(mount_id, fs_path, op)` — re-touching a path
	/// already queued for the same operation just refreshes the
	/// timestamp instead of piling up duplicate work.
	pub fn upsert_dirty(&self, item: DirtyQueueItem) -> Result<(), Error> {
		let conn = self.conn.lock().unwrap();
		conn.execute(
			"INSERT INTO dirty_queue (dedupe_key, mount_id, fs_path, op, enqueued_at)
			 VALUES (?1, ?2, ?3, ?4, ?5)
			 ON CONFLICT(dedupe_key) DO UPDATE SET enqueued_at = excluded.enqueued_at",
			params![
				item.dedupe_key,
				item.mount_id,
				item.fs_path,
				item.op.as_str(),
				item.enqueued_at,
			],
		)?;
		Ok(())
	}

	pub fn list_dirty_batch(&self, mount_id: &str, limit: usize) -> Result<Vec<DirtyQueueItem>, Error> {
		let conn = self.conn.lock().unwrap();
		let mut stmt = conn.prepare(
			"SELECT mount_id, fs_path, op, dedupe_key, enqueued_at FROM dirty_queue
			 WHERE mount_id = ?1
			 ORDER BY enqueued_at ASC LIMIT ?2",
		)?;
		let rows = stmt.query_map(params![mount_id, limit as i64], |row| {
			let op: String = row.get(2)?;
			Ok(DirtyQueueItem {
				mount_id: row.get(0)?,
				fs_path: row.get(1)?,
				op: if op == "delete" { DirtyOp::Delete } else { DirtyOp::Upsert },
				dedupe_key: row.get(3)?,
				enqueued_at: row.get(4)?,
			})
		})?;
		let mut out = vec![];
		for row in rows {
			out.push(row?);
		}
		Ok(out)
	}

	pub fn delete_dirty_by_keys(&self, keys: &[String]) -> Result<(), Error> {
		let conn = self.conn.lock().unwrap();
		for key in keys {
			conn.execute("DELETE FROM dirty_queue WHERE dedupe_key = ?1", params![key])?;
		}
		Ok(())
	}

	pub fn search(&self, query: &SearchQuery) -> Result<SearchResults, Error> {
		if query.query.chars().count() < MIN_QUERY_LEN {
			return Err(Error::validation(format!(
				"query must be at least {} characters",
				MIN_QUERY_LEN
			)));
		}

		let candidate_mounts: Vec<String> = match query.scope {
			SearchScope::Mount | SearchScope::Directory => query
				.mount_id
				.clone()
				.into_iter()
				.filter(|m| query.allowed_mount_ids.contains(m))
				.collect(),
			SearchScope::Global => query.allowed_mount_ids.clone(),
		};

		let conn = self.conn.lock().unwrap();
		let mut ready_mounts = vec![];
		let mut skipped_mounts = vec![];
		for mount_id in &candidate_mounts {
			let status: Option<String> = conn
				.query_row(
					"SELECT status FROM mount_index_state WHERE mount_id = ?1",
					params![mount_id],
					|row| row.get(0),
				)
				.optional()?;
			match status.as_deref() {
				Some("ready") => ready_mounts.push(mount_id.clone()),
				_ => skipped_mounts.push(mount_id.clone()),
			}
		}

		if ready_mounts.is_empty() {
			let (skipped_mounts, index_not_ready_mount_ids) = match query.scope {
				SearchScope::Global => (skipped_mounts, vec![]),
				SearchScope::Mount | SearchScope::Directory => (vec![], skipped_mounts),
			};
			return Ok(SearchResults {
				results: vec![],
				total: Some(0),
				has_more: false,
				next_cursor: None,
				index_ready: false,
				skipped_mounts,
				index_not_ready_mount_ids,
			});
		}

		let (cursor_mount, cursor_path) = match &query.cursor {
			Some(c) => {
				let mut parts = c.splitn(2, CURSOR_SEP);
				(
					parts.next().unwrap_or("").to_string(),
					parts.next().unwrap_or("").to_string(),
				)
			}
			None => (String::new(), String::new()),
		};

		let placeholders = ready_mounts
			.iter()
			.map(|_| "?")
			.collect::<Vec<_>>()
			.join(",");
		let fts_query = escape_fts(&query.query);
		let limit = if query.limit == 0 { 50 } else { query.limit };

		let mut sql = format!(
			"SELECT si.mount_id, si.fs_path, si.name, si.is_dir, si.size, si.modified_ms,
					si.mimetype, si.index_run_id, si.updated_at
			 FROM search_index_fts fts
			 JOIN search_index si ON si.mount_id = fts.mount_id AND si.fs_path = fts.fs_path
			 WHERE fts.name MATCH ? AND si.mount_id IN ({})",
			placeholders
		);
		if query.path_prefix.is_some() {
			sql.push_str(" AND si.fs_path LIKE ? ESCAPE '\\'");
		}
		sql.push_str(" AND (si.mount_id > ? OR (si.mount_id = ? AND si.fs_path > ?))");
		sql.push_str(" ORDER BY si.mount_id ASC, si.fs_path ASC LIMIT ?");

		let mut stmt = conn.prepare(&sql)?;
		let mut results = vec![];

		// rusqlite's `params_from_iter` needs a single homogeneous
		// collection; the predicate list is small and fixed-shape, so
		// bind positionally instead.
		let like_prefix = query
			.path_prefix
			.as_ref()
			.map(|p| format!("{}%", escape_like(p)));

		let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(fts_query.clone())];
		for m in &ready_mounts {
			bound.push(Box::new(m.clone()));
		}
		if let Some(p) = &like_prefix {
			bound.push(Box::new(p.clone()));
		}
		bound.push(Box::new(cursor_mount.clone()));
		bound.push(Box::new(cursor_mount.clone()));
		bound.push(Box::new(cursor_path.clone()));
		bound.push(Box::new((limit + 1) as i64));

		let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
		let rows = stmt.query_map(refs.as_slice(), |row| {
			Ok(SearchIndexEntry {
				mount_id: row.get(0)?,
				fs_path: row.get(1)?,
				name: row.get(2)?,
				is_dir: row.get(3)?,
				size: row.get(4)?,
				modified_ms: row.get(5)?,
				mimetype: row.get(6)?,
				index_run_id: row.get(7)?,
				updated_at: row.get(8)?,
			})
		})?;
		for row in rows {
			results.push(row?);
		}

		let has_more = results.len() > limit;
		results.truncate(limit);
		let next_cursor = if has_more {
			results
				.last()
				.map(|e| format!("{}{}{}", e.mount_id, CURSOR_SEP, e.fs_path))
		} else {
			None
		};

		Ok(SearchResults {
			results,
			total: None,
			has_more,
			next_cursor,
			index_ready: true,
			skipped_mounts,
			index_not_ready_mount_ids: vec![],
		})
	}
}

fn parse_status(s: &str) -> MountIndexStatus {
	match s {
		"indexing" => MountIndexStatus::Indexing,
		"ready" => MountIndexStatus::Ready,
		"error" => MountIndexStatus::Error,
		_ => MountIndexStatus::NotReady,
	}
}

fn escape_like(s: &str) -> String {
	s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn escape_fts(s: &str) -> String {
	format!("\"{}\"", s.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(mount: &str, path: &str, name: &str) -> SearchIndexEntry {
		SearchIndexEntry {
			mount_id: mount.into(),
			fs_path: path.into(),
			name: name.into(),
			is_dir: false,
			size: 10,
			modified_ms: 0,
			mimetype: None,
			index_run_id: Some("run1".into()),
			updated_at: 0,
		}
	}

	fn open_tmp() -> SearchIndexStore {
		let dir = mktemp::Temp::new_dir().unwrap();
		SearchIndexStore::open(dir.join("index.db")).unwrap()
	}

	#[test]
	fn search_rejects_short_queries() {
		let store = open_tmp();
		let err = store
			.search(&SearchQuery {
				query: "ab".into(),
				allowed_mount_ids: vec!["m1".into()],
				scope: SearchScope::Global,
				limit: 10,
				..Default::default()
			})
			.unwrap_err();
		assert_eq!(err.kind(), "Validation");
	}

	#[test]
	fn search_skips_mounts_not_ready() {
		let store = open_tmp();
		let res = store
			.search(&SearchQuery {
				query: "report".into(),
				allowed_mount_ids: vec!["m1".into()],
				scope: SearchScope::Global,
				limit: 10,
				..Default::default()
			})
			.unwrap();
		assert!(!res.index_ready);
		assert_eq!(res.skipped_mounts, vec!["m1".to_string()]);
	}

	#[test]
	fn search_finds_contains_match_after_ready() {
		let store = open_tmp();
		store
			.upsert_entries(&[entry("m1", "/docs/report.pdf", "report.pdf")])
			.unwrap();
		store.mark_ready("m1", "run1").unwrap();

		let res = store
			.search(&SearchQuery {
				query: "epo".into(),
				allowed_mount_ids: vec!["m1".into()],
				scope: SearchScope::Global,
				limit: 10,
				..Default::default()
			})
			.unwrap();
		assert!(res.index_ready);
		assert_eq!(res.results.len(), 1);
		assert_eq!(res.results[0].fs_path, "/docs/report.pdf");
	}

	#[test]
	fn get_entry_returns_none_for_missing_path() {
		let store = open_tmp();
		assert!(store.get_entry("m1", "/nope").unwrap().is_none());
	}

	#[test]
	fn list_children_returns_direct_children_only_directory_first() {
		let store = open_tmp();
		store
			.upsert_entries(&[
				SearchIndexEntry { is_dir: true, ..entry("m1", "/a", "a") },
				entry("m1", "/a/b.txt", "b.txt"),
				entry("m1", "/a/b/c.txt", "c.txt"),
				entry("m1", "/other.txt", "other.txt"),
			])
			.unwrap();

		let children = store.list_children("m1", "/a").unwrap();
		let paths: Vec<&str> = children.iter().map(|e| e.fs_path.as_str()).collect();
		assert_eq!(paths, vec!["/a/b.txt"]);
	}

	#[test]
	fn cleanup_by_run_id_drops_stale_entries() {
		let store = open_tmp();
		store
			.upsert_entries(&[entry("m1", "/a.txt", "a.txt")])
			.unwrap();
		// A second rebuild run that never re-touches /a.txt.
		let dropped = store.cleanup_mount_by_run_id("m1", "run2").unwrap();
		assert_eq!(dropped, 1);
	}

	#[test]
	fn dirty_queue_coalesces_on_dedupe_key() {
		let store = open_tmp();
		let key = crate::model::dirty_dedupe_key("m1", "/a.txt", DirtyOp::Upsert);
		store
			.upsert_dirty(DirtyQueueItem {
				mount_id: "m1".into(),
				fs_path: "/a.txt".into(),
				op: DirtyOp::Upsert,
				dedupe_key: key.clone(),
				enqueued_at: 1,
			})
			.unwrap();
		store
			.upsert_dirty(DirtyQueueItem {
				mount_id: "m1".into(),
				fs_path: "/a.txt".into(),
				op: DirtyOp::Upsert,
				dedupe_key: key,
				enqueued_at: 2,
			})
			.unwrap();
		let batch = store.list_dirty_batch("m1", 10).unwrap();
		assert_eq!(batch.len(), 1);
		assert_eq!(batch[0].enqueued_at, 2);
	}
}
