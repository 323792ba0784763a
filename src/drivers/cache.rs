//! A small in-process cache memoizing backend "get-file-info" lookups
//! (TTL ≈10 min, capacity ≈500, LRU eviction) so that Range-read
//! previews of the same object don't storm the backend.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::capability::ItemStat;

pub const DEFAULT_CAPACITY: usize = 500;
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

pub struct StatCache {
	inner: Mutex<LruCache<String, (Instant, ItemStat)>>,
	ttl: Duration,
}

impl StatCache {
	pub fn new(capacity: usize, ttl: Duration) -> Self {
		let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
		Self {
			inner: Mutex::new(LruCache::new(capacity)),
			ttl,
		}
	}

	fn key(storage_config_id: &str, path: &str) -> String {
		format!("{}\0{}", storage_config_id, path)
	}

	pub fn get(&self, storage_config_id: &str, path: &str) -> Option<ItemStat> {
		let key = Self::key(storage_config_id, path);
		let mut inner = self.inner.lock().unwrap();
		let hit = inner.get(&key).and_then(|(at, stat)| {
			if at.elapsed() < self.ttl {
				Some(stat.clone())
			} else {
				None
			}
		});
		if hit.is_none() {
			inner.pop(&key);
		}
		hit
	}

	pub fn put(&self, storage_config_id: &str, path: &str, stat: ItemStat) {
		let key = Self::key(storage_config_id, path);
		self.inner.lock().unwrap().put(key, (Instant::now(), stat));
	}

	pub fn invalidate(&self, storage_config_id: &str, path: &str) {
		let key = Self::key(storage_config_id, path);
		self.inner.lock().unwrap().pop(&key);
	}
}

impl Default for StatCache {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn stat(path: &str) -> ItemStat {
		ItemStat {
			path: path.into(),
			name: path.into(),
			is_dir: false,
			size: 1,
			content_type: None,
			etag: None,
			last_modified: 0,
		}
	}

	#[test]
	fn caches_and_evicts_by_ttl() {
		let cache = StatCache::new(10, Duration::from_millis(10));
		cache.put("cfg1", "/a.txt", stat("/a.txt"));
		assert!(cache.get("cfg1", "/a.txt").is_some());
		std::thread::sleep(Duration::from_millis(20));
		assert!(cache.get("cfg1", "/a.txt").is_none());
	}

	#[test]
	fn invalidate_removes_entry() {
		let cache = StatCache::new(10, Duration::from_secs(60));
		cache.put("cfg1", "/a.txt", stat("/a.txt"));
		cache.invalidate("cfg1", "/a.txt");
		assert!(cache.get("cfg1", "/a.txt").is_none());
	}
}
