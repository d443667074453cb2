use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// TTL-scoped dedup of (session_key, content) pairs, so a duplicate
/// message delivered within the window replays the stored reply instead
/// of spawning a second task.
pub struct IdempotencyCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

struct CacheEntry {
    task_id: String,
    result: String,
    inserted: Instant,
}

fn cache_key(session_key: &str, content: &str) -> String {
    let digest = Sha256::digest(format!("{}|{}", session_key, content).as_bytes());
    hex::encode(&digest[..16])
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Stored (task_id, result) iff seen within the TTL.
    pub fn get(&self, session_key: &str, content: &str) -> Option<(String, String)> {
        let key = cache_key(session_key, content);
        let map = self.inner.lock().expect("idempotency lock poisoned");
        let entry = map.get(&key)?;
        if entry.inserted.elapsed() >= self.ttl {
            return None;
        }
        Some((entry.task_id.clone(), entry.result.clone()))
    }

    /// Store (overwrite) the reply for a pair.
    pub fn set(&self, session_key: &str, content: &str, task_id: &str, result: &str) {
        let key = cache_key(session_key, content);
        let mut map = self.inner.lock().expect("idempotency lock poisoned");
        map.insert(
            key,
            CacheEntry {
                task_id: task_id.to_string(),
                result: result.to_string(),
                inserted: Instant::now(),
            },
        );
    }

    /// Evict expired entries. The loop calls this after each task.
    pub fn cleanup(&self) {
        let mut map = self.inner.lock().expect("idempotency lock poisoned");
        map.retain(|_, e| e.inserted.elapsed() < self.ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_within_ttl() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        cache.set("s", "hi", "task-1", "hello back");
        let (task_id, result) = cache.get("s", "hi").unwrap();
        assert_eq!(task_id, "task-1");
        assert_eq!(result, "hello back");
    }

    #[test]
    fn distinct_pairs_do_not_collide() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        cache.set("s1", "hi", "t1", "r1");
        cache.set("s2", "hi", "t2", "r2");
        cache.set("s1", "bye", "t3", "r3");
        assert_eq!(cache.get("s1", "hi").unwrap().1, "r1");
        assert_eq!(cache.get("s2", "hi").unwrap().1, "r2");
        assert_eq!(cache.get("s1", "bye").unwrap().1, "r3");
        assert!(cache.get("s2", "bye").is_none());
    }

    #[test]
    fn zero_ttl_never_hits() {
        let cache = IdempotencyCache::new(Duration::ZERO);
        cache.set("s", "hi", "t1", "r1");
        assert!(cache.get("s", "hi").is_none());
    }

    #[test]
    fn set_overwrites() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        cache.set("s", "hi", "t1", "old");
        cache.set("s", "hi", "t2", "new");
        let (task_id, result) = cache.get("s", "hi").unwrap();
        assert_eq!(task_id, "t2");
        assert_eq!(result, "new");
    }

    #[test]
    fn cleanup_evicts_expired() {
        let cache = IdempotencyCache::new(Duration::ZERO);
        cache.set("s", "a", "t1", "r1");
        cache.set("s", "b", "t2", "r2");
        assert_eq!(cache.len(), 2);
        cache.cleanup();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn key_is_sha256_prefix() {
        let key = cache_key("s", "hi");
        // 16 bytes, hex-encoded.
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, cache_key("s", "hi"));
        assert_ne!(key, cache_key("s", "hi!"));
    }
}
