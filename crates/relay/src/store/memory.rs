use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::store::KvStore;
use crate::Result;

/// In-memory [`KvStore`] for tests. TTLs are evaluated against the
/// injected [`Clock`], so suppression windows expire when a test clock
/// advances rather than in wall time.
pub struct MemoryKvStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl MemoryKvStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap();
        entries.get(key).is_some_and(|e| e.expires_at > now)
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(1));
        self.clock.now() + std::cmp::max(ttl, chrono::Duration::seconds(1))
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Only the trailing-star form the stores actually use.
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).is_some_and(|e| e.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: deadline,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: deadline,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = deadline;
        }
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(k, e)| e.expires_at > now && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryKvStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let kv = MemoryKvStore::new(clock.clone());
        (clock, kv)
    }

    #[tokio::test]
    async fn set_nx_is_first_writer_wins() {
        let (_, kv) = store();
        assert!(kv.set_nx("k", "a", Duration::from_secs(60)).await.unwrap());
        assert!(!kv.set_nx("k", "b", Duration::from_secs(60)).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let (clock, kv) = store();
        kv.set("k", "v", Duration::from_secs(60)).await.unwrap();
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.set_nx("k", "w", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn scan_matches_prefix() {
        let (_, kv) = store();
        kv.set("alert:a:default", "1", Duration::from_secs(60)).await.unwrap();
        kv.set("alert:b:default", "1", Duration::from_secs(60)).await.unwrap();
        kv.set("dedup:a", "1", Duration::from_secs(60)).await.unwrap();
        let mut keys = kv.scan("alert:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["alert:a:default", "alert:b:default"]);
    }
}
