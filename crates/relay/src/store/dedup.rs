use std::sync::Arc;
use std::time::Duration;

use crate::store::KvStore;
use crate::Result;

/// Outcome of the atomic test-and-set on a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    New,
    Duplicate,
}

/// TTL set of recently-seen fingerprints. Advisory only: the processor
/// never consults it for resolved events.
pub struct DedupStore {
    kv: Arc<dyn KvStore>,
}

fn dedup_key(alert_id: &str) -> String {
    format!("dedup:{alert_id}")
}

impl DedupStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Insert the fingerprint if absent. An existing entry keeps its TTL.
    pub async fn test_and_set(&self, alert_id: &str, ttl_ms: u64) -> Result<DedupOutcome> {
        let ttl = Duration::from_millis(ttl_ms.max(1000));
        let inserted = self.kv.set_nx(&dedup_key(alert_id), "1", ttl).await?;
        Ok(if inserted {
            DedupOutcome::New
        } else {
            DedupOutcome::Duplicate
        })
    }

    pub async fn clear(&self, alert_id: &str) -> Result<()> {
        self.kv.delete(&dedup_key(alert_id)).await
    }

    /// Push the suppression window out, e.g. after an acknowledge.
    pub async fn extend(&self, alert_id: &str, ttl_ms: u64) -> Result<()> {
        let ttl = Duration::from_millis(ttl_ms.max(1000));
        let key = dedup_key(alert_id);
        // The entry may have lapsed already; recreate it so the extension
        // actually suppresses.
        if !self.kv.set_nx(&key, "1", ttl).await? {
            self.kv.expire(&key, ttl).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryKvStore;
    use chrono::Utc;

    fn dedup() -> (Arc<ManualClock>, DedupStore, Arc<MemoryKvStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let kv = Arc::new(MemoryKvStore::new(clock.clone()));
        (clock.clone(), DedupStore::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn duplicate_within_window() {
        let (_, store, _) = dedup();
        assert_eq!(store.test_and_set("fp1", 300_000).await.unwrap(), DedupOutcome::New);
        assert_eq!(
            store.test_and_set("fp1", 300_000).await.unwrap(),
            DedupOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn new_again_after_window_expires() {
        let (clock, store, _) = dedup();
        store.test_and_set("fp1", 300_000).await.unwrap();
        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(store.test_and_set("fp1", 300_000).await.unwrap(), DedupOutcome::New);
    }

    #[tokio::test]
    async fn clear_removes_fingerprint() {
        let (_, store, kv) = dedup();
        store.test_and_set("fp1", 300_000).await.unwrap();
        store.clear("fp1").await.unwrap();
        assert!(!kv.contains("dedup:fp1"));
        assert_eq!(store.test_and_set("fp1", 300_000).await.unwrap(), DedupOutcome::New);
    }

    #[tokio::test]
    async fn extend_recreates_lapsed_entry() {
        let (clock, store, kv) = dedup();
        store.test_and_set("fp1", 1000).await.unwrap();
        clock.advance(chrono::Duration::seconds(2));
        store.extend("fp1", 600_000).await.unwrap();
        assert!(kv.contains("dedup:fp1"));
        clock.advance(chrono::Duration::seconds(599));
        assert!(kv.contains("dedup:fp1"));
    }
}
