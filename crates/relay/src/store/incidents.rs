use std::sync::Arc;
use tracing::warn;

use crate::store::{IncidentRecord, KvStore, INCIDENT_RECORD_TTL};
use crate::Result;

/// Incident records in the key-value store, keyed
/// `alert:<alertId>:<resource|"default">`.
///
/// `put` refreshes the 7-day TTL but never stamps `updated_at` itself;
/// callers own that field. The escalation loop depends on `updated_at`
/// staying pinned to the last user-visible emission.
pub struct IncidentStore {
    kv: Arc<dyn KvStore>,
}

fn kv_key(incident_key: &str) -> String {
    format!("alert:{incident_key}")
}

impl IncidentStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self, incident_key: &str) -> Result<Option<IncidentRecord>> {
        let Some(raw) = self.kv.get(&kv_key(incident_key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    component = "incident_store",
                    incident_key, error = %e,
                    "Dropping undecodable incident record"
                );
                Ok(None)
            }
        }
    }

    pub async fn put(&self, incident_key: &str, record: &IncidentRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.kv.set(&kv_key(incident_key), &raw, INCIDENT_RECORD_TTL).await
    }

    pub async fn delete(&self, incident_key: &str) -> Result<()> {
        self.kv.delete(&kv_key(incident_key)).await
    }

    /// Enumerate all live incidents as (incident key, record) pairs.
    /// Backed by an incremental cursor scan; keys that disappear between
    /// the scan and the read are skipped.
    pub async fn list(&self) -> Result<Vec<(String, IncidentRecord)>> {
        let keys = self.kv.scan("alert:*").await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(incident_key) = key.strip_prefix("alert:") else {
                continue;
            };
            if let Some(record) = self.get(incident_key).await? {
                records.push((incident_key.to_string(), record));
            }
        }
        Ok(records)
    }
}
