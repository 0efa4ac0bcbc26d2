use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::alert::Severity;

/// Incident records live this long in the key-value store; refreshed on
/// every put.
pub const INCIDENT_RECORD_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentState {
    Firing,
    Acknowledged,
    Resolved,
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentState::Firing => "firing",
            IncidentState::Acknowledged => "acknowledged",
            IncidentState::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

impl FromStr for IncidentState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "firing" => Ok(IncidentState::Firing),
            "acknowledged" => Ok(IncidentState::Acknowledged),
            "resolved" => Ok(IncidentState::Resolved),
            other => Err(crate::Error::Parse(format!("unknown incident state: {other}"))),
        }
    }
}

/// Per-incident lifecycle state, keyed by `alertId:resource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub alert_id: String,
    pub resource: Option<String>,
    pub message_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub state: IncidentState,
    pub rule_name: String,
    pub severity: Severity,
    /// Last user-visible emission time. The escalation loop measures its
    /// thresholds against this and must never advance it.
    pub updated_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Index of the next responder to ping in the rule's mention list.
    pub mention_level: u32,
}

/// Append-only audit row for every lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub alert_id: String,
    pub resource: Option<String>,
    pub status: String,
    pub message_id: Option<String>,
    pub channel_id: Option<String>,
    pub severity: Severity,
    pub rule_name: String,
    pub source: String,
    pub acknowledged_by: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TroubleshootingGuide {
    pub rule_name: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}
