//! Canonical alert model. Every ingestion adapter reduces its payload to a
//! [`CanonicalAlert`]; everything downstream of the normalizers consumes
//! only this shape.

use chrono::{DateTime, Datelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound on embed fields carried by one alert.
pub const MAX_FIELDS: usize = 25;
/// Upper bound on a single field value.
pub const MAX_FIELD_VALUE_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for AlertStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "firing" => Ok(AlertStatus::Firing),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(crate::Error::Parse(format!("unknown alert status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Warning,
    Info,
}

impl Severity {
    /// Parse a source-supplied severity label. Anything outside the known
    /// set maps to the default.
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "warning" => Severity::Warning,
            "info" => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Warning
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Severity {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(crate::Error::Parse(format!("unknown severity: {other}"))),
        }
    }
}

/// The single internal payload shape constructed by the normalizers and
/// consumed by the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalAlert {
    /// Stable identifier from the source; unique per logical alert.
    pub alert_id: String,
    /// Secondary dimension (host, database instance, ...).
    pub resource: Option<String>,
    /// Configuration lookup key.
    pub rule_name: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Ordered (name, value) label/annotation pairs, already bounded.
    pub fields: Vec<(String, String)>,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Resolved chat destination, filled in by the processor from the
    /// matched rule.
    pub channel_id: Option<String>,
    /// Ingestion origin tag, e.g. `grafana` or `sns`.
    pub source: String,
}

impl CanonicalAlert {
    /// Key under which the incident state for this alert lives.
    pub fn incident_key(&self) -> String {
        incident_key(&self.alert_id, self.resource.as_deref())
    }

    /// Append a field, respecting the count and value-length bounds.
    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.fields.len() >= MAX_FIELDS {
            return;
        }
        let value: String = value.into();
        self.fields.push((name.into(), truncate(&value, MAX_FIELD_VALUE_LEN)));
    }
}

pub fn incident_key(alert_id: &str, resource: Option<&str>) -> String {
    format!("{}:{}", alert_id, resource.unwrap_or("default"))
}

lazy_static! {
    // Broken template artifacts leaking from upstream formatters,
    // e.g. "%!f(<nil>)" or "%!s(<nil>)".
    static ref TEMPLATE_ARTIFACT: Regex = Regex::new(r"%!\w?\(<nil>\)").unwrap();
}

/// Replace broken template artifacts with a readable placeholder.
pub fn sanitize(text: &str) -> String {
    TEMPLATE_ARTIFACT.replace_all(text, "N/A").into_owned()
}

/// Parse a source timestamp, treating empty strings and the year-0001
/// zero sentinel as absent.
pub fn meaningful_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let ts = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
    if ts.year() <= 1 {
        return None;
    }
    Some(ts)
}

/// Synthesize a stable-enough fingerprint when the source supplies none.
pub fn synthesize_fingerprint(rule_name: &str, started_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule_name.as_bytes());
    hasher.update(started_at.to_rfc3339().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive a fingerprint from a stable identity so repeated firings of the
/// same logical alert deduplicate across deliveries.
pub fn fingerprint_from_identity(rule_name: &str, resource: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule_name.as_bytes());
    hasher.update(b":");
    hasher.update(resource.unwrap_or("default").as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        value.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_key_defaults_resource() {
        assert_eq!(incident_key("fp1", None), "fp1:default");
        assert_eq!(incident_key("fp1", Some("db-3")), "fp1:db-3");
    }

    #[test]
    fn sanitize_replaces_template_artifacts() {
        assert_eq!(sanitize("CPU at %!f(<nil>) percent"), "CPU at N/A percent");
        assert_eq!(sanitize("%!s(<nil>) and %!(<nil>)"), "N/A and N/A");
        assert_eq!(sanitize("plain text"), "plain text");
    }

    #[test]
    fn sentinel_timestamps_are_absent() {
        assert!(meaningful_timestamp(None).is_none());
        assert!(meaningful_timestamp(Some("")).is_none());
        assert!(meaningful_timestamp(Some("0001-01-01T00:00:00Z")).is_none());
        assert!(meaningful_timestamp(Some("not a timestamp")).is_none());
        let ts = meaningful_timestamp(Some("2025-06-01T12:00:00Z")).unwrap();
        assert_eq!(ts.year(), 2025);
    }

    #[test]
    fn severity_label_fallback() {
        assert_eq!(Severity::from_label("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_label("page"), Severity::Warning);
        assert_eq!(Severity::default(), Severity::Warning);
    }

    #[test]
    fn field_bounds_enforced() {
        let mut alert = CanonicalAlert {
            alert_id: "fp".into(),
            resource: None,
            rule_name: "r".into(),
            status: AlertStatus::Firing,
            severity: Severity::Warning,
            title: "t".into(),
            description: "d".into(),
            fields: Vec::new(),
            started_at: Utc::now(),
            resolved_at: None,
            channel_id: None,
            source: "test".into(),
        };
        for i in 0..30 {
            alert.push_field(format!("f{i}"), "x".repeat(2000));
        }
        assert_eq!(alert.fields.len(), MAX_FIELDS);
        assert_eq!(alert.fields[0].1.len(), MAX_FIELD_VALUE_LEN);
    }

    #[test]
    fn identity_fingerprint_is_stable() {
        let a = fingerprint_from_identity("HighCPU", Some("host-1"));
        let b = fingerprint_from_identity("HighCPU", Some("host-1"));
        let c = fingerprint_from_identity("HighCPU", Some("host-2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
