//! Webhook ingress: Grafana/Alertmanager-style batch payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::alert::{
    meaningful_timestamp, sanitize, synthesize_fingerprint, AlertStatus, CanonicalAlert, Severity,
};
use crate::clock::Clock;
use crate::rules::ConfigService;

pub const SOURCE_TAG: &str = "grafana";

/// Labels consulted, in order, for the secondary resource dimension.
const RESOURCE_LABELS: [&str; 3] = ["instance", "DBInstanceIdentifier", "resource"];

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub alerts: Vec<WebhookAlert>,
    #[serde(default, rename = "groupLabels")]
    pub group_labels: HashMap<String, String>,
    #[serde(default, rename = "commonLabels")]
    pub common_labels: HashMap<String, String>,
    #[serde(default, rename = "commonAnnotations")]
    pub common_annotations: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WebhookAlert {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default, rename = "startsAt")]
    pub starts_at: Option<String>,
    #[serde(default, rename = "endsAt")]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

pub struct WebhookNormalizer {
    rules: Arc<ConfigService>,
    clock: Arc<dyn Clock>,
}

impl WebhookNormalizer {
    pub fn new(rules: Arc<ConfigService>, clock: Arc<dyn Clock>) -> Self {
        Self { rules, clock }
    }

    pub async fn normalize(&self, payload: &WebhookPayload) -> Vec<CanonicalAlert> {
        let mut alerts = Vec::with_capacity(payload.alerts.len());
        for item in &payload.alerts {
            alerts.push(self.normalize_item(payload, item).await);
        }
        alerts
    }

    async fn normalize_item(&self, payload: &WebhookPayload, item: &WebhookAlert) -> CanonicalAlert {
        // Per-item labels win over the batch-level common ones.
        let mut labels = payload.common_labels.clone();
        labels.extend(item.labels.clone());
        let mut annotations = payload.common_annotations.clone();
        annotations.extend(item.annotations.clone());

        let rule_name = labels
            .get("alertname")
            .or_else(|| labels.get("alert_type"))
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| "default".to_string());

        let resource = RESOURCE_LABELS
            .iter()
            .find_map(|key| labels.get(*key))
            .filter(|v| !v.is_empty())
            .cloned();

        let status = if item.status == "resolved" {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        };

        let severity = labels
            .get("severity")
            .map(|label| Severity::from_label(label))
            .unwrap_or_default();

        let started_at = meaningful_timestamp(item.starts_at.as_deref())
            .unwrap_or_else(|| self.clock.now());
        let resolved_at = meaningful_timestamp(item.ends_at.as_deref());

        let alert_id = item
            .fingerprint
            .clone()
            .filter(|fp| !fp.is_empty())
            .unwrap_or_else(|| synthesize_fingerprint(&rule_name, started_at));

        let description = annotations
            .get("summary")
            .or_else(|| annotations.get("description"))
            .map(|text| sanitize(text))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "No description".to_string());

        let mut alert = CanonicalAlert {
            alert_id,
            resource,
            rule_name: rule_name.clone(),
            status,
            severity,
            title: rule_name.clone(),
            description,
            fields: Vec::new(),
            started_at,
            resolved_at,
            channel_id: None,
            source: SOURCE_TAG.to_string(),
        };

        let (important, hidden) = match self.rules.lookup(&rule_name).await {
            Some(rule) => (rule.important_labels, rule.hidden_labels),
            None => (Vec::new(), Vec::new()),
        };

        // Highlighted labels first, in the order the rule lists them.
        let key_info: Vec<String> = important
            .iter()
            .filter_map(|key| labels.get(key).map(|value| format!("{key}: {value}")))
            .collect();
        if !key_info.is_empty() {
            alert.push_field("Key info", key_info.join("\n"));
        }

        let mut remaining: Vec<(&String, &String)> = labels
            .iter()
            .filter(|(key, _)| !hidden.contains(key) && !important.contains(key))
            .collect();
        remaining.sort();
        for (key, value) in remaining {
            alert.push_field(key.clone(), value.clone());
        }

        let mut annotation_fields: Vec<(&String, &String)> = annotations.iter().collect();
        annotation_fields.sort();
        for (key, value) in annotation_fields {
            alert.push_field(key.clone(), sanitize(value));
        }

        alert
    }
}
