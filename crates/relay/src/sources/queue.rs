//! Queue ingress: long-polls an SQS-compatible queue of SNS notification
//! envelopes.

use aws_config::BehaviorVersion;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::alert::{
    fingerprint_from_identity, meaningful_timestamp, sanitize, AlertStatus, CanonicalAlert,
    Severity,
};
use crate::clock::Clock;
use crate::metrics::QUEUE_PROCESSED_TOTAL;
use crate::processor::Processor;
use crate::{Error, Result};

pub const SOURCE_TAG: &str = "sns";

const WAIT_TIME_SECONDS: i32 = 20;
const MAX_BATCH: i32 = 10;
const VISIBILITY_TIMEOUT_SECONDS: i32 = 60;
/// Back off this long after a receive error before polling again.
const RECEIVE_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
pub struct SnsEnvelope {
    #[serde(default, rename = "MessageId")]
    pub message_id: String,
    #[serde(default, rename = "Subject")]
    pub subject: Option<String>,
    #[serde(default, rename = "Message")]
    pub message: String,
    #[serde(default, rename = "Timestamp")]
    pub timestamp: Option<String>,
    #[serde(default, rename = "MessageAttributes")]
    pub message_attributes: HashMap<String, SnsAttribute>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SnsAttribute {
    #[serde(default, rename = "Type")]
    pub kind: String,
    #[serde(default, rename = "Value")]
    pub value: String,
}

impl SnsEnvelope {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.message_attributes
            .get(name)
            .map(|attr| attr.value.as_str())
            .filter(|value| !value.is_empty())
    }
}

pub struct QueueNormalizer {
    clock: Arc<dyn Clock>,
}

impl QueueNormalizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn normalize(&self, envelope: &SnsEnvelope) -> CanonicalAlert {
        let body: JsonValue = serde_json::from_str(&envelope.message).unwrap_or(JsonValue::Null);

        let event_name = envelope
            .subject
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| envelope.attribute("event_type"))
            .or_else(|| envelope.attribute("rule_name"))
            .or_else(|| body.get("detail-type").and_then(JsonValue::as_str))
            .or_else(|| body.get("source").and_then(JsonValue::as_str))
            .or_else(|| body.get("eventName").and_then(JsonValue::as_str))
            .unwrap_or(SOURCE_TAG);
        let rule_name: String = event_name
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();

        let resolved = body.get("NewStateValue").and_then(JsonValue::as_str) == Some("OK")
            || body
                .pointer("/detail/state/value")
                .and_then(JsonValue::as_str)
                == Some("OK");

        let resource = body
            .get("AlarmName")
            .and_then(JsonValue::as_str)
            .or_else(|| body.pointer("/detail/resource").and_then(JsonValue::as_str))
            .or_else(|| {
                body.pointer("/detail/resources")
                    .and_then(JsonValue::as_array)
                    .and_then(|arr| arr.iter().find_map(JsonValue::as_str))
            })
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let severity = envelope
            .attribute("severity")
            .map(Severity::from_label)
            .unwrap_or_default();

        let started_at = meaningful_timestamp(envelope.timestamp.as_deref())
            .unwrap_or_else(|| self.clock.now());

        let description = body
            .get("AlarmDescription")
            .and_then(JsonValue::as_str)
            .or_else(|| body.get("NewStateReason").and_then(JsonValue::as_str))
            .map(sanitize)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "No description".to_string());

        let mut alert = CanonicalAlert {
            alert_id: fingerprint_from_identity(&rule_name, resource.as_deref()),
            resource,
            rule_name: rule_name.clone(),
            status: if resolved {
                AlertStatus::Resolved
            } else {
                AlertStatus::Firing
            },
            severity,
            title: rule_name,
            description,
            fields: Vec::new(),
            started_at,
            resolved_at: resolved.then_some(started_at),
            channel_id: None,
            source: SOURCE_TAG.to_string(),
        };

        for key in ["AlarmName", "NewStateValue", "NewStateReason", "Region"] {
            if let Some(value) = body.get(key).and_then(JsonValue::as_str) {
                alert.push_field(key, sanitize(value));
            }
        }

        alert
    }
}

/// Best-effort region from a queue URL like
/// `https://sqs.us-east-1.amazonaws.com/123/queue`.
pub fn detect_region(queue_url: &str) -> Option<String> {
    let host = queue_url.split("//").nth(1)?.split('/').next()?;
    let mut parts = host.split('.');
    if parts.next()? != "sqs" {
        return None;
    }
    parts.next().map(str::to_string)
}

pub struct QueuePoller {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    normalizer: QueueNormalizer,
    processor: Arc<Processor>,
}

impl QueuePoller {
    pub async fn new(
        queue_url: &str,
        region: Option<String>,
        processor: Arc<Processor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let region = region.or_else(|| detect_region(queue_url));
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        Self {
            client: aws_sdk_sqs::Client::new(&config),
            queue_url: queue_url.to_string(),
            normalizer: QueueNormalizer::new(clock),
            processor,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(component = "queue", queue_url = %self.queue_url, "Starting queue poller");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self
                    .client
                    .receive_message()
                    .queue_url(&self.queue_url)
                    .max_number_of_messages(MAX_BATCH)
                    .wait_time_seconds(WAIT_TIME_SECONDS)
                    .visibility_timeout(VISIBILITY_TIMEOUT_SECONDS)
                    .send() =>
                {
                    match result {
                        Ok(output) => {
                            for message in output.messages() {
                                self.handle(message).await;
                            }
                        }
                        Err(e) => {
                            error!(component = "queue", error = %e, "Failed to receive messages");
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
        info!(component = "queue", "Queue poller stopped");
    }

    /// Process one message. It is only deleted on success; failures let
    /// the visibility timeout lapse so the message reappears for retry.
    async fn handle(&self, message: &aws_sdk_sqs::types::Message) {
        let outcome = self.process_body(message.body()).await;
        match outcome {
            Ok(()) => {
                if let Some(receipt) = message.receipt_handle() {
                    match self
                        .client
                        .delete_message()
                        .queue_url(&self.queue_url)
                        .receipt_handle(receipt)
                        .send()
                        .await
                    {
                        Ok(_) => QUEUE_PROCESSED_TOTAL.inc(),
                        Err(e) => {
                            warn!(component = "queue", error = %e, "Failed to delete processed message");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(component = "queue", error = %e, "Message processing failed, leaving for retry");
            }
        }
    }

    async fn process_body(&self, body: Option<&str>) -> Result<()> {
        let body = body.ok_or_else(|| Error::Parse("empty queue message".to_string()))?;
        let envelope: SnsEnvelope = serde_json::from_str(body)
            .map_err(|e| Error::Parse(format!("not an SNS envelope: {e}")))?;
        let alert = self.normalizer.normalize(&envelope);
        self.processor.process(alert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;
    use serde_json::json;

    fn normalizer() -> QueueNormalizer {
        QueueNormalizer::new(Arc::new(ManualClock::new(Utc::now())))
    }

    fn envelope(value: serde_json::Value) -> SnsEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn event_name_derivation_order() {
        let subject = envelope(json!({
            "Subject": "Disk Full Alarm",
            "Message": "{\"detail-type\": \"ignored\"}"
        }));
        assert_eq!(normalizer().normalize(&subject).rule_name, "Disk_Full_Alarm");

        let attr = envelope(json!({
            "Message": "{}",
            "MessageAttributes": {"event_type": {"Type": "String", "Value": "HighCPU"}}
        }));
        assert_eq!(normalizer().normalize(&attr).rule_name, "HighCPU");

        let detail_type = envelope(json!({
            "Message": "{\"detail-type\": \"GuardDuty Finding\"}"
        }));
        assert_eq!(
            normalizer().normalize(&detail_type).rule_name,
            "GuardDuty_Finding"
        );

        let fallback = envelope(json!({"Message": "not json"}));
        assert_eq!(normalizer().normalize(&fallback).rule_name, "sns");
    }

    #[test]
    fn ok_state_resolves() {
        let alarm = envelope(json!({
            "Subject": "CPUAlarm",
            "Message": "{\"NewStateValue\": \"OK\", \"AlarmName\": \"cpu-high\"}"
        }));
        let alert = normalizer().normalize(&alarm);
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert!(alert.resolved_at.is_some());

        let event = envelope(json!({
            "Subject": "CPUAlarm",
            "Message": "{\"detail\": {\"state\": {\"value\": \"OK\"}}}"
        }));
        assert_eq!(normalizer().normalize(&event).status, AlertStatus::Resolved);

        let firing = envelope(json!({
            "Subject": "CPUAlarm",
            "Message": "{\"NewStateValue\": \"ALARM\"}"
        }));
        assert_eq!(normalizer().normalize(&firing).status, AlertStatus::Firing);
    }

    #[test]
    fn resource_extraction_chain() {
        let alarm = envelope(json!({
            "Subject": "A",
            "Message": "{\"AlarmName\": \"db-alarm\"}"
        }));
        assert_eq!(normalizer().normalize(&alarm).resource.as_deref(), Some("db-alarm"));

        let detail = envelope(json!({
            "Subject": "A",
            "Message": "{\"detail\": {\"resource\": \"i-1234\"}}"
        }));
        assert_eq!(normalizer().normalize(&detail).resource.as_deref(), Some("i-1234"));

        let arns = envelope(json!({
            "Subject": "A",
            "Message": "{\"detail\": {\"resources\": [\"arn:aws:ec2:eu-1:1:instance/i-9\"]}}"
        }));
        assert_eq!(
            normalizer().normalize(&arns).resource.as_deref(),
            Some("arn:aws:ec2:eu-1:1:instance/i-9")
        );
    }

    #[test]
    fn stable_fingerprint_across_notifications() {
        let first = envelope(json!({
            "MessageId": "m-1",
            "Subject": "CPUAlarm",
            "Message": "{\"AlarmName\": \"cpu-high\", \"NewStateValue\": \"ALARM\"}"
        }));
        let second = envelope(json!({
            "MessageId": "m-2",
            "Subject": "CPUAlarm",
            "Message": "{\"AlarmName\": \"cpu-high\", \"NewStateValue\": \"OK\"}"
        }));
        let a = normalizer().normalize(&first);
        let b = normalizer().normalize(&second);
        assert_eq!(a.alert_id, b.alert_id);
        assert_eq!(a.incident_key(), b.incident_key());
    }

    #[test]
    fn region_detected_from_queue_url() {
        assert_eq!(
            detect_region("https://sqs.us-east-1.amazonaws.com/123/alerts"),
            Some("us-east-1".to_string())
        );
        assert_eq!(detect_region("https://example.com/queue"), None);
    }
}
