//! End-to-end pipeline scenarios over in-memory stores: dedup, lifecycle
//! transitions, repeat windows, and the interactive controls.

mod common;

use chrono::Duration;
use common::{firing_alert, harness, resolved_alert, start_time};
use incident_relay::alert::Severity;
use incident_relay::chat::ButtonAction;
use incident_relay::store::IncidentState;
use serde_json::json;

fn rules() -> serde_json::Value {
    json!({
        "HighCPU": {
            "channelId": "c1",
            "suppressWindowMs": 300000,
            "mentions": ["@u1", "@u2", "@u3"]
        }
    })
}

#[tokio::test]
async fn first_firing_creates_incident() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_eq!(record.state, IncidentState::Firing);
    assert!(!record.message_id.is_empty());
    assert!(record.thread_id.is_some());
    assert_eq!(record.updated_at, start_time());

    assert!(h.kv.contains("dedup:fp1"));
    assert_eq!(h.chat.send_count(), 1);

    let sent = &h.chat.sends_to("c1")[0];
    let embed = sent.embed.as_ref().unwrap();
    assert_eq!(embed.title, "HighCPU");
    assert!(sent.buttons.contains(&ButtonAction::Acknowledge));
    assert!(sent.buttons.contains(&ButtonAction::Resolve));

    let events = h.audit_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].alert_id, "fp1");
    assert_eq!(events[0].status, "firing");
    assert_eq!(events[0].message_id.as_deref(), Some(record.message_id.as_str()));
}

#[tokio::test]
async fn immediate_duplicate_is_suppressed() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(1));
    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();

    assert_eq!(h.chat.send_count(), 1);
    assert_eq!(h.chat.edit_count(), 0);
    assert_eq!(h.audit_events().await.len(), 1);
}

#[tokio::test]
async fn unknown_rule_is_suppressed_without_emitting() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp9", "NoSuchRule", Severity::Warning))
        .await
        .unwrap();

    assert_eq!(h.chat.send_count(), 0);
    assert!(h.incidents.get("fp9:default").await.unwrap().is_none());
    assert!(h.audit_events().await.is_empty());
}

#[tokio::test]
async fn resolve_clears_dedup_and_closes_message() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    assert!(h.kv.contains("dedup:fp1"));

    h.clock.advance(Duration::minutes(1));
    h.processor
        .process(resolved_alert("fp1", "HighCPU"))
        .await
        .unwrap();

    assert!(!h.kv.contains("dedup:fp1"));

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_eq!(record.state, IncidentState::Resolved);
    assert!(record.resolved_at.is_some());

    // Edited in place, no second message, controls removed.
    assert_eq!(h.chat.send_count(), 1);
    let (_, message_id, edited) = h.chat.last_edit().unwrap();
    assert_eq!(message_id, record.message_id);
    assert!(edited.buttons.is_empty());

    let events = h.audit_events().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| e.status == "resolved"));
}

#[tokio::test]
async fn refire_within_resolve_window_reuses_incident() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    let first = h.incidents.get("fp1:default").await.unwrap().unwrap();

    h.processor.process(resolved_alert("fp1", "HighCPU")).await.unwrap();

    h.clock.advance(Duration::minutes(10));
    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_eq!(record.message_id, first.message_id);
    assert_eq!(record.state, IncidentState::Firing);

    let thread_id = record.thread_id.unwrap();
    let thread_posts = h.chat.sends_to(&thread_id);
    assert!(thread_posts
        .iter()
        .any(|m| m.content.as_deref().is_some_and(|c| c.contains("Alert repeated"))));
}

#[tokio::test]
async fn refire_after_resolve_window_starts_fresh() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    let first = h.incidents.get("fp1:default").await.unwrap().unwrap();

    h.processor.process(resolved_alert("fp1", "HighCPU")).await.unwrap();

    h.clock.advance(Duration::minutes(31));
    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_ne!(record.message_id, first.message_id);
    assert_eq!(record.state, IncidentState::Firing);
    assert_eq!(h.chat.send_count(), 2);
}

#[tokio::test]
async fn acknowledged_incident_expires_after_ninety_minutes() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    let first = h.incidents.get("fp1:default").await.unwrap().unwrap();
    h.mirror.acknowledge("fp1:default", "alice").await.unwrap();

    // Within 90 minutes the incident is reused and stays acknowledged.
    h.clock.advance(Duration::minutes(60));
    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_eq!(record.message_id, first.message_id);
    assert_eq!(record.state, IncidentState::Acknowledged);

    // Past 90 minutes from the acknowledgement a new incident starts.
    h.clock.advance(Duration::minutes(31));
    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_ne!(record.message_id, first.message_id);
    assert_eq!(record.state, IncidentState::Firing);
}

#[tokio::test]
async fn acknowledge_extends_dedup_and_keeps_controls() {
    let h = harness(json!({
        "HighCPU": {"channelId": "c1", "suppressWindowMs": 60000}
    }))
    .await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    h.mirror.acknowledge("fp1:default", "alice").await.unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_eq!(record.state, IncidentState::Acknowledged);
    assert_eq!(record.acknowledged_by.as_deref(), Some("alice"));
    assert!(record.acknowledged_at.is_some());

    // The one-minute window was extended to the ten-minute floor.
    h.clock.advance(Duration::minutes(5));
    assert!(h.kv.contains("dedup:fp1"));

    let (_, _, edited) = h.chat.last_edit().unwrap();
    assert_eq!(
        edited.buttons,
        vec![ButtonAction::Troubleshoot, ButtonAction::Resolve]
    );
    let embed = edited.embed.unwrap();
    assert!(embed.fields.iter().any(|f| f.name == "Acknowledged by"));

    let events = h.audit_events().await;
    assert!(events
        .iter()
        .any(|e| e.status == "acknowledged" && e.acknowledged_by.as_deref() == Some("alice")));
}

#[tokio::test]
async fn user_resolve_clears_dedup_and_strips_controls() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    h.mirror.resolve("fp1:default", "bob").await.unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_eq!(record.state, IncidentState::Resolved);
    assert_eq!(record.resolved_by.as_deref(), Some("bob"));
    assert!(!h.kv.contains("dedup:fp1"));

    let (_, _, edited) = h.chat.last_edit().unwrap();
    assert!(edited.buttons.is_empty());

    let events = h.audit_events().await;
    assert!(events
        .iter()
        .any(|e| e.status == "resolved" && e.resolved_by.as_deref() == Some("bob")));
}

#[tokio::test]
async fn lifecycle_states_follow_firing_ack_resolved_path() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    let mut states = vec![h.incidents.get("fp1:default").await.unwrap().unwrap().state];

    h.mirror.acknowledge("fp1:default", "alice").await.unwrap();
    states.push(h.incidents.get("fp1:default").await.unwrap().unwrap().state);

    h.mirror.resolve("fp1:default", "alice").await.unwrap();
    states.push(h.incidents.get("fp1:default").await.unwrap().unwrap().state);

    assert_eq!(
        states,
        vec![
            IncidentState::Firing,
            IncidentState::Acknowledged,
            IncidentState::Resolved
        ]
    );

    // A second resolve is a no-op.
    h.mirror.resolve("fp1:default", "mallory").await.unwrap();
    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    assert_eq!(record.resolved_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn troubleshoot_posts_guide_into_thread() {
    let h = harness(rules()).await;

    h.db
        .upsert_guide("HighCPU", "## Check the dashboards\nThen restart.", start_time())
        .await
        .unwrap();

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    h.mirror.troubleshoot("fp1:default").await.unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    let thread_id = record.thread_id.unwrap();
    let posts = h.chat.sends_to(&thread_id);
    assert!(posts
        .iter()
        .any(|m| m.content.as_deref().is_some_and(|c| c.contains("Check the dashboards"))));
}

#[tokio::test]
async fn troubleshoot_without_guide_posts_notice() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    h.mirror.troubleshoot("fp1:default").await.unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    let posts = h.chat.sends_to(&record.thread_id.unwrap());
    assert!(posts
        .iter()
        .any(|m| m.content.as_deref().is_some_and(|c| c.contains("No troubleshooting guide"))));
}

#[tokio::test]
async fn counters_track_pipeline_outcomes() {
    use incident_relay::metrics::{
        ALERTS_RECEIVED_TOTAL, ALERTS_SENT_TOTAL, DEDUP_SUPPRESSED_TOTAL,
    };

    let h = harness(rules()).await;

    let received = ALERTS_RECEIVED_TOTAL.get();
    let sent = ALERTS_SENT_TOTAL.get();
    h.processor
        .process(firing_alert("fp-counters", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    assert!(ALERTS_RECEIVED_TOTAL.get() >= received + 1);
    assert!(ALERTS_SENT_TOTAL.get() >= sent + 1);

    let suppressed = DEDUP_SUPPRESSED_TOTAL.get();
    h.processor
        .process(firing_alert("fp-counters", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    assert!(DEDUP_SUPPRESSED_TOTAL.get() >= suppressed + 1);
}

#[tokio::test]
async fn repeat_after_stale_acknowledge_pings_first_responder() {
    let h = harness(rules()).await;

    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();
    h.mirror.acknowledge("fp1:default", "alice").await.unwrap();

    h.clock.advance(Duration::minutes(61));
    h.processor
        .process(firing_alert("fp1", "HighCPU", Severity::Critical))
        .await
        .unwrap();

    let record = h.incidents.get("fp1:default").await.unwrap().unwrap();
    let posts = h.chat.sends_to(&record.thread_id.unwrap());
    assert!(posts
        .iter()
        .any(|m| m.content.as_deref().is_some_and(|c| c.contains("@u1"))));
}
