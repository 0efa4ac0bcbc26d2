use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ALERTS_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "relay_alerts_received_total",
        "Alerts handed to the processor after normalization."
    )
    .unwrap();
    pub static ref ALERTS_SENT_TOTAL: IntCounter = register_int_counter!(
        "relay_alerts_sent_total",
        "Alerts successfully mirrored into chat."
    )
    .unwrap();
    pub static ref DEDUP_SUPPRESSED_TOTAL: IntCounter = register_int_counter!(
        "relay_dedup_suppressed_total",
        "Firing alerts dropped by the suppression window."
    )
    .unwrap();
    pub static ref NO_CONFIG_SUPPRESSED_TOTAL: IntCounter = register_int_counter!(
        "relay_no_config_suppressed_total",
        "Alerts dropped because no rule entry matched."
    )
    .unwrap();
    pub static ref CHAT_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "relay_chat_errors_total",
        "Chat emit failures."
    )
    .unwrap();
    pub static ref QUEUE_PROCESSED_TOTAL: IntCounter = register_int_counter!(
        "relay_queue_processed_total",
        "Queue messages processed and deleted."
    )
    .unwrap();
    pub static ref CHAT_RATE_LIMITS_TOTAL: IntCounter = register_int_counter!(
        "relay_chat_rate_limits_total",
        "Rate-limit responses from the chat API."
    )
    .unwrap();
}

pub fn register_metrics() {
    let counters: [&IntCounter; 7] = [
        &ALERTS_RECEIVED_TOTAL,
        &ALERTS_SENT_TOTAL,
        &DEDUP_SUPPRESSED_TOTAL,
        &NO_CONFIG_SUPPRESSED_TOTAL,
        &CHAT_ERRORS_TOTAL,
        &QUEUE_PROCESSED_TOTAL,
        &CHAT_RATE_LIMITS_TOTAL,
    ];
    for counter in counters {
        // Ignore AlreadyReg when called more than once in-process.
        let _ = REGISTRY.register(Box::new((*counter).clone()));
    }
}

pub fn gather_metrics() -> String {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}
