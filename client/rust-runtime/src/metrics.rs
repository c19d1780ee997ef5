use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // Session Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lesson_sessions_total",
        "Total number of lesson sessions by lifecycle event",
        &["status"]
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    pub static ref LEVELS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "levels_finished_total",
        "Total number of levels finished",
        &["outcome"]
    )
    .unwrap();

    // Sync Metrics
    pub static ref SYNC_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "sync_queue_depth",
        "Number of items waiting in the sync outbox"
    )
    .unwrap();

    pub static ref SYNC_ITEMS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_items_total",
        "Total number of sync items processed",
        &["kind", "status"]
    )
    .unwrap();

    pub static ref SYNC_FLUSHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_flushes_total",
        "Total number of sync flush passes",
        &["status"]
    )
    .unwrap();

    // Audio Metrics
    pub static ref AUDIO_PLAYBACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "audio_playbacks_total",
        "Total number of audio playback requests by outcome",
        &["outcome"]
    )
    .unwrap();

    // Cache Metrics
    pub static ref CONTENT_CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "content_cache_lookups_total",
        "Content cache lookups by result",
        &["result"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Record cache hit
pub fn record_cache_hit() {
    CONTENT_CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss() {
    CONTENT_CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
}

/// Record a cached entry rejected by the structural check
pub fn record_cache_invalid() {
    CONTENT_CACHE_LOOKUPS_TOTAL
        .with_label_values(&["invalid"])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics() {
        ANSWERS_SUBMITTED_TOTAL.with_label_values(&["true"]).inc();
        SYNC_QUEUE_DEPTH.set(3);

        let output = render_metrics().unwrap();
        assert!(output.contains("answers_submitted_total"));
        assert!(output.contains("sync_queue_depth"));
    }
}
