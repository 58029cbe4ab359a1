//! Prometheus metrics (SPEC_FULL §A), served over the same bare `hyper`
//! `/metrics` endpoint shape used elsewhere in this codebase.

use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge, TextEncoder};

lazy_static! {
    pub static ref EVENTS_PROCESSED: Counter = register_counter!(
        "grimoire_events_processed_total",
        "Syscall events read from the ring buffer and fed to the pattern engine"
    )
    .expect("failed to register EVENTS_PROCESSED metric");

    pub static ref EVENTS_DROPPED: Counter = register_counter!(
        "grimoire_events_dropped_total",
        "Events dropped by the producer due to a full ring buffer"
    )
    .expect("failed to register EVENTS_DROPPED metric");

    pub static ref TRACKS_ACTIVE: Gauge = register_gauge!(
        "grimoire_tracks_active",
        "Process tracks currently held in the track table"
    )
    .expect("failed to register TRACKS_ACTIVE metric");

    pub static ref TRACKS_EVICTED: Counter = register_counter!(
        "grimoire_tracks_evicted_total",
        "Process tracks evicted from the track table under capacity pressure"
    )
    .expect("failed to register TRACKS_EVICTED metric");

    pub static ref MATCHES_EMITTED: CounterVec = register_counter_vec!(
        "grimoire_matches_total",
        "Pattern matches emitted, by pattern name",
        &["pattern"]
    )
    .expect("failed to register MATCHES_EMITTED metric");

    pub static ref ENFORCEMENTS: CounterVec = register_counter_vec!(
        "grimoire_enforcements_total",
        "Enforcement outcomes, by result",
        &["outcome"]
    )
    .expect("failed to register ENFORCEMENTS metric");
}

/// Touch every metric once so it appears in `/metrics` output even before
/// the first event arrives.
pub fn init() {
    let _ = EVENTS_PROCESSED.get();
    let _ = EVENTS_DROPPED.get();
    TRACKS_ACTIVE.set(0.0);
    let _ = TRACKS_EVICTED.get();
}

/// Render the default registry in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_metrics_includes_registered_series() {
        init();
        MATCHES_EMITTED.with_label_values(&["fork_bomb_rapid"]).inc();
        let rendered = encode_metrics();
        assert!(rendered.contains("grimoire_events_processed_total"));
        assert!(rendered.contains("grimoire_matches_total"));
    }
}
