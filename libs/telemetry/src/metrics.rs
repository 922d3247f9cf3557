use crate::context::TelemetryLabels;
use tracing::Span;

fn labels_of(labels: &TelemetryLabels) -> Vec<::metrics::Label> {
    labels
        .tags()
        .into_iter()
        .map(|(k, v)| ::metrics::Label::new(k, v))
        .collect()
}

pub fn with_common_fields(span: &Span, tenant: &str, bot_id: Option<&str>, peer_id: Option<&str>) {
    span.record("tenant", tracing::field::display(tenant));
    if let Some(bot_id) = bot_id {
        span.record("bot_id", tracing::field::display(bot_id));
    }
    if let Some(peer_id) = peer_id {
        span.record("peer_id", tracing::field::display(peer_id));
    }
}

pub fn record_counter(name: &'static str, value: u64, labels: &TelemetryLabels) {
    ::metrics::counter!(name, labels_of(labels)).increment(value);
}

pub fn record_histogram(name: &'static str, value: f64, labels: &TelemetryLabels) {
    ::metrics::histogram!(name, labels_of(labels)).record(value);
}

pub fn record_gauge(name: &'static str, value: f64, labels: &TelemetryLabels) {
    ::metrics::gauge!(name, labels_of(labels)).set(value);
}
