use csd_core::NormalizedMessage;
use csd_telemetry::{TelemetryLabels, record_counter, with_common_fields};
use serde_json::Value;

const NORMALIZE_SPAN_NAME: &str = "normalize.run";
const NORMALIZE_COUNTER: &str = "messages_normalized";

/// Runs a normalizer inside a `normalize.run` span and counts the result by content type.
pub fn normalize_with_span<F>(labels: &TelemetryLabels, raw: &Value, f: F) -> NormalizedMessage
where
    F: FnOnce(&Value) -> NormalizedMessage,
{
    let platform = labels
        .platform
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let span = tracing::info_span!(
        NORMALIZE_SPAN_NAME,
        tenant = tracing::field::Empty,
        bot_id = tracing::field::Empty,
        peer_id = tracing::field::Empty,
        platform = %platform,
        content_type = tracing::field::Empty
    );
    with_common_fields(
        &span,
        &labels.tenant,
        labels.bot_id.as_deref(),
        labels.peer_id.as_deref(),
    );
    let _guard = span.enter();
    let normalized = f(raw);
    span.record("content_type", normalized.content_type.as_str());
    let labels = labels
        .clone()
        .with_extra("content_type", normalized.content_type.as_str());
    record_counter(NORMALIZE_COUNTER, 1, &labels);
    normalized
}
