use csd_telemetry::{
    MessageContext, TelemetryLabels, record_counter, record_gauge, record_histogram,
    with_common_fields,
};
use tracing::Span;

const INGRESS_COUNTER: &str = "messages_ingressed";
const IDEMPOTENCY_HIT_COUNTER: &str = "idempotency_hit";
const BATCH_SIZE_HISTOGRAM: &str = "webhook_batch_events";
const CONVERSATIONS_GAUGE: &str = "conversations_tracked";
const INGRESS_SPAN_NAME: &str = "ingress.handle";

/// Increment the ingress counter for an accepted message.
///
/// ```
/// use csd_ingress_common::record_ingress;
/// use csd_telemetry::TelemetryLabels;
///
/// record_ingress(&TelemetryLabels::new("acme").with_platform("line").with_bot("b-1"));
/// ```
pub fn record_ingress(labels: &TelemetryLabels) {
    record_counter(INGRESS_COUNTER, 1, labels);
}

pub fn record_idempotency_hit(labels: &TelemetryLabels) {
    record_counter(IDEMPOTENCY_HIT_COUNTER, 1, labels);
}

pub fn record_batch_size(labels: &TelemetryLabels, events: usize) {
    record_histogram(BATCH_SIZE_HISTOGRAM, events as f64, labels);
}

pub fn record_conversations_tracked(labels: &TelemetryLabels, count: usize) {
    record_gauge(CONVERSATIONS_GAUGE, count as f64, labels);
}

/// Span wrapping the processing of one platform event.
pub fn start_ingress_span(labels: &TelemetryLabels, msg_id: &str) -> Span {
    let ctx = MessageContext::new(labels.clone());
    let span = tracing::info_span!(
        INGRESS_SPAN_NAME,
        tenant = tracing::field::Empty,
        platform = %ctx.labels.platform.clone().unwrap_or_default(),
        bot_id = tracing::field::Empty,
        peer_id = tracing::field::Empty,
        msg_id = %msg_id
    );
    with_common_fields(
        &span,
        &ctx.labels.tenant,
        ctx.labels.bot_id.as_deref(),
        ctx.labels.peer_id.as_deref(),
    );
    span
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn span_carries_message_fields() {
        let labels = TelemetryLabels::new("acme")
            .with_platform("line")
            .with_bot("b-1")
            .with_peer("U1");
        let span = start_ingress_span(&labels, "m-9");
        span.in_scope(|| tracing::info!("inside"));
        record_ingress(&labels);
        record_idempotency_hit(&labels);
        record_batch_size(&labels, 3);
        record_conversations_tracked(&labels, 1);
        assert!(logs_contain("msg_id=m-9"));
        assert!(logs_contain("bot_id=b-1"));
    }
}
