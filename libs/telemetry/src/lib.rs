//! Lightweight helpers for service telemetry.
//! Provides subscriber initialisation, span utilities, metric recorders and label helpers
//! built on `tracing` and the `metrics` facade.

mod config;
mod context;
mod metrics;
mod tracing_init;

pub use config::TelemetryConfig;
pub use context::{MessageContext, TelemetryLabels};
pub use metrics::{record_counter, record_gauge, record_histogram, with_common_fields};
pub use tracing_init::init_telemetry;

