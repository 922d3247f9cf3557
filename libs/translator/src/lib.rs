//! Helpers for turning platform webhook payloads into canonical messages.
//!
//! Each supported platform has a module with an inbound parser (batch envelope to events) and a
//! normalizer (raw message object to [`csd_core::NormalizedMessage`]). Normalizers are total:
//! whatever the payload looks like they produce a message, falling back to the `unknown` type.

pub mod line;
pub mod telemetry;

pub use line::{LineEvent, LineSource, normalize, parse_webhook};
pub use telemetry::normalize_with_span;
