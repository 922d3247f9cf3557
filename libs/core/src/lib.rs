//! Customer service desk core contracts and value types.
//!
//! This crate exposes the data structures shared between the webhook ingress, the conversation
//! store and the auto-reply engine: tenants, bots, conversations, messages and the reply-mode
//! state machine. It also defines the [`PlatformClient`] seam used to reach the messaging platform.
pub mod conversation;
pub mod database;
pub mod platform;
pub mod tenant;
pub mod types;

pub use conversation::*;
pub use database::*;
pub use platform::*;
pub use tenant::*;
pub use types::*;

/// Returns the semantic version advertised by this crate.
///
/// ```
/// assert_eq!(csd_core::version(), "0.4.18");
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
