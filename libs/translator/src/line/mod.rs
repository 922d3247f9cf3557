pub mod inbound;
pub mod normalize;

pub use inbound::{LineEvent, LineSource, parse_webhook};
pub use normalize::{normalize, sticker_preview_url};
