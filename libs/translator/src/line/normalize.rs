use csd_core::{ContentType, Metadata, NormalizedMessage};
use serde_json::{Value, json};

use super::inbound::str_field;

pub const IMAGE_PLACEHOLDER: &str = "[已傳送圖片]";
pub const VIDEO_PLACEHOLDER: &str = "[已傳送影片]";
pub const AUDIO_PLACEHOLDER: &str = "[已傳送語音訊息]";
pub const FILE_PLACEHOLDER: &str = "[已傳送檔案]";
pub const STICKER_PLACEHOLDER: &str = "[已傳送貼圖]";
pub const LOCATION_PLACEHOLDER: &str = "[已傳送位置]";
pub const UNKNOWN_PLACEHOLDER: &str = "[不支援的訊息類型]";

const STICKER_CDN: &str = "https://stickershop.line-scdn.net/stickershop/v1/sticker";

/// Static preview image for a sticker id.
///
/// ```
/// use csd_translator::line::sticker_preview_url;
///
/// assert_eq!(
///     sticker_preview_url("52002734"),
///     "https://stickershop.line-scdn.net/stickershop/v1/sticker/52002734/android/sticker.png"
/// );
/// ```
pub fn sticker_preview_url(sticker_id: &str) -> String {
    format!("{STICKER_CDN}/{sticker_id}/android/sticker.png")
}

/// Maps a raw LINE `message` object to its canonical form. Never fails.
///
/// Absent fields are omitted from metadata rather than filled with nulls.
pub fn normalize(raw: &Value) -> NormalizedMessage {
    let kind = str_field(raw, "type").unwrap_or_default();
    let mut metadata = Metadata::new();
    let (content_type, content) = match kind {
        "text" => (
            ContentType::Text,
            str_field(raw, "text").unwrap_or_default().to_string(),
        ),
        "image" => {
            copy(raw, "/imageSet/id", "imageSetId", &mut metadata);
            copy(raw, "/fileName", "fileName", &mut metadata);
            copy(raw, "/fileSize", "fileSize", &mut metadata);
            (ContentType::Image, IMAGE_PLACEHOLDER.to_string())
        }
        "video" => {
            copy(raw, "/duration", "duration", &mut metadata);
            copy(raw, "/fileName", "fileName", &mut metadata);
            copy(raw, "/fileSize", "fileSize", &mut metadata);
            (ContentType::Video, VIDEO_PLACEHOLDER.to_string())
        }
        "audio" => {
            copy(raw, "/duration", "duration", &mut metadata);
            copy(raw, "/fileName", "fileName", &mut metadata);
            copy(raw, "/fileSize", "fileSize", &mut metadata);
            (ContentType::Audio, AUDIO_PLACEHOLDER.to_string())
        }
        "file" => {
            copy(raw, "/fileName", "fileName", &mut metadata);
            copy(raw, "/fileSize", "fileSize", &mut metadata);
            let content = match str_field(raw, "fileName").filter(|n| !n.is_empty()) {
                Some(name) => format!("[已傳送檔案: {name}]"),
                None => FILE_PLACEHOLDER.to_string(),
            };
            (ContentType::File, content)
        }
        "sticker" => {
            copy(raw, "/stickerId", "stickerId", &mut metadata);
            copy(raw, "/packageId", "packageId", &mut metadata);
            copy(raw, "/stickerResourceType", "resourceType", &mut metadata);
            if let Some(id) = scalar_string(raw.get("stickerId")) {
                metadata.insert("previewUrl".into(), json!(sticker_preview_url(&id)));
            }
            (ContentType::Sticker, STICKER_PLACEHOLDER.to_string())
        }
        "location" => {
            copy(raw, "/latitude", "latitude", &mut metadata);
            copy(raw, "/longitude", "longitude", &mut metadata);
            copy(raw, "/address", "address", &mut metadata);
            copy(raw, "/title", "title", &mut metadata);
            (ContentType::Location, location_content(raw))
        }
        _ => {
            if !kind.is_empty() {
                metadata.insert("originalType".into(), json!(kind));
            }
            (ContentType::Unknown, UNKNOWN_PLACEHOLDER.to_string())
        }
    };

    NormalizedMessage {
        content_type,
        content,
        metadata,
        platform_message_id: scalar_string(raw.get("id")).filter(|id| !id.is_empty()),
    }
}

fn location_content(raw: &Value) -> String {
    if let Some(address) = str_field(raw, "address").filter(|a| !a.trim().is_empty()) {
        return address.to_string();
    }
    let lat = raw.get("latitude").and_then(Value::as_f64);
    let lng = raw.get("longitude").and_then(Value::as_f64);
    match (lat, lng) {
        (Some(lat), Some(lng)) => format!("{lat}, {lng}"),
        _ => LOCATION_PLACEHOLDER.to_string(),
    }
}

fn copy(raw: &Value, pointer: &str, key: &str, metadata: &mut Metadata) {
    if let Some(value) = raw.pointer(pointer).filter(|v| !v.is_null()) {
        metadata.insert(key.to_string(), value.clone());
    }
}

/// Ids arrive as strings but older payloads and fixtures sometimes carry numbers.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
