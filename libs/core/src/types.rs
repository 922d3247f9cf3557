use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Metadata attached to a message: type-specific raw fields (sticker id, file name, coordinates).
pub type Metadata = BTreeMap<String, Value>;

/// Supported messaging platforms.
///
/// ```
/// use csd_core::Platform;
///
/// let p = Platform::Line;
/// assert_eq!(p.as_str(), "line");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Line,
}

impl Platform {
    /// Returns the lowercase string identifier used in logs, metric labels and dedup keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Line => "line",
        }
    }
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Canonical content type produced by normalization.
///
/// ```
/// use csd_core::ContentType;
///
/// assert_eq!(ContentType::Sticker.as_str(), "sticker");
/// assert!(ContentType::Text.is_text());
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Location,
    Sticker,
    Unknown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
            ContentType::Audio => "audio",
            ContentType::File => "file",
            ContentType::Location => "location",
            ContentType::Sticker => "sticker",
            ContentType::Unknown => "unknown",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentType::Text)
    }
}

/// Delivery state of an assistant message.
///
/// `Suppressed` marks a reply that was recorded for internal review only and never sent to the
/// customer. `Failed` marks a send that the platform rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Suppressed,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Suppressed => "suppressed",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Only pending messages may move; every other state is final.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        matches!(self, DeliveryStatus::Pending) && next != DeliveryStatus::Pending
    }
}

/// Shape of the remote peer a conversation is held with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerContext {
    #[default]
    Direct,
    Group,
    Room,
}

impl PeerContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerContext::Direct => "direct",
            PeerContext::Group => "group",
            PeerContext::Room => "room",
        }
    }
}

/// Canonical `{type, content, metadata}` triple produced from a raw platform message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Platform-native message id, when the payload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_message_id: Option<String>,
}

impl NormalizedMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Text,
            content: content.into(),
            metadata: Metadata::new(),
            platform_message_id: None,
        }
    }

    pub fn with_platform_id(mut self, id: impl Into<String>) -> Self {
        self.platform_message_id = Some(id.into());
        self
    }
}

/// A single conversation turn. Immutable once appended, apart from the delivery status of
/// assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub is_auto_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_message_id: Option<String>,
}

impl Message {
    /// Builds an inbound customer message from its normalized form.
    pub fn inbound(normalized: NormalizedMessage, at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content_type: normalized.content_type,
            content: normalized.content,
            metadata: normalized.metadata,
            created_at: at,
            is_auto_reply: false,
            delivery_status: None,
            platform_message_id: normalized.platform_message_id,
        }
    }

    /// Builds a reply produced by the language-model responder.
    pub fn auto_reply(text: impl Into<String>, status: DeliveryStatus, at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content_type: ContentType::Text,
            content: text.into(),
            metadata: Metadata::new(),
            created_at: at,
            is_auto_reply: true,
            delivery_status: Some(status),
            platform_message_id: None,
        }
    }

    /// Builds a reply typed by a human operator; it starts out pending delivery.
    pub fn human_reply(text: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content_type: ContentType::Text,
            content: text.into(),
            metadata: Metadata::new(),
            created_at: at,
            is_auto_reply: false,
            delivery_status: Some(DeliveryStatus::Pending),
            platform_message_id: None,
        }
    }

    /// True for assistant turns that a human sent (the trigger for manual mode).
    pub fn is_human_reply(&self) -> bool {
        self.role == MessageRole::Assistant && !self.is_auto_reply
    }
}
