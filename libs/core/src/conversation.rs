use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{DeliveryStatus, Message, MessageRole, PeerContext, Platform};

/// Identity of a conversation: one per distinct counterparty per bot.
///
/// ```
/// use csd_core::ConversationKey;
///
/// let key = ConversationKey::new("B1", "P1");
/// assert_eq!(key.to_string(), "B1:P1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub bot_id: String,
    pub peer_id: String,
}

impl ConversationKey {
    pub fn new(bot_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            peer_id: peer_id.into(),
        }
    }
}

impl Display for ConversationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bot_id, self.peer_id)
    }
}

/// Reply mode of a conversation.
///
/// `Manual` means a human operator owns the conversation and automated replies are held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    Auto,
    Manual,
}

impl ReplyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyMode::Auto => "auto",
            ReplyMode::Manual => "manual",
        }
    }
}

/// Threaded conversation between a bot and one remote peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub bot_id: String,
    pub peer_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub peer_context: PeerContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_avatar: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub profile_refreshed_at: Option<OffsetDateTime>,
    pub auto_reply_enabled: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_human_reply_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub mode_changed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    /// Creates an empty conversation in automatic reply mode.
    pub fn new(
        key: &ConversationKey,
        tenant_id: impl Into<String>,
        platform: Platform,
        peer_context: PeerContext,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            bot_id: key.bot_id.clone(),
            peer_id: key.peer_id.clone(),
            tenant_id: tenant_id.into(),
            platform,
            peer_context,
            customer_name: None,
            customer_avatar: None,
            profile_refreshed_at: None,
            auto_reply_enabled: true,
            last_human_reply_at: None,
            mode_changed_at: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.bot_id.clone(), self.peer_id.clone())
    }

    pub fn reply_mode(&self) -> ReplyMode {
        if self.auto_reply_enabled {
            ReplyMode::Auto
        } else {
            ReplyMode::Manual
        }
    }

    /// Appends a message in arrival order. A human reply flips the conversation to manual mode.
    pub fn append(&mut self, message: Message) {
        if message.is_human_reply() {
            self.mark_human_reply(message.created_at);
        }
        if message.created_at > self.updated_at {
            self.updated_at = message.created_at;
        }
        self.messages.push(message);
    }

    fn mark_human_reply(&mut self, at: OffsetDateTime) {
        self.last_human_reply_at = Some(at);
        if self.auto_reply_enabled {
            self.auto_reply_enabled = false;
            self.mode_changed_at = Some(at);
        }
    }

    /// Explicit operator toggle. Returns `true` when the mode actually changed.
    pub fn set_reply_mode(&mut self, enabled: bool, at: OffsetDateTime) -> bool {
        if self.auto_reply_enabled == enabled {
            return false;
        }
        self.auto_reply_enabled = enabled;
        self.mode_changed_at = Some(at);
        if at > self.updated_at {
            self.updated_at = at;
        }
        true
    }

    /// Restores automatic mode once human activity is older than `after`.
    ///
    /// Human activity is the later of the last human reply and the moment manual mode was
    /// entered, so an explicit takeover without any typed reply still holds for the window.
    /// Returns `true` when the conversation flipped back to automatic mode.
    pub fn apply_fallback(&mut self, now: OffsetDateTime, after: Duration) -> bool {
        if self.auto_reply_enabled {
            return false;
        }
        let last_activity = match (self.last_human_reply_at, self.mode_changed_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let expired = match last_activity {
            Some(at) => now - at > after,
            None => true,
        };
        if expired {
            self.auto_reply_enabled = true;
            self.mode_changed_at = Some(now);
        }
        expired
    }

    /// The most recent `window` messages, oldest first.
    pub fn recent_history(&self, window: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Moves an assistant message out of `Pending`. Returns `false` for unknown ids, user
    /// messages, or transitions the status does not allow.
    pub fn set_delivery_status(&mut self, message_id: &str, status: DeliveryStatus) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        if message.role != MessageRole::Assistant {
            return false;
        }
        match message.delivery_status {
            Some(current) if current.can_transition_to(status) => {
                message.delivery_status = Some(status);
                true
            }
            _ => false,
        }
    }

    /// Whether the cached profile is older than `max_age` (or was never fetched).
    pub fn profile_stale(&self, now: OffsetDateTime, max_age: Duration) -> bool {
        match self.profile_refreshed_at {
            Some(at) => now - at > max_age || self.customer_name.is_none(),
            None => true,
        }
    }
}

/// Lightweight listing entry for a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub bot_id: String,
    pub peer_id: String,
    pub customer_name: Option<String>,
    pub reply_mode: ReplyMode,
    pub message_count: usize,
    pub last_message: Option<Message>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            bot_id: conversation.bot_id.clone(),
            peer_id: conversation.peer_id.clone(),
            customer_name: conversation.customer_name.clone(),
            reply_mode: conversation.reply_mode(),
            message_count: conversation.messages.len(),
            last_message: conversation.last_message().cloned(),
            updated_at: conversation.updated_at,
        }
    }
}
