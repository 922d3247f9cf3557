use anyhow::{Context, Result};
use csd_core::{PeerContext, PeerRef};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

/// Where a LINE event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSource {
    pub context: PeerContext,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub room_id: Option<String>,
}

impl LineSource {
    fn from_value(value: &Value) -> Option<Self> {
        let context = match str_field(value, "type")? {
            "user" => PeerContext::Direct,
            "group" => PeerContext::Group,
            "room" => PeerContext::Room,
            _ => return None,
        };
        Some(Self {
            context,
            user_id: owned_field(value, "userId"),
            group_id: owned_field(value, "groupId"),
            room_id: owned_field(value, "roomId"),
        })
    }

    /// The conversation counterparty: the group or room when present, otherwise the user.
    pub fn peer_id(&self) -> Option<&str> {
        match self.context {
            PeerContext::Direct => self.user_id.as_deref(),
            PeerContext::Group => self.group_id.as_deref(),
            PeerContext::Room => self.room_id.as_deref(),
        }
    }

    pub fn peer_ref(&self) -> Option<PeerRef> {
        Some(PeerRef {
            context: self.context,
            peer_id: self.peer_id()?.to_string(),
            user_id: self.user_id.clone(),
        })
    }
}

/// One event out of a LINE webhook batch. The message object is kept raw for the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEvent {
    pub event_type: String,
    pub webhook_event_id: Option<String>,
    pub timestamp: Option<OffsetDateTime>,
    pub is_redelivery: bool,
    pub reply_token: Option<String>,
    pub source: Option<LineSource>,
    pub message: Option<Value>,
}

impl LineEvent {
    fn from_value(value: &Value) -> Option<Self> {
        let event_type = str_field(value, "type")?.to_string();
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(|ms| {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
            });
        let is_redelivery = value
            .pointer("/deliveryContext/isRedelivery")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(Self {
            event_type,
            webhook_event_id: owned_field(value, "webhookEventId"),
            timestamp,
            is_redelivery,
            reply_token: owned_field(value, "replyToken"),
            source: value.get("source").and_then(LineSource::from_value),
            message: value.get("message").filter(|m| m.is_object()).cloned(),
        })
    }

    pub fn is_message(&self) -> bool {
        self.event_type == "message" && self.message.is_some()
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.source.as_ref().and_then(LineSource::peer_id)
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.user_id.as_deref())
    }
}

/// Parses a webhook body of the form `{"destination": ..., "events": [...]}`.
///
/// Only a body that is not JSON at all is an error. A missing `events` array yields no events
/// and entries that are not event objects are skipped.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<LineEvent>> {
    let value: Value = serde_json::from_slice(body).context("webhook body is not JSON")?;
    let Some(events) = value.get("events").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(events
        .iter()
        .filter_map(|raw| {
            let parsed = LineEvent::from_value(raw);
            if parsed.is_none() {
                debug!("skipping malformed webhook event");
            }
            parsed
        })
        .collect())
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn owned_field(value: &Value, key: &str) -> Option<String> {
    str_field(value, key)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
