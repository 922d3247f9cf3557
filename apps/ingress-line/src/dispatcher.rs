//! The webhook pipeline: resolve bot, verify, normalize, dedup, record, refresh profile, reply.

use std::sync::Arc;

use axum::http::HeaderMap;
use csd_autoreply::AutoReplyEngine;
use csd_core::{
    Bot, Conversation, Message, NormalizedMessage, PeerContext, PeerRef, SharedPlatformClient,
};
use csd_idempotency::{DedupKey, IdempotencyGuard};
use csd_ingress_common::{
    SignatureCheck, check_webhook_signature, record_batch_size, record_conversations_tracked,
    record_idempotency_hit, record_ingress, start_ingress_span,
};
use csd_session::DeskStore;
use csd_telemetry::TelemetryLabels;
use csd_translator::{LineEvent, LineSource, normalize, normalize_with_span, parse_webhook};
use security::Vault;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{Instrument, debug, info, warn};

pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(OffsetDateTime::now_utc)
}

/// How a webhook request was handled. Everything except `UnknownBot` is acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    UnknownBot,
    Inactive,
    Rejected(SignatureCheck),
    Unparseable,
    Processed(BatchStats),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub ignored: usize,
}

pub struct Dispatcher {
    store: DeskStore,
    dedup: IdempotencyGuard,
    vault: Vault,
    platform: SharedPlatformClient,
    engine: Arc<AutoReplyEngine>,
    verify_signatures: bool,
    profile_max_age: time::Duration,
    clock: Clock,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: DeskStore,
        dedup: IdempotencyGuard,
        vault: Vault,
        platform: SharedPlatformClient,
        engine: Arc<AutoReplyEngine>,
        verify_signatures: bool,
        profile_max_age: time::Duration,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            dedup,
            vault,
            platform,
            engine,
            verify_signatures,
            profile_max_age,
            clock,
        }
    }

    pub fn store(&self) -> &DeskStore {
        &self.store
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn platform(&self) -> &SharedPlatformClient {
        &self.platform
    }

    pub fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }

    pub async fn handle_webhook(
        &self,
        path_id: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> WebhookOutcome {
        let Some(bot) = self.store.registry().resolve_webhook(path_id) else {
            warn!(path_id, "webhook for unknown bot");
            return WebhookOutcome::UnknownBot;
        };
        if !bot.is_active() {
            info!(bot_id = %bot.id, "webhook for inactive bot acknowledged");
            return WebhookOutcome::Inactive;
        }

        if self.verify_signatures {
            let secret = self.vault.reveal(&bot.signing_secret);
            let check = check_webhook_signature(secret.as_deref(), headers, body);
            if !check.accepted() {
                warn!(bot_id = %bot.id, check = ?check, "webhook signature rejected; batch dropped");
                return WebhookOutcome::Rejected(check);
            }
        }

        let events = match parse_webhook(body) {
            Ok(events) => events,
            Err(err) => {
                warn!(bot_id = %bot.id, error = %err, "unparseable webhook body");
                return WebhookOutcome::Unparseable;
            }
        };

        let labels = TelemetryLabels::new(bot.tenant_id.clone())
            .with_platform(bot.platform.as_str())
            .with_bot(bot.id.clone());
        record_batch_size(&labels, events.len());

        let mut stats = BatchStats::default();
        for event in &events {
            self.handle_event(&bot, &labels, event, &mut stats).await;
        }
        if stats.accepted > 0 {
            self.store.mark_dirty();
        }
        record_conversations_tracked(&labels, self.store.conversations().len());
        WebhookOutcome::Processed(stats)
    }

    async fn handle_event(
        &self,
        bot: &Bot,
        labels: &TelemetryLabels,
        event: &LineEvent,
        stats: &mut BatchStats,
    ) {
        let Some(raw) = event.message.as_ref().filter(|_| event.is_message()) else {
            debug!(event_type = %event.event_type, "non-message event ignored");
            stats.ignored += 1;
            return;
        };
        let Some(peer) = event.source.as_ref().and_then(LineSource::peer_ref) else {
            warn!("message event without a resolvable peer dropped");
            stats.ignored += 1;
            return;
        };
        if event.is_redelivery {
            info!(peer_id = %peer.peer_id, "platform marked event as redelivery");
        }

        let labels = labels.clone().with_peer(peer.peer_id.clone());
        let msg_id = match raw.get("id") {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => String::new(),
        };
        let span = start_ingress_span(&labels, &msg_id);

        async {
            let now = self.now();
            let mut normalized = normalize_with_span(&labels, raw, normalize);
            annotate(&mut normalized, event, &peer);

            let key = DedupKey::for_message(&bot.id, &peer.peer_id, &normalized);
            if !self.dedup.should_process(&key, now) {
                record_idempotency_hit(&labels);
                stats.duplicates += 1;
                return;
            }

            let conversations = self.store.conversations();
            let (mut conversation, created) = conversations
                .get_or_create(bot, &peer.peer_id, peer.context, now)
                .await;
            if created {
                debug!("new conversation");
            }
            if peer.context != PeerContext::Direct {
                self.annotate_sender(bot, &peer, &mut normalized).await;
            }
            let inbound = Message::inbound(normalized, now);
            conversations.append_message(&mut conversation, inbound.clone());
            record_ingress(&labels);
            stats.accepted += 1;

            self.refresh_profile(bot, &mut conversation, &peer, now).await;
            self.engine
                .process(conversations, bot, &mut conversation, &inbound, now)
                .await;
        }
        .instrument(span)
        .await
    }

    /// Best-effort profile lookup for one-to-one chats; failures leave the conversation
    /// untouched. Group and room members are recorded per message by `annotate_sender`.
    async fn refresh_profile(
        &self,
        bot: &Bot,
        conversation: &mut Conversation,
        peer: &PeerRef,
        now: OffsetDateTime,
    ) {
        if peer.context != PeerContext::Direct
            || !conversation.profile_stale(now, self.profile_max_age)
        {
            return;
        }
        let Some(token) = self.vault.reveal(&bot.access_token) else {
            warn!("access token unavailable; profile lookup skipped");
            return;
        };
        match self.platform.fetch_profile(&token, peer).await {
            Ok(profile) => {
                conversation.customer_name = Some(profile.display_name);
                conversation.customer_avatar = profile.picture_url;
                conversation.profile_refreshed_at = Some(now);
            }
            Err(err) => warn!(error = %err, "profile lookup failed"),
        }
    }

    /// Puts the speaking member's display name and avatar on a group or room message.
    async fn annotate_sender(&self, bot: &Bot, peer: &PeerRef, normalized: &mut NormalizedMessage) {
        if peer.user_id.is_none() {
            return;
        }
        let Some(token) = self.vault.reveal(&bot.access_token) else {
            return;
        };
        match self.platform.fetch_profile(&token, peer).await {
            Ok(profile) => {
                normalized
                    .metadata
                    .insert("senderName".into(), json!(profile.display_name));
                if let Some(avatar) = profile.picture_url {
                    normalized.metadata.insert("senderAvatar".into(), json!(avatar));
                }
            }
            Err(err) => warn!(error = %err, "member profile lookup failed"),
        }
    }
}

/// Adds platform context the normalizer does not see: the sender inside group and room chats,
/// and the platform's own event timestamp.
fn annotate(normalized: &mut NormalizedMessage, event: &LineEvent, peer: &PeerRef) {
    if peer.context != PeerContext::Direct {
        if let Some(sender) = event.sender_id() {
            normalized.metadata.insert("senderId".into(), json!(sender));
        }
    }
    if let Some(ts) = event.timestamp {
        let millis = ts.unix_timestamp_nanos() / 1_000_000;
        normalized
            .metadata
            .insert("platformTimestamp".into(), json!(millis as i64));
    }
}
