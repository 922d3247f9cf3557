//! Decides whether an inbound customer message gets an automated reply and produces it.
//!
//! Every decision first runs the manual-to-automatic fallback, so a conversation an operator
//! walked away from is picked up again by the responder. Generated replies are either kept as
//! internal drafts or pushed to the platform depending on [`AutoReplyConfig::auto_send_replies`].

mod config;

use std::sync::Arc;

use csd_core::{
    Bot, Conversation, DeliveryStatus, Message, MessageRole, ReplyMode, SharedPlatformClient,
};
use csd_responder::{
    ChatTurn, KnowledgeBase, PromptContext, PromptRenderer, ReplyRequest, SharedResponder,
    estimate_tokens,
};
use csd_session::ConversationStore;
use csd_telemetry::{TelemetryLabels, record_counter};
use security::Vault;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

pub use config::{
    AutoReplyConfig, DEFAULT_FALLBACK_MINUTES, DEFAULT_HISTORY_WINDOW, DEFAULT_KNOWLEDGE_TOP_K,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// A human operator owns the conversation.
    ManualMode,
    AutoMode,
    /// Automatic mode, but no responder backend is configured.
    ResponderUnavailable,
    /// Only customer messages are answered.
    NotCustomerMessage,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::ManualMode => "manual_mode",
            DecisionReason::AutoMode => "auto_mode",
            DecisionReason::ResponderUnavailable => "responder_unavailable",
            DecisionReason::NotCustomerMessage => "not_customer_message",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub should_reply: bool,
    pub reason: DecisionReason,
    /// The conversation returned to automatic mode while deciding.
    pub fell_back: bool,
}

/// Applies the manual fallback, then decides on the current mode.
///
/// A manual conversation never gets an automated reply, whatever the message says.
pub fn decide(
    conversation: &mut Conversation,
    message: &Message,
    now: OffsetDateTime,
    cfg: &AutoReplyConfig,
) -> Decision {
    let fell_back = conversation.apply_fallback(now, cfg.fallback_after);
    if fell_back {
        info!(
            bot_id = %conversation.bot_id,
            peer_id = %conversation.peer_id,
            "no recent operator activity; automatic replies resumed"
        );
    }
    let (should_reply, reason) = if message.role != MessageRole::User {
        (false, DecisionReason::NotCustomerMessage)
    } else {
        match conversation.reply_mode() {
            ReplyMode::Manual => (false, DecisionReason::ManualMode),
            ReplyMode::Auto => (true, DecisionReason::AutoMode),
        }
    };
    Decision {
        should_reply,
        reason,
        fell_back,
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub decision: Decision,
    /// Id of the appended assistant message, if a reply was generated.
    pub reply_id: Option<String>,
    pub status: Option<DeliveryStatus>,
}

impl ReplyOutcome {
    fn skipped(decision: Decision) -> Self {
        Self {
            decision,
            reply_id: None,
            status: None,
        }
    }
}

pub struct AutoReplyEngine {
    cfg: AutoReplyConfig,
    responder: Option<SharedResponder>,
    knowledge: Arc<KnowledgeBase>,
    prompts: PromptRenderer,
    platform: SharedPlatformClient,
    vault: Vault,
}

impl AutoReplyEngine {
    pub fn new(
        cfg: AutoReplyConfig,
        responder: Option<SharedResponder>,
        knowledge: Arc<KnowledgeBase>,
        platform: SharedPlatformClient,
        vault: Vault,
    ) -> Self {
        Self {
            cfg,
            responder,
            knowledge,
            prompts: PromptRenderer::new(),
            platform,
            vault,
        }
    }

    pub fn config(&self) -> &AutoReplyConfig {
        &self.cfg
    }

    /// Runs the decision for `inbound` (already appended to `conversation`) and, when it says
    /// so, generates and records a reply. Responder and delivery failures are logged and
    /// swallowed; the inbound message stays recorded either way.
    #[instrument(
        name = "autoreply.process",
        skip_all,
        fields(bot_id = %bot.id, peer_id = %conversation.peer_id)
    )]
    pub async fn process(
        &self,
        store: &ConversationStore,
        bot: &Bot,
        conversation: &mut Conversation,
        inbound: &Message,
        now: OffsetDateTime,
    ) -> ReplyOutcome {
        let mut decision = decide(conversation, inbound, now, &self.cfg);
        if !decision.should_reply {
            debug!(reason = decision.reason.as_str(), "no automated reply");
            return ReplyOutcome::skipped(decision);
        }
        let Some(responder) = &self.responder else {
            decision.should_reply = false;
            decision.reason = DecisionReason::ResponderUnavailable;
            debug!("automatic mode but no responder configured");
            return ReplyOutcome::skipped(decision);
        };

        let labels = TelemetryLabels::new(bot.tenant_id.clone())
            .with_platform(bot.platform.as_str())
            .with_bot(bot.id.clone());

        let request = match self.build_request(store, bot, conversation, inbound) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "could not build reply request");
                let labels = labels.clone().with_extra("kind", err.kind());
                record_counter("auto_reply_failed", 1, &labels);
                return ReplyOutcome::skipped(decision);
            }
        };
        let prompt_chars = request_text_len(&request);

        let output = match responder.generate_reply(request).await {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "responder failed; no automated reply");
                let labels = labels.clone().with_extra("kind", err.kind());
                record_counter("auto_reply_failed", 1, &labels);
                return ReplyOutcome::skipped(decision);
            }
        };

        let tokens = output
            .tokens
            .unwrap_or_else(|| (prompt_chars as u64).div_ceil(4) + estimate_tokens(&output.text));
        store.registry().record_tokens(&bot.tenant_id, tokens);
        record_counter("auto_reply_generated", 1, &labels);

        let status = if self.cfg.auto_send_replies {
            DeliveryStatus::Pending
        } else {
            DeliveryStatus::Suppressed
        };
        let reply = Message::auto_reply(output.text, status, now);
        let reply_id = reply.id.clone();
        let text = reply.content.clone();
        store.append_message(conversation, reply);

        let status = if self.cfg.auto_send_replies {
            let delivered = self.deliver(bot, &conversation.peer_id, &text).await;
            let status = if delivered {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Failed
            };
            conversation.set_delivery_status(&reply_id, status);
            status
        } else {
            debug!(reply_id = %reply_id, "reply kept as internal draft");
            status
        };

        ReplyOutcome {
            decision,
            reply_id: Some(reply_id),
            status: Some(status),
        }
    }

    fn build_request(
        &self,
        store: &ConversationStore,
        bot: &Bot,
        conversation: &Conversation,
        inbound: &Message,
    ) -> Result<ReplyRequest, csd_responder::ResponderError> {
        let tenant = store.registry().tenant(&bot.tenant_id);
        let tenant_knowledge = self.knowledge.tenant(&bot.tenant_id);
        let ctx = PromptContext {
            tenant_name: tenant.map(|t| t.name).unwrap_or_else(|| bot.tenant_id.clone()),
            bot_name: bot.name.clone(),
            platform: bot.platform.as_str().to_string(),
            customer_name: conversation.customer_name.clone().unwrap_or_default(),
        };
        let template = tenant_knowledge.and_then(|k| k.system_prompt.as_deref());
        let system_prompt = self.prompts.render(template, &ctx)?;
        let knowledge_context =
            self.knowledge
                .context_for(&bot.tenant_id, &inbound.content, self.cfg.knowledge_top_k);

        // The inbound message goes in `user_message`, not in the history.
        let filtered: Vec<_> = conversation
            .recent_history(self.cfg.history_window + 1)
            .iter()
            .filter(|m| m.id != inbound.id)
            .collect();
        let history = filtered
            .into_iter()
            .rev()
            .take(self.cfg.history_window)
            .rev()
            .map(ChatTurn::from)
            .collect();

        Ok(ReplyRequest {
            system_prompt,
            knowledge_context,
            history,
            user_message: inbound.content.clone(),
        })
    }

    async fn deliver(&self, bot: &Bot, to: &str, text: &str) -> bool {
        let Some(token) = self.vault.reveal(&bot.access_token) else {
            warn!("access token unavailable; reply not delivered");
            return false;
        };
        match self.platform.push_text(&token, to, text).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "reply delivery failed");
                false
            }
        }
    }
}

fn request_text_len(request: &ReplyRequest) -> usize {
    request.system_prompt.chars().count()
        + request.knowledge_context.chars().count()
        + request
            .history
            .iter()
            .map(|t| t.content.chars().count())
            .sum::<usize>()
        + request.user_message.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use csd_core::{NormalizedMessage, PeerContext, Platform};
    use time::{Duration, macros::datetime};

    const T: OffsetDateTime = datetime!(2024-03-01 09:00 UTC);

    fn conversation() -> Conversation {
        Conversation::new(
            &csd_core::ConversationKey::new("B1", "P1"),
            "t1",
            Platform::Line,
            PeerContext::Direct,
            T,
        )
    }

    fn customer(text: &str, at: OffsetDateTime) -> Message {
        Message::inbound(NormalizedMessage::text(text), at)
    }

    #[test]
    fn auto_mode_replies() {
        let mut conv = conversation();
        let msg = customer("hi", T);
        conv.append(msg.clone());
        let decision = decide(&mut conv, &msg, T, &AutoReplyConfig::default());
        assert!(decision.should_reply);
        assert_eq!(decision.reason, DecisionReason::AutoMode);
    }

    #[test]
    fn human_takeover_then_fallback() {
        let cfg = AutoReplyConfig::default();
        let mut conv = conversation();
        conv.append(Message::human_reply("I'll take it from here", T));
        assert_eq!(conv.reply_mode(), ReplyMode::Manual);

        let early = customer("thanks", T + Duration::minutes(1));
        conv.append(early.clone());
        let decision = decide(&mut conv, &early, T + Duration::minutes(1), &cfg);
        assert!(!decision.should_reply);
        assert_eq!(decision.reason, DecisionReason::ManualMode);

        let late = customer("anyone there?", T + Duration::minutes(15));
        conv.append(late.clone());
        let decision = decide(&mut conv, &late, T + Duration::minutes(15), &cfg);
        assert!(decision.fell_back);
        assert!(decision.should_reply);
        assert_eq!(conv.reply_mode(), ReplyMode::Auto);
    }

    #[test]
    fn manual_mode_never_replies_regardless_of_content() {
        let cfg = AutoReplyConfig::default();
        let mut conv = conversation();
        conv.set_reply_mode(false, T);
        for text in ["", "help!!", "what are your hours", "[已傳送貼圖]"] {
            let msg = customer(text, T + Duration::minutes(2));
            assert!(!decide(&mut conv, &msg, T + Duration::minutes(2), &cfg).should_reply);
        }
    }

    #[test]
    fn assistant_messages_are_not_answered() {
        let mut conv = conversation();
        let reply = Message::auto_reply("hello", DeliveryStatus::Suppressed, T);
        let decision = decide(&mut conv, &reply, T, &AutoReplyConfig::default());
        assert_eq!(decision.reason, DecisionReason::NotCustomerMessage);
    }
}
