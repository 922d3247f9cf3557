//! Human operator actions on a conversation.

use csd_core::{Conversation, ConversationKey, DeliveryStatus, Message};
use csd_session::{Result, StoreError};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;

impl Dispatcher {
    /// Records an operator reply, which puts the conversation in manual mode, then pushes it to
    /// the platform. The reply ends up `Delivered` or `Failed`.
    pub async fn send_human_reply(
        &self,
        key: &ConversationKey,
        text: &str,
    ) -> Result<(Conversation, Message)> {
        if text.trim().is_empty() {
            return Err(StoreError::Invalid("text is required".into()));
        }
        let bot = self
            .store()
            .registry()
            .bot(&key.bot_id)
            .ok_or_else(|| StoreError::NotFound(format!("bot {}", key.bot_id)))?;
        let conversations = self.store().conversations();
        let mut conversation = conversations.lock(key).await?;

        let now = self.now();
        let reply = Message::human_reply(text, now);
        let reply_id = reply.id.clone();
        conversations.append_message(&mut conversation, reply);
        info!(conversation = %key, "operator reply recorded; conversation in manual mode");

        let status = match self.vault().reveal(&bot.access_token) {
            Some(token) => match self.platform().push_text(&token, &key.peer_id, text).await {
                Ok(()) => DeliveryStatus::Delivered,
                Err(err) => {
                    warn!(conversation = %key, error = %err, "operator reply delivery failed");
                    DeliveryStatus::Failed
                }
            },
            None => {
                warn!(conversation = %key, "access token unavailable; operator reply not delivered");
                DeliveryStatus::Failed
            }
        };
        conversation.set_delivery_status(&reply_id, status);

        let message = conversation
            .find_message(&reply_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("message {reply_id}")))?;
        let snapshot = conversation.clone();
        drop(conversation);
        self.store().mark_dirty();
        Ok((snapshot, message))
    }

    pub async fn set_reply_mode(
        &self,
        key: &ConversationKey,
        auto_reply_enabled: bool,
    ) -> Result<Conversation> {
        let conversation = self
            .store()
            .conversations()
            .set_reply_mode(key, auto_reply_enabled, self.now())
            .await?;
        self.store().mark_dirty();
        Ok(conversation)
    }
}
