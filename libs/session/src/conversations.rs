use std::collections::BTreeMap;
use std::sync::Arc;

use csd_core::{
    Bot, Conversation, ConversationKey, ConversationSummary, Message,
    PeerContext,
};
use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::registry::BotRegistry;

/// A conversation behind its own lock. Holding the guard serializes every step of the
/// pipeline for that conversation while other conversations proceed in parallel.
pub type ConversationHandle = Arc<Mutex<Conversation>>;
pub type ConversationGuard = OwnedMutexGuard<Conversation>;

/// In-memory conversation store keyed by `(botId, peerId)`.
#[derive(Clone)]
pub struct ConversationStore {
    conversations: Arc<DashMap<ConversationKey, ConversationHandle>>,
    registry: BotRegistry,
}

impl ConversationStore {
    pub fn new(registry: BotRegistry) -> Self {
        Self {
            conversations: Arc::new(DashMap::new()),
            registry,
        }
    }

    pub fn from_parts(registry: BotRegistry, conversations: BTreeMap<String, Conversation>) -> Self {
        let store = Self::new(registry);
        for conversation in conversations.into_values() {
            store
                .conversations
                .insert(conversation.key(), Arc::new(Mutex::new(conversation)));
        }
        store
    }

    pub fn registry(&self) -> &BotRegistry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Looks a conversation up, creating it in automatic mode if absent.
    /// Returns the locked conversation and whether it was created by this call.
    pub async fn get_or_create(
        &self,
        bot: &Bot,
        peer_id: &str,
        peer_context: PeerContext,
        now: OffsetDateTime,
    ) -> (ConversationGuard, bool) {
        let key = ConversationKey::new(bot.id.clone(), peer_id);
        let mut created = false;
        let handle = self
            .conversations
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(Conversation::new(
                    &key,
                    bot.tenant_id.clone(),
                    bot.platform,
                    peer_context,
                    now,
                )))
            })
            .value()
            .clone();
        if created {
            debug!(conversation = %key, "conversation created");
            self.registry.record_conversation(&bot.tenant_id);
        }
        (handle.lock_owned().await, created)
    }

    /// Locks an existing conversation. Conversations of deleted bots are not reachable.
    pub async fn lock(&self, key: &ConversationKey) -> Result<ConversationGuard> {
        if self.registry.bot(&key.bot_id).is_none() {
            return Err(StoreError::NotFound(format!("bot {}", key.bot_id)));
        }
        let handle = self
            .conversations
            .get(key)
            .map(|h| h.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {key}")))?;
        Ok(handle.lock_owned().await)
    }

    /// Clone of an existing conversation.
    pub async fn get(&self, key: &ConversationKey) -> Result<Conversation> {
        Ok(self.lock(key).await?.clone())
    }

    /// Appends a message and bumps the owning bot's counters.
    pub fn append_message(&self, conversation: &mut Conversation, message: Message) {
        let first = conversation.messages.is_empty();
        conversation.append(message);
        self.registry.record_message(&conversation.bot_id, first);
    }

    pub async fn set_reply_mode(
        &self,
        key: &ConversationKey,
        enabled: bool,
        now: OffsetDateTime,
    ) -> Result<Conversation> {
        let mut conversation = self.lock(key).await?;
        if conversation.set_reply_mode(enabled, now) {
            debug!(conversation = %key, mode = conversation.reply_mode().as_str(), "reply mode set");
        }
        Ok(conversation.clone())
    }

    /// Summaries for one bot, most recently updated first.
    pub async fn summaries(&self, bot_id: &str) -> Result<Vec<ConversationSummary>> {
        if self.registry.bot(bot_id).is_none() {
            return Err(StoreError::NotFound(format!("bot {bot_id}")));
        }
        let handles: Vec<ConversationHandle> = self
            .conversations
            .iter()
            .filter(|e| e.key().bot_id == bot_id)
            .map(|e| e.value().clone())
            .collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(ConversationSummary::from(&*handle.lock().await));
        }
        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        Ok(summaries)
    }

    /// Every conversation keyed by `"botId:peerId"`. Waits for in-flight pipelines to release.
    pub async fn snapshot(&self) -> BTreeMap<String, Conversation> {
        let handles: Vec<(ConversationKey, ConversationHandle)> = self
            .conversations
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut out = BTreeMap::new();
        for (key, handle) in handles {
            out.insert(key.to_string(), handle.lock().await.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NewBot;
    use csd_core::{NormalizedMessage, PlanTier, Platform, ReplyMode};
    use security::Vault;
    use time::{Duration, macros::datetime};

    const T: OffsetDateTime = datetime!(2024-01-01 10:00 UTC);

    fn setup() -> (ConversationStore, Bot) {
        let registry = BotRegistry::new();
        registry
            .create_tenant(Some("t1".into()), "Acme", PlanTier::Free, T)
            .unwrap();
        let bot = registry
            .create_bot(
                &Vault::disabled(),
                NewBot {
                    tenant_id: "t1".into(),
                    name: "Support".into(),
                    platform: Platform::Line,
                    access_token: "tok".into(),
                    signing_secret: "sec".into(),
                },
                T,
            )
            .unwrap();
        (ConversationStore::new(registry), bot)
    }

    #[tokio::test]
    async fn get_or_create_creates_once_in_auto_mode() {
        let (store, bot) = setup();
        let (conv, created) = store.get_or_create(&bot, "P1", PeerContext::Direct, T).await;
        assert!(created);
        assert_eq!(conv.reply_mode(), ReplyMode::Auto);
        drop(conv);
        let (_, created) = store.get_or_create(&bot, "P1", PeerContext::Direct, T).await;
        assert!(!created);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.registry().tenant("t1").unwrap().usage.conversation_count,
            1
        );
    }

    #[tokio::test]
    async fn append_bumps_counters_and_keeps_order() {
        let (store, bot) = setup();
        let (mut conv, _) = store.get_or_create(&bot, "P1", PeerContext::Direct, T).await;
        for i in 0..3 {
            store.append_message(
                &mut conv,
                Message::inbound(
                    NormalizedMessage::text(format!("m{i}")),
                    T + Duration::seconds(i),
                ),
            );
        }
        assert_eq!(conv.updated_at, T + Duration::seconds(2));
        let contents: Vec<_> = conv.messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2"]);
        drop(conv);
        let bot = store.registry().bot(&bot.id).unwrap();
        assert_eq!(bot.message_count, 3);
        assert_eq!(bot.conversation_count, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_conversation_are_not_lost() {
        let (store, bot) = setup();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let bot = bot.clone();
            tasks.push(tokio::spawn(async move {
                let (mut conv, _) = store
                    .get_or_create(&bot, "P1", PeerContext::Direct, T)
                    .await;
                store.append_message(
                    &mut conv,
                    Message::inbound(NormalizedMessage::text(format!("m{i}")), T),
                );
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let key = ConversationKey::new(bot.id.clone(), "P1");
        assert_eq!(store.get(&key).await.unwrap().messages.len(), 32);
        assert_eq!(store.registry().bot(&bot.id).unwrap().conversation_count, 1);
    }

    #[tokio::test]
    async fn set_reply_mode_and_summaries() {
        let (store, bot) = setup();
        for (peer, offset) in [("P1", 0), ("P2", 5)] {
            let (mut conv, _) = store
                .get_or_create(&bot, peer, PeerContext::Direct, T)
                .await;
            store.append_message(
                &mut conv,
                Message::inbound(NormalizedMessage::text("hi"), T + Duration::minutes(offset)),
            );
        }
        let key = ConversationKey::new(bot.id.clone(), "P1");
        let conv = store.set_reply_mode(&key, false, T).await.unwrap();
        assert_eq!(conv.reply_mode(), ReplyMode::Manual);

        let summaries = store.summaries(&bot.id).await.unwrap();
        let peers: Vec<_> = summaries.iter().map(|s| s.peer_id.as_str()).collect();
        assert_eq!(peers, vec!["P2", "P1"]);
        assert_eq!(summaries[1].reply_mode, ReplyMode::Manual);
    }

    #[tokio::test]
    async fn deleted_bot_conversations_are_unreachable() {
        let (store, bot) = setup();
        drop(store.get_or_create(&bot, "P1", PeerContext::Direct, T).await);
        store.registry().delete_bot(&bot.id, T).unwrap();
        let key = ConversationKey::new(bot.id.clone(), "P1");
        assert!(matches!(store.get(&key).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.snapshot().await.len(), 1);
    }
}
