use std::collections::BTreeMap;
use std::sync::Arc;

use csd_core::{
    Bot, BotStatus, BotView, PlanTier, Platform, Tenant, issue_webhook_path,
};
use dashmap::DashMap;
use security::Vault;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Input for registering a bot. Credentials arrive in plaintext and are sealed on the way in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBot {
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub platform: Platform,
    pub access_token: String,
    pub signing_secret: String,
}

/// Partial update for a bot. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotUpdate {
    pub name: Option<String>,
    pub access_token: Option<String>,
    pub signing_secret: Option<String>,
    pub active: Option<bool>,
}

/// Tenants and bots, indexed by id and by webhook path.
#[derive(Clone, Default)]
pub struct BotRegistry {
    tenants: Arc<DashMap<String, Tenant>>,
    bots: Arc<DashMap<String, Bot>>,
    by_webhook: Arc<DashMap<String, String>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(tenants: BTreeMap<String, Tenant>, bots: BTreeMap<String, Bot>) -> Self {
        let registry = Self::new();
        for (id, tenant) in tenants {
            registry.tenants.insert(id, tenant);
        }
        for (id, bot) in bots {
            registry.by_webhook.insert(bot.webhook_path.clone(), id.clone());
            registry.bots.insert(id, bot);
        }
        registry
    }

    pub fn tenants(&self) -> BTreeMap<String, Tenant> {
        self.tenants
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn bots(&self) -> BTreeMap<String, Bot> {
        self.bots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn create_tenant(
        &self,
        id: Option<String>,
        name: &str,
        plan: PlanTier,
        now: OffsetDateTime,
    ) -> Result<Tenant> {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut tenant = Tenant::new(id.clone(), name, now);
        tenant.plan = plan;
        match self.tenants.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tenant.clone());
                info!(tenant = %id, "tenant created");
                Ok(tenant)
            }
        }
    }

    pub fn tenant(&self, id: &str) -> Option<Tenant> {
        self.tenants.get(id).map(|t| t.value().clone())
    }

    pub fn create_bot(&self, vault: &Vault, new: NewBot, now: OffsetDateTime) -> Result<Bot> {
        if !self.tenants.contains_key(&new.tenant_id) {
            return Err(StoreError::NotFound(format!("tenant {}", new.tenant_id)));
        }
        if new.access_token.trim().is_empty() || new.signing_secret.trim().is_empty() {
            return Err(StoreError::Invalid(
                "accessToken and signingSecret are required".into(),
            ));
        }
        let id = Uuid::new_v4().to_string();
        let webhook_path = self.reserve_webhook_path(&id);
        let bot = Bot {
            id: id.clone(),
            tenant_id: new.tenant_id,
            name: new.name,
            platform: new.platform,
            access_token: vault.seal(&new.access_token),
            signing_secret: vault.seal(&new.signing_secret),
            webhook_path,
            status: BotStatus::Active,
            message_count: 0,
            conversation_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.bots.insert(id.clone(), bot.clone());
        info!(bot_id = %id, tenant = %bot.tenant_id, webhook = %bot.webhook_path, "bot registered");
        Ok(bot)
    }

    fn reserve_webhook_path(&self, bot_id: &str) -> String {
        loop {
            let candidate = issue_webhook_path();
            if let dashmap::mapref::entry::Entry::Vacant(slot) =
                self.by_webhook.entry(candidate.clone())
            {
                slot.insert(bot_id.to_string());
                return candidate;
            }
            warn!("webhook path collision; issuing another");
        }
    }

    pub fn update_bot(
        &self,
        vault: &Vault,
        bot_id: &str,
        update: BotUpdate,
        now: OffsetDateTime,
    ) -> Result<Bot> {
        let mut bot = self
            .bots
            .get_mut(bot_id)
            .filter(|b| b.status != BotStatus::Deleted)
            .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))?;
        if let Some(name) = update.name {
            bot.name = name;
        }
        if let Some(token) = update.access_token.filter(|t| !t.trim().is_empty()) {
            bot.access_token = vault.seal(&token);
            info!(bot_id, "access token rotated");
        }
        if let Some(secret) = update.signing_secret.filter(|s| !s.trim().is_empty()) {
            bot.signing_secret = vault.seal(&secret);
            info!(bot_id, "signing secret rotated");
        }
        if let Some(active) = update.active {
            bot.status = if active {
                BotStatus::Active
            } else {
                BotStatus::Inactive
            };
        }
        bot.updated_at = now;
        Ok(bot.clone())
    }

    /// Removes a bot from the active set. Its webhook path stays reserved.
    pub fn delete_bot(&self, bot_id: &str, now: OffsetDateTime) -> Result<Bot> {
        let mut bot = self
            .bots
            .get_mut(bot_id)
            .filter(|b| b.status != BotStatus::Deleted)
            .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))?;
        bot.status = BotStatus::Deleted;
        bot.updated_at = now;
        info!(bot_id, "bot deleted");
        Ok(bot.clone())
    }

    /// Bot by id, excluding deleted ones.
    pub fn bot(&self, bot_id: &str) -> Option<Bot> {
        self.bots
            .get(bot_id)
            .filter(|b| b.status != BotStatus::Deleted)
            .map(|b| b.value().clone())
    }

    /// Resolves the `{botId}` segment of a webhook URL: the issued webhook path, or the bot id.
    /// Deleted bots do not resolve.
    pub fn resolve_webhook(&self, path_id: &str) -> Option<Bot> {
        let bot_id = self
            .by_webhook
            .get(path_id)
            .map(|id| id.value().clone())
            .unwrap_or_else(|| path_id.to_string());
        self.bot(&bot_id)
    }

    pub fn list_bots(&self, tenant_id: Option<&str>) -> Vec<BotView> {
        let mut views: Vec<BotView> = self
            .bots
            .iter()
            .filter(|b| b.status != BotStatus::Deleted)
            .filter(|b| tenant_id.is_none_or(|t| b.tenant_id == t))
            .map(|b| b.view())
            .collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        views
    }

    /// Bumps lifetime counters after a message lands in a conversation.
    pub fn record_message(&self, bot_id: &str, first_in_conversation: bool) {
        let tenant_id = match self.bots.get_mut(bot_id) {
            Some(mut bot) => {
                bot.message_count += 1;
                if first_in_conversation {
                    bot.conversation_count += 1;
                }
                bot.tenant_id.clone()
            }
            None => return,
        };
        if let Some(mut tenant) = self.tenants.get_mut(&tenant_id) {
            tenant.usage.message_count += 1;
        }
    }

    pub fn record_conversation(&self, tenant_id: &str) {
        if let Some(mut tenant) = self.tenants.get_mut(tenant_id) {
            tenant.usage.conversation_count += 1;
        }
    }

    pub fn record_tokens(&self, tenant_id: &str, tokens: u64) {
        if let Some(mut tenant) = self.tenants.get_mut(tenant_id) {
            tenant.usage.token_count += tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csd_core::StoredCredential;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-01-01 00:00 UTC);

    fn registry_with_tenant() -> BotRegistry {
        let registry = BotRegistry::new();
        registry
            .create_tenant(Some("t1".into()), "Acme", PlanTier::Pro, NOW)
            .unwrap();
        registry
    }

    fn new_bot() -> NewBot {
        NewBot {
            tenant_id: "t1".into(),
            name: "Support".into(),
            platform: Platform::Line,
            access_token: "line-access-token".into(),
            signing_secret: "line-channel-secret".into(),
        }
    }

    #[test]
    fn duplicate_tenant_is_rejected() {
        let registry = registry_with_tenant();
        let err = registry
            .create_tenant(Some("t1".into()), "Again", PlanTier::Free, NOW)
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn bots_get_unique_paths_and_sealed_credentials() {
        let registry = registry_with_tenant();
        let vault = Vault::new(Some("a sufficiently long secret"));
        let a = registry.create_bot(&vault, new_bot(), NOW).unwrap();
        let b = registry.create_bot(&vault, new_bot(), NOW).unwrap();
        assert_ne!(a.webhook_path, b.webhook_path);
        assert!(a.access_token.is_encrypted());
        assert_eq!(
            vault.reveal(&a.signing_secret).as_deref(),
            Some("line-channel-secret")
        );
        assert_eq!(
            registry.resolve_webhook(&a.webhook_path).map(|b| b.id),
            Some(a.id.clone())
        );
        assert_eq!(registry.resolve_webhook(&a.id).map(|b| b.id), Some(a.id));
    }

    #[test]
    fn disabled_vault_keeps_plaintext() {
        let registry = registry_with_tenant();
        let bot = registry
            .create_bot(&Vault::disabled(), new_bot(), NOW)
            .unwrap();
        assert_eq!(
            bot.access_token,
            StoredCredential::Plaintext("line-access-token".into())
        );
    }

    #[test]
    fn unknown_tenant_is_not_found() {
        let registry = BotRegistry::new();
        let err = registry
            .create_bot(&Vault::disabled(), new_bot(), NOW)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn update_rotates_and_toggles() {
        let registry = registry_with_tenant();
        let vault = Vault::new(Some("a sufficiently long secret"));
        let bot = registry.create_bot(&vault, new_bot(), NOW).unwrap();
        let updated = registry
            .update_bot(
                &vault,
                &bot.id,
                BotUpdate {
                    access_token: Some("rotated".into()),
                    active: Some(false),
                    ..Default::default()
                },
                NOW,
            )
            .unwrap();
        assert_eq!(updated.status, BotStatus::Inactive);
        assert_eq!(vault.reveal(&updated.access_token).as_deref(), Some("rotated"));
        assert_eq!(updated.webhook_path, bot.webhook_path);
    }

    #[test]
    fn deleted_bots_stop_resolving() {
        let registry = registry_with_tenant();
        let bot = registry
            .create_bot(&Vault::disabled(), new_bot(), NOW)
            .unwrap();
        registry.delete_bot(&bot.id, NOW).unwrap();
        assert!(registry.resolve_webhook(&bot.webhook_path).is_none());
        assert!(registry.bot(&bot.id).is_none());
        assert!(registry.list_bots(None).is_empty());
        assert!(registry.delete_bot(&bot.id, NOW).is_err());
        assert_eq!(registry.bots()[&bot.id].status, BotStatus::Deleted);
    }

    #[test]
    fn counters_roll_up_to_tenant() {
        let registry = registry_with_tenant();
        let bot = registry
            .create_bot(&Vault::disabled(), new_bot(), NOW)
            .unwrap();
        registry.record_conversation("t1");
        registry.record_message(&bot.id, true);
        registry.record_message(&bot.id, false);
        registry.record_tokens("t1", 42);
        let bot = registry.bot(&bot.id).unwrap();
        assert_eq!(bot.message_count, 2);
        assert_eq!(bot.conversation_count, 1);
        let usage = registry.tenant("t1").unwrap().usage;
        assert_eq!(usage.conversation_count, 1);
        assert_eq!(usage.message_count, 2);
        assert_eq!(usage.token_count, 42);
    }
}
