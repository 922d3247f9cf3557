use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::Platform;

const WEBHOOK_PATH_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Subscription tier of a tenant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

/// Running usage counters for the current billing cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantUsage {
    #[serde(default)]
    pub conversation_count: u64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub token_count: u64,
}

/// A customer organisation that owns bots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub plan: PlanTier,
    #[serde(default)]
    pub usage: TenantUsage,
    #[serde(with = "time::serde::rfc3339")]
    pub billing_cycle_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub billing_cycle_end: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Tenant {
    /// New tenant on the free plan with a 30-day billing cycle starting `now`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plan: PlanTier::Free,
            usage: TenantUsage::default(),
            billing_cycle_start: now,
            billing_cycle_end: now + Duration::days(30),
            created_at: now,
        }
    }
}

/// A credential as persisted. The plaintext variant only exists when no vault key is configured.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum StoredCredential {
    Encrypted(String),
    Plaintext(String),
}

impl StoredCredential {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, StoredCredential::Encrypted(_))
    }
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredCredential::Encrypted(_) => f.write_str("Encrypted(***)"),
            StoredCredential::Plaintext(_) => f.write_str("Plaintext(***)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    #[default]
    Active,
    Inactive,
    Deleted,
}

/// A tenant's account on one messaging platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bot {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub platform: Platform,
    pub access_token: StoredCredential,
    pub signing_secret: StoredCredential,
    pub webhook_path: String,
    #[serde(default)]
    pub status: BotStatus,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub conversation_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Bot {
    pub fn is_active(&self) -> bool {
        self.status == BotStatus::Active
    }

    /// Public projection without credential material.
    pub fn view(&self) -> BotView {
        BotView {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            name: self.name.clone(),
            platform: self.platform,
            webhook_path: self.webhook_path.clone(),
            status: self.status,
            message_count: self.message_count,
            conversation_count: self.conversation_count,
            created_at: self.created_at,
        }
    }
}

/// What the admin surface returns for a bot. Never carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BotView {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub platform: Platform,
    pub webhook_path: String,
    pub status: BotStatus,
    pub message_count: u64,
    pub conversation_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Random, URL-safe webhook path segment.
///
/// ```
/// let path = csd_core::issue_webhook_path();
/// assert_eq!(path.len(), 24);
/// assert!(path.chars().all(|c| c.is_ascii_alphanumeric()));
/// ```
pub fn issue_webhook_path() -> String {
    nanoid::nanoid!(24, &WEBHOOK_PATH_ALPHABET)
}
