//! In-process dedup cache for inbound platform events.
//!
//! Platforms deliver webhooks at least once. The guard remembers a fingerprint of every message
//! it lets through for a bounded TTL so a redelivered event is dropped instead of being appended
//! twice. Entries expire on access and are also purged by a background sweeper.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
    time::Duration as StdDuration,
};

use csd_core::NormalizedMessage;
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_TTL_SECS: u64 = 300;
/// Upper bound on the dedup window; larger settings are clamped.
pub const MAX_TTL_SECS: u64 = 86_400;
pub const DEFAULT_SWEEP_SECS: u64 = 60;

/// Composite dedup key for one inbound message.
///
/// The platform message id is used when present, otherwise a hash of the content stands in.
/// Type and content are always part of the key so two kinds of message sharing an id are
/// never confused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub bot_id: String,
    pub peer_id: String,
    pub msg_ref: String,
    pub content_type: String,
    pub content: String,
}

impl DedupKey {
    pub fn for_message(bot_id: &str, peer_id: &str, message: &NormalizedMessage) -> Self {
        let content_type = message.content_type.as_str();
        let msg_ref = match message.platform_message_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!(
                "h:{}",
                security::content_hash(&[content_type, &message.content])
            ),
        };
        Self {
            bot_id: bot_id.to_string(),
            peer_id: peer_id.to_string(),
            msg_ref,
            content_type: content_type.to_string(),
            content: message.content.clone(),
        }
    }

    /// Fixed-length storage form of the key.
    pub fn digest(&self) -> String {
        security::content_hash(&[
            &self.bot_id,
            &self.peer_id,
            &self.msg_ref,
            &self.content_type,
            &self.content,
        ])
    }
}

impl Display for DedupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.bot_id, self.peer_id, self.msg_ref, self.content_type
        )
    }
}

/// Contract implemented by dedup stores. Lookups are synchronous and never suspend.
pub trait IdemStore: Send + Sync {
    /// Records `key` until `now + ttl`. Returns `true` when the key was absent or expired
    /// (the caller should process the message) and `false` for a live duplicate.
    fn put_if_absent(&self, key: &str, ttl: Duration, now: OffsetDateTime) -> bool;

    /// Drops entries that expired at or before `now`; returns how many were removed.
    fn purge_expired(&self, now: OffsetDateTime) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type SharedIdemStore = Arc<dyn IdemStore>;

/// Process-local store. Restart clears it.
#[derive(Clone, Default)]
pub struct InMemoryIdemStore {
    inner: Arc<DashMap<String, OffsetDateTime>>,
}

impl InMemoryIdemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdemStore for InMemoryIdemStore {
    fn put_if_absent(&self, key: &str, ttl: Duration, now: OffsetDateTime) -> bool {
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(expiry(now, ttl));
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expiry(now, ttl));
                true
            }
        }
    }

    fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, expires| *expires > now);
        before.saturating_sub(self.inner.len())
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// `now + ttl`, saturating at the latest representable instant.
fn expiry(now: OffsetDateTime, ttl: Duration) -> OffsetDateTime {
    now.checked_add(ttl)
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// Configuration derived at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
    pub sweep_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            sweep_secs: DEFAULT_SWEEP_SECS,
        }
    }
}

impl IdempotencyConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(ttl) = std::env::var("DEDUP_TTL_SECS") {
            if let Ok(parsed) = ttl.trim().parse::<u64>() {
                cfg.ttl_secs = parsed.clamp(1, MAX_TTL_SECS);
                if parsed > MAX_TTL_SECS {
                    warn!(requested = parsed, applied = MAX_TTL_SECS, "DEDUP_TTL_SECS clamped");
                }
            }
        }
        if let Ok(sweep) = std::env::var("DEDUP_SWEEP_SECS") {
            if let Ok(parsed) = sweep.trim().parse::<u64>() {
                cfg.sweep_secs = parsed.max(1);
            }
        }
        cfg
    }
}

fn ttl_duration(ttl_secs: u64) -> Duration {
    let secs = ttl_secs.clamp(1, MAX_TTL_SECS);
    i64::try_from(secs)
        .map(Duration::seconds)
        .unwrap_or(Duration::seconds(MAX_TTL_SECS as i64))
}

/// Guard used by the webhook dispatcher to drop redelivered messages.
#[derive(Clone)]
pub struct IdempotencyGuard {
    ttl: Duration,
    store: SharedIdemStore,
}

impl IdempotencyGuard {
    pub fn new(store: SharedIdemStore, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl: ttl_duration(ttl_secs),
        }
    }

    pub fn in_memory(cfg: &IdempotencyConfig) -> Self {
        Self::new(Arc::new(InMemoryIdemStore::new()), cfg.ttl_secs)
    }

    pub fn store(&self) -> &SharedIdemStore {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` when the caller should proceed (first sighting within the TTL).
    pub fn should_process(&self, key: &DedupKey, now: OffsetDateTime) -> bool {
        let inserted = self.store.put_if_absent(&key.digest(), self.ttl, now);
        if !inserted {
            debug!(bot = %key.bot_id, peer = %key.peer_id, msg_ref = %key.msg_ref, "duplicate message dropped");
        }
        inserted
    }

    /// Spawns the periodic purge of expired entries.
    pub fn spawn_sweeper(&self, every: StdDuration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired(OffsetDateTime::now_utc());
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "dedup cache swept");
                }
                if store.len() > 100_000 {
                    warn!(entries = store.len(), "dedup cache unusually large");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csd_core::ContentType;
    use time::macros::datetime;

    fn key(id: Option<&str>, content: &str) -> DedupKey {
        let mut msg = NormalizedMessage::text(content);
        msg.platform_message_id = id.map(str::to_string);
        DedupKey::for_message("B1", "P1", &msg)
    }

    #[test]
    fn memory_store_dedupes_until_expiry() {
        let store = InMemoryIdemStore::new();
        let t = datetime!(2024-01-01 00:00 UTC);
        let ttl = Duration::minutes(5);
        assert!(store.put_if_absent("k", ttl, t));
        assert!(!store.put_if_absent("k", ttl, t + Duration::seconds(1)));
        assert!(!store.put_if_absent("k", ttl, t + Duration::seconds(299)));
        assert!(store.put_if_absent("k", ttl, t + Duration::minutes(5)));
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let store = InMemoryIdemStore::new();
        let t = datetime!(2024-01-01 00:00 UTC);
        store.put_if_absent("old", Duration::minutes(1), t);
        store.put_if_absent("new", Duration::minutes(10), t);
        assert_eq!(store.purge_expired(t + Duration::minutes(2)), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn guard_drops_same_message_within_ttl() {
        let guard = IdempotencyGuard::in_memory(&IdempotencyConfig::default());
        let t = datetime!(2024-01-01 00:00 UTC);
        let k = key(Some("m1"), "hi");
        assert!(guard.should_process(&k, t));
        assert!(!guard.should_process(&k, t + Duration::seconds(1)));
        assert!(guard.should_process(&k, t + Duration::seconds(301)));
    }

    #[test]
    fn key_distinguishes_type_sharing_an_id() {
        let text = key(Some("m1"), "[sticker]");
        let mut sticker = NormalizedMessage::text("[sticker]").with_platform_id("m1");
        sticker.content_type = ContentType::Sticker;
        let sticker = DedupKey::for_message("B1", "P1", &sticker);
        assert_ne!(text.digest(), sticker.digest());
    }

    #[test]
    fn content_hash_stands_in_for_missing_id() {
        let a = key(None, "hi");
        let b = key(None, "hi");
        let c = key(None, "hello");
        assert!(a.msg_ref.starts_with("h:"));
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn peers_do_not_share_keys() {
        let msg = NormalizedMessage::text("hi").with_platform_id("m1");
        let a = DedupKey::for_message("B1", "P1", &msg);
        let b = DedupKey::for_message("B1", "P2", &msg);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn config_defaults_to_five_minutes() {
        let cfg = IdempotencyConfig::default();
        assert_eq!(cfg.ttl_secs, 300);
        assert_eq!(cfg.sweep_secs, 60);
    }

    #[test]
    fn oversized_ttl_is_clamped_and_still_dedupes() {
        let t = datetime!(2024-01-01 00:00 UTC);
        for ttl_secs in [u64::MAX, 1_000_000_000_000] {
            let guard = IdempotencyGuard::new(Arc::new(InMemoryIdemStore::new()), ttl_secs);
            assert_eq!(guard.ttl(), Duration::seconds(MAX_TTL_SECS as i64));
            let k = key(Some("m1"), "hi");
            assert!(guard.should_process(&k, t));
            assert!(!guard.should_process(&k, t + Duration::hours(1)));
        }
    }

    #[test]
    fn expiry_saturates_near_the_end_of_time() {
        let store = InMemoryIdemStore::new();
        let late = PrimitiveDateTime::MAX.assume_utc() - Duration::seconds(10);
        assert!(store.put_if_absent("k", Duration::days(365), late));
        assert!(!store.put_if_absent("k", Duration::days(365), late + Duration::seconds(5)));
    }

    #[test]
    fn env_ttl_is_clamped() {
        unsafe {
            std::env::set_var("DEDUP_TTL_SECS", "1000000000000");
        }
        let cfg = IdempotencyConfig::from_env();
        unsafe {
            std::env::remove_var("DEDUP_TTL_SECS");
        }
        assert_eq!(cfg.ttl_secs, MAX_TTL_SECS);
    }

    #[tokio::test]
    async fn sweeper_purges_expired_entries() {
        let guard = IdempotencyGuard::in_memory(&IdempotencyConfig::default());
        let past = OffsetDateTime::now_utc() - Duration::hours(1);
        guard.store().put_if_absent("stale", Duration::minutes(5), past);
        assert_eq!(guard.store().len(), 1);
        let handle = guard.spawn_sweeper(StdDuration::from_millis(10));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        handle.abort();
        assert!(guard.store().is_empty());
    }
}
