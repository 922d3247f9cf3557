use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Bot, Conversation, Tenant};

/// Whole-store snapshot as persisted to disk: tenants, bots and conversations keyed by id
/// (conversations by `"botId:peerId"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(default)]
    pub tenants: BTreeMap<String, Tenant>,
    #[serde(default)]
    pub bots: BTreeMap<String, Bot>,
    #[serde(default)]
    pub conversations: BTreeMap<String, Conversation>,
}

impl Database {
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty() && self.bots.is_empty() && self.conversations.is_empty()
    }
}
