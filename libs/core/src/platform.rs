use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PeerContext;

/// Display details of a remote user as reported by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
}

/// Addresses a user inside the context the message arrived from.
///
/// Group and room members can only be looked up through the group or room they spoke in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRef {
    pub context: PeerContext,
    /// Group or room id, or the user id for direct chats.
    pub peer_id: String,
    pub user_id: Option<String>,
}

impl PeerRef {
    pub fn direct(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            context: PeerContext::Direct,
            peer_id: user_id.clone(),
            user_id: Some(user_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform rate limited request")]
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("platform rejected credentials ({status})")]
    Unauthorized { status: StatusCode, body: String },
    #[error("platform server error {status}")]
    Server { status: StatusCode, body: String },
    #[error("platform client error {status}")]
    Client { status: StatusCode, body: String },
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Outbound calls made against a messaging platform on behalf of one bot.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn fetch_profile(
        &self,
        access_token: &str,
        peer: &PeerRef,
    ) -> Result<PeerProfile, PlatformError>;

    async fn push_text(&self, access_token: &str, to: &str, text: &str)
    -> Result<(), PlatformError>;
}

pub type SharedPlatformClient = Arc<dyn PlatformClient>;
