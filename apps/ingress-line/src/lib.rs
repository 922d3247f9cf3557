//! LINE ingress for the customer service desk.
//!
//! `POST /webhook/{botId}` runs each event through normalization, dedup, the conversation
//! store and the auto-reply engine, and always acknowledges with `200 {}` unless the bot is
//! unknown. Operator routes under `/agent` and `/admin` sit behind the admin bearer token.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod line_api;

use std::sync::Arc;

use axum::Router;
use csd_autoreply::AutoReplyEngine;
use csd_core::SharedPlatformClient;
use csd_idempotency::IdempotencyGuard;
use csd_ingress_common::IngressSecurityConfig;
use csd_responder::{KnowledgeBase, SharedResponder};
use csd_session::DeskStore;
use security::Vault;

pub use config::{ConfigError, IngressConfig};
pub use dispatcher::{BatchStats, Clock, Dispatcher, WebhookOutcome, system_clock};
pub use http::{AppState, router};
pub use line_api::HttpLineApi;

/// Collaborators the service is assembled from.
pub struct Services {
    pub store: DeskStore,
    pub vault: Vault,
    pub platform: SharedPlatformClient,
    pub responder: Option<SharedResponder>,
    pub knowledge: Arc<KnowledgeBase>,
    pub clock: Clock,
}

pub struct App {
    pub dispatcher: Arc<Dispatcher>,
    pub dedup: IdempotencyGuard,
    pub router: Router,
}

pub fn build_app(cfg: &IngressConfig, services: Services) -> App {
    let dedup = IdempotencyGuard::in_memory(&cfg.idempotency);
    let engine = Arc::new(AutoReplyEngine::new(
        cfg.autoreply.clone(),
        services.responder,
        services.knowledge,
        services.platform.clone(),
        services.vault.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        services.store,
        dedup.clone(),
        services.vault,
        services.platform,
        engine,
        cfg.verify_signatures,
        cfg.profile_max_age,
        services.clock,
    ));
    let security = IngressSecurityConfig {
        bearer: cfg.admin_token.clone(),
    };
    let router = router(
        AppState {
            dispatcher: dispatcher.clone(),
        },
        security,
    );
    App {
        dispatcher,
        dedup,
        router,
    }
}
