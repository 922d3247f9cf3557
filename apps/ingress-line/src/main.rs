use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use csd_core::SharedPlatformClient;
use csd_ingress_line::{HttpLineApi, IngressConfig, Services, build_app, system_clock};
use csd_responder::{KnowledgeBase, OpenAiResponder, SharedResponder};
use csd_session::{DeskStore, JsonFileStore};
use csd_telemetry::{TelemetryConfig, init_telemetry};
use security::Vault;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env("csd-ingress-line", env!("CARGO_PKG_VERSION"));
    init_telemetry(telemetry)?;

    let cfg = IngressConfig::from_env().context("load ingress configuration")?;
    let vault = Vault::from_env();

    let snapshot = Arc::new(JsonFileStore::new(cfg.data_path.clone()));
    let store = DeskStore::load(snapshot)
        .await
        .with_context(|| format!("load snapshot {}", cfg.data_path.display()))?;

    let knowledge = KnowledgeBase::load(cfg.knowledge_path.as_deref())?;
    let responder: Option<SharedResponder> = match OpenAiResponder::from_config(&cfg.responder)? {
        Some(responder) => Some(Arc::new(responder)),
        None => {
            warn!("LLM_API_KEY not set; automated replies disabled");
            None
        }
    };
    let platform: SharedPlatformClient =
        Arc::new(HttpLineApi::new(&cfg.line_api_base, cfg.platform_timeout)?);

    let app = build_app(
        &cfg,
        Services {
            store: store.clone(),
            vault,
            platform,
            responder,
            knowledge: Arc::new(knowledge),
            clock: system_clock(),
        },
    );
    let _sweeper = app
        .dedup
        .spawn_sweeper(Duration::from_secs(cfg.idempotency.sweep_secs));
    let _autosave = store.spawn_autosave();

    info!(addr = %cfg.bind, "ingress-line listening");
    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;
    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.persist_or_log().await;
    info!("ingress-line stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}
