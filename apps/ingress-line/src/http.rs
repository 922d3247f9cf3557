use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use csd_core::{BotView, Conversation, ConversationKey, ConversationSummary, PlanTier, Tenant};
use csd_ingress_common::{
    IngressSecurityConfig, ack200, json_error, verify_bearer, with_request_id,
};
use csd_session::{BotUpdate, NewBot, StoreError};
use serde::Deserialize;
use tracing::error;

use crate::dispatcher::{Dispatcher, WebhookOutcome};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Store errors as operator-facing HTTP responses.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Io(_) | StoreError::Serde(_) => {
                error!(error = %self.0, "store failure on operator route");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        json_error(status, self.0.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState, security: IngressSecurityConfig) -> Router {
    let webhook = Router::new().route(
        "/webhook/{bot_id}",
        post(handle_webhook).get(handshake),
    );

    let operator = Router::new()
        .route("/agent/bots/{bot_id}/conversations", get(list_conversations))
        .route(
            "/agent/bots/{bot_id}/conversations/{peer_id}",
            get(get_conversation),
        )
        .route(
            "/agent/bots/{bot_id}/conversations/{peer_id}/messages",
            post(send_reply),
        )
        .route(
            "/agent/bots/{bot_id}/conversations/{peer_id}/mode",
            put(set_mode),
        )
        .route("/admin/tenants", post(create_tenant))
        .route("/admin/tenants/{tenant_id}", get(get_tenant))
        .route("/admin/bots", post(create_bot).get(list_bots))
        .route("/admin/bots/{bot_id}", patch(update_bot).delete(delete_bot))
        .layer(middleware::from_fn(verify_bearer))
        .layer(Extension(security));

    webhook
        .merge(operator)
        .layer(middleware::from_fn(with_request_id))
        .with_state(state)
}

async fn handshake() -> StatusCode {
    StatusCode::OK
}

async fn handle_webhook(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state
        .dispatcher
        .handle_webhook(&bot_id, &headers, &body)
        .await
    {
        WebhookOutcome::UnknownBot => json_error(StatusCode::NOT_FOUND, "bot not found"),
        _ => ack200().into_response(),
    }
}

async fn list_conversations(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let summaries = state
        .dispatcher
        .store()
        .conversations()
        .summaries(&bot_id)
        .await?;
    Ok(Json(summaries))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path((bot_id, peer_id)): Path<(String, String)>,
) -> ApiResult<Json<Conversation>> {
    let key = ConversationKey::new(bot_id, peer_id);
    Ok(Json(state.dispatcher.store().conversations().get(&key).await?))
}

#[derive(Debug, Deserialize)]
struct HumanReply {
    text: String,
}

async fn send_reply(
    State(state): State<AppState>,
    Path((bot_id, peer_id)): Path<(String, String)>,
    Json(body): Json<HumanReply>,
) -> ApiResult<impl IntoResponse> {
    let key = ConversationKey::new(bot_id, peer_id);
    let (_, message) = state.dispatcher.send_human_reply(&key, &body.text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModeUpdate {
    auto_reply_enabled: bool,
}

async fn set_mode(
    State(state): State<AppState>,
    Path((bot_id, peer_id)): Path<(String, String)>,
    Json(body): Json<ModeUpdate>,
) -> ApiResult<Json<ConversationSummary>> {
    let key = ConversationKey::new(bot_id, peer_id);
    let conversation = state
        .dispatcher
        .set_reply_mode(&key, body.auto_reply_enabled)
        .await?;
    Ok(Json(ConversationSummary::from(&conversation)))
}

#[derive(Debug, Deserialize)]
struct NewTenant {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    plan: PlanTier,
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(body): Json<NewTenant>,
) -> ApiResult<impl IntoResponse> {
    let name = body
        .name
        .clone()
        .or_else(|| body.id.clone())
        .unwrap_or_default();
    let tenant = state.dispatcher.store().registry().create_tenant(
        body.id,
        &name,
        body.plan,
        state.dispatcher.now(),
    )?;
    state.dispatcher.store().mark_dirty();
    Ok((StatusCode::CREATED, Json(tenant)))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<Tenant>> {
    state
        .dispatcher
        .store()
        .registry()
        .tenant(&tenant_id)
        .map(Json)
        .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id}")).into())
}

async fn create_bot(
    State(state): State<AppState>,
    Json(body): Json<NewBot>,
) -> ApiResult<impl IntoResponse> {
    let dispatcher = &state.dispatcher;
    let bot = dispatcher
        .store()
        .registry()
        .create_bot(dispatcher.vault(), body, dispatcher.now())?;
    dispatcher.store().mark_dirty();
    Ok((StatusCode::CREATED, Json(bot.view())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotFilter {
    tenant_id: Option<String>,
}

async fn list_bots(
    State(state): State<AppState>,
    Query(filter): Query<BotFilter>,
) -> Json<Vec<BotView>> {
    Json(
        state
            .dispatcher
            .store()
            .registry()
            .list_bots(filter.tenant_id.as_deref()),
    )
}

async fn update_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(body): Json<BotUpdate>,
) -> ApiResult<Json<BotView>> {
    let dispatcher = &state.dispatcher;
    let bot = dispatcher.store().registry().update_bot(
        dispatcher.vault(),
        &bot_id,
        body,
        dispatcher.now(),
    )?;
    dispatcher.store().mark_dirty();
    Ok(Json(bot.view()))
}

async fn delete_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> ApiResult<StatusCode> {
    let dispatcher = &state.dispatcher;
    dispatcher
        .store()
        .registry()
        .delete_bot(&bot_id, dispatcher.now())?;
    dispatcher.store().mark_dirty();
    Ok(StatusCode::NO_CONTENT)
}
