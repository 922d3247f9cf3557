use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{ReplyOutput, ReplyRequest, Responder, ResponderConfig, ResponderError};

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiResponder {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiResponder {
    /// Returns `None` when no API key is configured.
    pub fn from_config(cfg: &ResponderConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = cfg.api_key.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .user_agent(concat!("csd-responder/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout)
            .build()?;
        Ok(Some(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
        }))
    }

    fn payload(&self, request: &ReplyRequest) -> Value {
        let mut system = request.system_prompt.clone();
        if !request.knowledge_context.trim().is_empty() {
            system.push_str("\n\n");
            system.push_str(&request.knowledge_context);
        }
        let mut messages = vec![json!({ "role": "system", "content": system })];
        for turn in &request.history {
            messages.push(json!({ "role": turn.role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": request.user_message }));
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        })
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn generate_reply(&self, request: ReplyRequest) -> Result<ReplyOutput, ResponderError> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(&request))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ResponderError::Timeout
                } else {
                    ResponderError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "responder returned non-success status");
            return Err(classify_status(status, body));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| ResponderError::Malformed(err.to_string()))?;
        parse_completion(&payload)
    }
}

fn classify_status(status: StatusCode, body: String) -> ResponderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ResponderError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => ResponderError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ResponderError::Timeout,
        _ => ResponderError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

pub(crate) fn parse_completion(payload: &Value) -> Result<ReplyOutput, ResponderError> {
    let text = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if text.is_empty() {
        return Err(ResponderError::Malformed(
            "completion had empty content".into(),
        ));
    }
    let tokens = payload
        .pointer("/usage/total_tokens")
        .and_then(Value::as_u64);
    debug!(chars = text.chars().count(), tokens, "completion received");
    Ok(ReplyOutput { text, tokens })
}
