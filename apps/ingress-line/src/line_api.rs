use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use csd_core::{PeerContext, PeerProfile, PeerRef, PlatformClient, PlatformError};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Messaging API client for LINE.
#[derive(Clone)]
pub struct HttpLineApi {
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    display_name: String,
    #[serde(default)]
    picture_url: Option<String>,
}

impl HttpLineApi {
    pub fn new(api_base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("csd-ingress-line/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn profile_url(&self, peer: &PeerRef) -> Result<String, PlatformError> {
        let user_id = peer
            .user_id
            .as_deref()
            .ok_or_else(|| PlatformError::Decode("peer has no user id".into()))?;
        Ok(match peer.context {
            PeerContext::Direct => format!("{}/v2/bot/profile/{user_id}", self.api_base),
            PeerContext::Group => format!(
                "{}/v2/bot/group/{}/member/{user_id}",
                self.api_base, peer.peer_id
            ),
            PeerContext::Room => format!(
                "{}/v2/bot/room/{}/member/{user_id}",
                self.api_base, peer.peer_id
            ),
        })
    }
}

#[async_trait]
impl PlatformClient for HttpLineApi {
    async fn fetch_profile(
        &self,
        access_token: &str,
        peer: &PeerRef,
    ) -> Result<PeerProfile, PlatformError> {
        let url = self.profile_url(peer)?;
        let res = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| PlatformError::Transport(anyhow!(err)))?;
        let res = classify_response(res).await?;
        let profile: ProfileResponse = res
            .json()
            .await
            .map_err(|err| PlatformError::Decode(err.to_string()))?;
        Ok(PeerProfile {
            display_name: profile.display_name,
            picture_url: profile.picture_url.filter(|u| !u.is_empty()),
        })
    }

    async fn push_text(
        &self,
        access_token: &str,
        to: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        let url = format!("{}/v2/bot/message/push", self.api_base);
        let payload = json!({
            "to": to,
            "messages": [{ "type": "text", "text": text }],
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| PlatformError::Transport(anyhow!(err)))?;
        classify_response(res).await?;
        debug!(to, "line push accepted");
        Ok(())
    }
}

async fn classify_response(res: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let retry_header = res.headers().get(header::RETRY_AFTER).cloned();
    let body = res.text().await.unwrap_or_else(|_| "<empty>".to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_header
            .as_ref()
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(PlatformError::RateLimited { retry_after, body });
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PlatformError::Unauthorized { status, body });
    }
    if status.is_server_error() {
        return Err(PlatformError::Server { status, body });
    }
    Err(PlatformError::Client { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::HeaderMap,
        routing::{get, post},
    };
    use serde_json::Value;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn api(base: &str) -> HttpLineApi {
        HttpLineApi::new(base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetches_direct_and_group_member_profiles() {
        let app = Router::new()
            .route(
                "/v2/bot/profile/{user}",
                get(|Path(user): Path<String>, headers: HeaderMap| async move {
                    assert_eq!(headers["authorization"], "Bearer tok");
                    Json(json!({ "displayName": format!("user {user}"), "pictureUrl": "https://p/1" }))
                }),
            )
            .route(
                "/v2/bot/group/{group}/member/{user}",
                get(|Path((group, user)): Path<(String, String)>| async move {
                    Json(json!({ "displayName": format!("{user} in {group}") }))
                }),
            );
        let base = serve(app).await;
        let api = api(&base);

        let direct = api.fetch_profile("tok", &PeerRef::direct("U1")).await.unwrap();
        assert_eq!(direct.display_name, "user U1");
        assert_eq!(direct.picture_url.as_deref(), Some("https://p/1"));

        let member = api
            .fetch_profile(
                "tok",
                &PeerRef {
                    context: PeerContext::Group,
                    peer_id: "G1".into(),
                    user_id: Some("U2".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(member.display_name, "U2 in G1");
        assert!(member.picture_url.is_none());
    }

    #[tokio::test]
    async fn push_sends_text_message() {
        let app = Router::new().route(
            "/v2/bot/message/push",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["to"], "U1");
                assert_eq!(body["messages"][0]["text"], "hello");
                Json(json!({}))
            }),
        );
        let base = serve(app).await;
        api(&base).push_text("tok", "U1", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn errors_are_classified() {
        let app = Router::new()
            .route(
                "/v2/bot/profile/{user}",
                get(|| async { (StatusCode::UNAUTHORIZED, "bad token") }),
            )
            .route(
                "/v2/bot/message/push",
                post(|| async {
                    let mut headers = HeaderMap::new();
                    headers.insert(header::RETRY_AFTER, "7".parse().unwrap());
                    (StatusCode::TOO_MANY_REQUESTS, headers, "slow down")
                }),
            );
        let base = serve(app).await;
        let api = api(&base);

        let err = api
            .fetch_profile("tok", &PeerRef::direct("U1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Unauthorized { .. }));

        match api.push_text("tok", "U1", "hi").await.unwrap_err() {
            PlatformError::RateLimited { retry_after, body } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn member_lookup_needs_user_id() {
        let api = api("http://127.0.0.1:1");
        let err = api
            .fetch_profile(
                "tok",
                &PeerRef {
                    context: PeerContext::Room,
                    peer_id: "R1".into(),
                    user_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Decode(_)));
    }
}
