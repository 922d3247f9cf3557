use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use ::security::{LINE_SIGNATURE_HEADER, verify_signature};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::respond::json_error;

#[derive(Clone, Default)]
pub struct IngressSecurityConfig {
    /// Token expected on `Authorization: Bearer <TOKEN>`; `None` leaves routes open.
    pub bearer: Option<String>,
}

/// Bearer token check for operator routes.
pub async fn verify_bearer(req: Request<Body>, next: Next) -> Response {
    let cfg = req
        .extensions()
        .get::<IngressSecurityConfig>()
        .cloned()
        .unwrap_or_default();
    if let Some(token) = cfg.bearer {
        let ok = req
            .headers()
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|provided| bool::from(provided.as_bytes().ct_eq(token.as_bytes())))
            .unwrap_or(false);
        if !ok {
            return json_error(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    }
    next.run(req).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    /// No secret to check against; the batch is accepted unverified.
    Skipped,
    Missing,
    Invalid,
}

impl SignatureCheck {
    pub fn accepted(&self) -> bool {
        matches!(self, SignatureCheck::Valid | SignatureCheck::Skipped)
    }
}

/// Checks the platform signature header against the raw body.
pub fn check_webhook_signature(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> SignatureCheck {
    let Some(secret) = secret else {
        warn!("signing secret unavailable; signature not verified");
        return SignatureCheck::Skipped;
    };
    let Some(provided) = headers
        .get(LINE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return SignatureCheck::Missing;
    };
    if verify_signature(secret, body, provided) {
        SignatureCheck::Valid
    } else {
        SignatureCheck::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::security::sign_body;
    use axum::{Extension, Router, middleware, routing::get};
    use tower::ServiceExt;

    #[test]
    fn signature_states() {
        let body = br#"{"events":[]}"#;
        let mut headers = HeaderMap::new();
        assert_eq!(
            check_webhook_signature(Some("s3cret"), &headers, body),
            SignatureCheck::Missing
        );
        headers.insert(LINE_SIGNATURE_HEADER, "bm9wZQ==".parse().unwrap());
        assert_eq!(
            check_webhook_signature(Some("s3cret"), &headers, body),
            SignatureCheck::Invalid
        );
        headers.insert(
            LINE_SIGNATURE_HEADER,
            sign_body("s3cret", body).parse().unwrap(),
        );
        assert_eq!(
            check_webhook_signature(Some("s3cret"), &headers, body),
            SignatureCheck::Valid
        );
        assert!(check_webhook_signature(None, &HeaderMap::new(), body).accepted());
    }

    #[tokio::test]
    async fn verify_bearer_blocks_invalid_token() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .layer(middleware::from_fn(verify_bearer))
            .layer(Extension(IngressSecurityConfig {
                bearer: Some("expected".into()),
            }));

        let req = Request::builder()
            .uri("/")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let ok_req = Request::builder()
            .uri("/")
            .header("authorization", "Bearer expected")
            .body(Body::empty())
            .unwrap();
        let ok_resp = app.oneshot(ok_req).await.unwrap();
        assert_eq!(ok_resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn verify_bearer_allows_missing_config() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .layer(middleware::from_fn(verify_bearer));

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
