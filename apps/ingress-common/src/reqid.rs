use axum::{
    body::Body,
    http::{HeaderValue, Request, header::HeaderName},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id carried in request extensions for handlers and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Reuses a caller-supplied `x-request-id` when it is sane, otherwise issues a fresh one, and
/// echoes it on the response.
pub async fn with_request_id(mut req: Request<Body>, next: Next) -> Response {
    let rid = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(rid.clone()));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&rid) {
        res.headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, middleware, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(rid): Extension<RequestId>| async move { rid.0 }),
            )
            .layer(middleware::from_fn(with_request_id))
    }

    #[tokio::test]
    async fn issues_fresh_id() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let res = app().oneshot(req).await.unwrap();
        let rid = res.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(rid).is_ok());
    }

    #[tokio::test]
    async fn keeps_caller_id() {
        let req = Request::builder()
            .uri("/")
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(Body::empty())
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.headers()[REQUEST_ID_HEADER], "abc-123");
    }
}
