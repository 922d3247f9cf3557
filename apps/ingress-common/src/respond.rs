use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// The acknowledgement webhook callers always get: `200 {}`.
pub fn ack200() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({})))
}

/// JSON error body used by the operator routes.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use http_body_util::BodyExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect")
            .to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ack200_is_empty_object() {
        let response = ack200().into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({}));
    }

    #[tokio::test]
    async fn json_error_carries_message() {
        let response = json_error(StatusCode::NOT_FOUND, "bot not found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "bot not found" }));
    }
}
