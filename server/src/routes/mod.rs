//! HTTP route definitions.

mod datasets;
mod health;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(datasets::routes())
}

#[cfg(test)]
mod tests {
    use crate::app;
    use crate::test_support::lazy_state;
    use axum::body::Body;
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app(lazy_state(None)).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn root_is_ok() {
        let response = app(lazy_state(None)).oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app(lazy_state(None)).oneshot(get("/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_token_is_rejected_when_secret_set() {
        let response = app(lazy_state(Some("s3cret")))
            .oneshot(get("/identities/user-1/datasets"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let request = Request::builder()
            .uri("/identities/user-1/datasets/scores/records?since=0")
            .header(AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let response = app(lazy_state(Some("s3cret")))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_dataset_name_is_bad_request() {
        let response = app(lazy_state(None))
            .oneshot(get("/identities/user-1/datasets/bad%20name!/records"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_push_body_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/identities/user-1/datasets/scores/records")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"records": "nope"}"#))
            .unwrap();
        let response = app(lazy_state(None)).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
