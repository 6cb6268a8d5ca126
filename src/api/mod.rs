pub mod error;
mod handlers;
pub mod ws;

use axum::{
    http::{HeaderName, HeaderValue},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::hooks::SessionHooks;
use crate::shutdown::ShutdownCoordinator;

use handlers::*;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub hooks: SessionHooks,
    pub shutdown: ShutdownCoordinator,
    pub broker: Broker,
    /// Instance name reported by `/status`.
    pub instance: Arc<str>,
}

impl AppState {
    /// Build state whose hooks and coordinator share the coordinator's
    /// registry.
    pub fn new(shutdown: ShutdownCoordinator, broker: Broker, instance: impl Into<Arc<str>>) -> Self {
        Self {
            hooks: SessionHooks::new(shutdown.registry().clone()),
            shutdown,
            broker,
            instance: instance.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/ws", get(ws::ws))
        .fallback(|| async { error::ApiError::NotFound })
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use crate::shutdown::DrainConfig;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt; // for oneshot()

    fn create_test_state() -> AppState {
        let registry = SessionRegistry::new();
        let shutdown = ShutdownCoordinator::new(registry, DrainConfig::default());
        AppState::new(shutdown, Broker::new(), "test-instance")
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (status, json) = get_json(router(create_test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn status_reports_running_state() {
        let (status, json) = get_json(router(create_test_state()), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["phase"], "running");
        assert_eq!(json["accepting"], true);
        assert_eq!(json["active_sessions"], 0);
        assert_eq!(json["broadcast_subscribers"], 0);
        assert_eq!(json["instance"], "test-instance");
        assert_eq!(json["drain_timeout_secs"], 1800);
        assert!(json.get("deadline_secs").is_none());
    }

    #[tokio::test]
    async fn status_reports_draining_with_deadline() {
        let state = create_test_state();
        state
            .hooks
            .registry()
            .register("a".into(), Arc::new(ws::WsCloseHandle::new()));
        state.shutdown.trigger();

        let (_, json) = get_json(router(state), "/status").await;
        assert_eq!(json["phase"], "draining");
        assert_eq!(json["accepting"], false);
        assert_eq!(json["active_sessions"], 1);
        assert!(json["deadline_secs"].as_u64().unwrap() <= 1800);
    }

    #[tokio::test]
    async fn ws_upgrade_refused_while_draining() {
        let state = create_test_state();
        state.shutdown.trigger();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let (status, json) = get_json(router(create_test_state()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }
}
