//! API Server (Cold Path)
//!
//! Read-only REST view of paths and nodes plus a shutdown trigger.
//! Accesses the gateway via shared state.

use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::gateway::{Gateway, NodeInfo};
use crate::hot_path::path::PathInfo;
use crate::infrastructure::config::ApiConfig;
use crate::GatewayError;

/// Gateway summary
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDto {
    pub running: bool,
    pub paths: usize,
    pub started_paths: usize,
    pub nodes: usize,
    pub worker_jobs: usize,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<RwLock<Gateway>>,
    /// Set to `true` to request a shutdown
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(gateway: Arc<RwLock<Gateway>>, shutdown: Arc<watch::Sender<bool>>) -> Self {
        Self { gateway, shutdown }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/paths", get(get_paths))
        .route("/api/v1/paths/:uuid", get(get_path))
        .route("/api/v1/nodes", get(get_nodes))
        .route("/api/v1/shutdown", post(post_shutdown))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until a shutdown is requested
pub async fn start_server(state: AppState, config: &ApiConfig) -> Result<(), GatewayError> {
    let mut shutdown = state.shutdown.subscribe();
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}

async fn get_status(State(state): State<AppState>) -> Json<StatusDto> {
    let gateway = state.gateway.read().await;
    let paths = gateway.paths();

    Json(StatusDto {
        running: gateway.is_running(),
        paths: paths.len(),
        started_paths: paths
            .iter()
            .filter(|p| p.state() == crate::hot_path::path::PathState::Started)
            .count(),
        nodes: gateway.nodes().len(),
        worker_jobs: gateway.worker().job_count(),
    })
}

async fn get_paths(State(state): State<AppState>) -> Json<Vec<PathInfo>> {
    Json(state.gateway.read().await.path_info())
}

async fn get_path(State(state): State<AppState>, UrlPath(uuid): UrlPath<Uuid>) -> Result<Json<PathInfo>, StatusCode> {
    let gateway = state.gateway.read().await;
    gateway
        .paths()
        .iter()
        .find(|p| p.uuid() == uuid)
        .map(|p| Json(p.info()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_nodes(State(state): State<AppState>) -> Json<Vec<NodeInfo>> {
    Json(state.gateway.read().await.node_info())
}

async fn post_shutdown(State(state): State<AppState>) -> StatusCode {
    tracing::info!("shutdown requested via API");
    state.shutdown.send_replace(true);
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        let config: Config = r#"
            [nodes.a]
            type = "loopback"
            values = 3

            [nodes.b]
            type = "loopback"
            values = 3

            [[paths]]
            in = "a"
            out = "b"
            mode = "all"
        "#
        .parse()
        .unwrap();
        let gateway = Gateway::from_config(&config).unwrap();
        let (tx, _rx) = watch::channel(false);
        AppState::new(Arc::new(RwLock::new(gateway)), Arc::new(tx))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_paths_listing() {
        let (status, json) = get_json(router(state()), "/api/v1/paths").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["name"], "[ a ] => [ b ]");
        assert_eq!(json[0]["mode"], "all");
        assert_eq!(json[0]["state"], "checked");
        assert_eq!(json[0]["samplelen"], 3);
    }

    #[tokio::test]
    async fn test_path_by_uuid() {
        let state = state();
        let uuid = state.gateway.read().await.paths()[0].uuid();

        let (status, json) = get_json(router(state.clone()), &format!("/api/v1/paths/{}", uuid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["uuid"], uuid.to_string());

        let (status, _) = get_json(router(state), &format!("/api/v1/paths/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_nodes_and_status() {
        let state = state();
        let (_, nodes) = get_json(router(state.clone()), "/api/v1/nodes").await;
        assert_eq!(nodes[0]["name"], "a");
        assert_eq!(nodes[0]["type"], "loopback");
        assert_eq!(nodes[0]["paths"], 1);

        let (_, status) = get_json(router(state), "/api/v1/status").await;
        assert_eq!(status["running"], false);
        assert_eq!(status["paths"], 1);
        assert_eq!(status["startedPaths"], 0);
    }

    #[tokio::test]
    async fn test_shutdown_signals_watchers() {
        let state = state();
        let rx = state.shutdown.subscribe();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/shutdown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(*rx.borrow());
    }
}
