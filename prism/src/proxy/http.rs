//! The proxy's HTTP edge
//!
//! The in-scope boundary of the data plane: liveness, a view of connected
//! instances, and namespace health checks dispatched through the registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, PrismError};
use crate::protocol::frame::{HealthReport, LifecycleState, ProxyCommand, ResponseBody};

use super::dispatch::Dispatcher;
use super::registry::InstanceRegistry;

/// Shared state for the proxy's HTTP surface
#[derive(Clone)]
pub struct ProxyHttpState {
    pub proxy_id: String,
    pub registry: Arc<InstanceRegistry>,
    pub dispatcher: Dispatcher,
}

/// Build the proxy router
pub fn router(state: ProxyHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instances", get(instances))
        .route("/namespaces/{namespace}/health", get(namespace_health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Proxy liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct ProxyHealth {
    pub status: String,
    pub proxy_id: String,
    pub connected_instances: usize,
}

async fn health(State(state): State<ProxyHttpState>) -> impl IntoResponse {
    let response = ProxyHealth {
        status: "healthy".to_string(),
        proxy_id: state.proxy_id.clone(),
        connected_instances: state.registry.len(),
    };
    (StatusCode::OK, Json(response))
}

/// One connected instance, as reported by `/instances`
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub pattern_name: String,
    pub namespace: String,
    pub state: LifecycleState,
    pub interfaces: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

async fn instances(State(state): State<ProxyHttpState>) -> impl IntoResponse {
    let mut summaries: Vec<InstanceSummary> = state
        .registry
        .list()
        .into_iter()
        .map(|handle| InstanceSummary {
            instance_id: handle.instance_id.clone(),
            pattern_name: handle.pattern_name.clone(),
            namespace: handle.namespace.clone(),
            state: handle.last_state(),
            interfaces: handle.metadata.interfaces.clone(),
            connected_at: handle.connected_at,
            last_seen: handle.last_seen(),
        })
        .collect();
    summaries.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    (StatusCode::OK, Json(summaries))
}

async fn namespace_health(
    State(state): State<ProxyHttpState>,
    Path(namespace): Path<String>,
) -> Result<Json<HealthReport>, Error> {
    let body = state
        .dispatcher
        .send_to_namespace(&namespace, None, ProxyCommand::HealthCheck)
        .await?;
    match body {
        ResponseBody::HealthCheck { report } => Ok(Json(report)),
        other => Err(PrismError::internal(format!(
            "unexpected response kind to HealthCheck: {:?}",
            other
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> ProxyHttpState {
        let registry = Arc::new(InstanceRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone(), Duration::from_millis(200));
        ProxyHttpState {
            proxy_id: "proxy-test".to_string(),
            registry,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: ProxyHealth = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health.proxy_id, "proxy-test");
        assert_eq!(health.connected_instances, 0);
    }

    #[tokio::test]
    async fn test_instances_endpoint_empty() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/instances")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let list: Vec<InstanceSummary> = serde_json::from_slice(&bytes).unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_health_without_instance_is_unavailable() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/namespaces/ghost/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: crate::error::ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code.as_deref(), Some("PATTERN_NOT_CONNECTED"));
    }
}
