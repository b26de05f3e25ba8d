//! Admin RPC surface
//!
//! JSON-over-HTTP endpoints consumed by operator tooling. The bearer
//! principal arrives already authenticated; handlers thread it into the
//! service, which audits every call.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::Error;

use super::audit::AuditFilter;
use super::service::{AdminService, CallContext, CreateNamespaceRequest};

/// Shared state for the admin RPC surface
#[derive(Clone)]
pub struct AdminHttpState {
    pub service: Arc<AdminService>,
}

/// Build the admin router
pub fn router(state: AdminHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/namespaces", post(create_namespace).get(list_namespaces))
        .route(
            "/v1/namespaces/{name}",
            get(get_namespace).delete(delete_namespace),
        )
        .route("/v1/proxies", get(list_proxies))
        .route("/v1/launchers", get(list_launchers))
        .route("/v1/audit", get(query_audit_logs))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn context_from(headers: &HeaderMap) -> CallContext {
    CallContext {
        client_ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}

fn principal_from(headers: &HeaderMap) -> String {
    headers
        .get("x-prism-principal")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "healthy"})))
}

async fn create_namespace(
    State(state): State<AdminHttpState>,
    headers: HeaderMap,
    Json(request): Json<CreateNamespaceRequest>,
) -> Result<impl IntoResponse, Error> {
    let context = context_from(&headers);
    let response = state.service.create_namespace(request, context).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_namespaces(
    State(state): State<AdminHttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Error> {
    let namespaces = state
        .service
        .list_namespaces(&principal_from(&headers))
        .await?;
    Ok(Json(namespaces))
}

async fn get_namespace(
    State(state): State<AdminHttpState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let namespace = state
        .service
        .get_namespace(&name, &principal_from(&headers))
        .await?;
    Ok(Json(namespace))
}

async fn delete_namespace(
    State(state): State<AdminHttpState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, Error> {
    state
        .service
        .delete_namespace(&name, &principal_from(&headers), context_from(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_proxies(
    State(state): State<AdminHttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Error> {
    let proxies = state.service.list_proxies(&principal_from(&headers)).await?;
    Ok(Json(proxies))
}

async fn list_launchers(
    State(state): State<AdminHttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Error> {
    let launchers = state
        .service
        .list_launchers(&principal_from(&headers))
        .await?;
    Ok(Json(launchers))
}

/// Query-string form of [`AuditFilter`]
#[derive(Debug, Deserialize)]
struct AuditQuery {
    namespace: Option<String>,
    #[serde(alias = "user")]
    principal: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<u32>,
}

async fn query_audit_logs(
    State(state): State<AdminHttpState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, Error> {
    let filter = AuditFilter {
        namespace: query.namespace,
        principal: query.principal,
        start: query.start,
        end: query.end,
        limit: query.limit,
    };
    let records = state
        .service
        .query_audit_logs(filter, &principal_from(&headers))
        .await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::gateway::AdminGateway;
    use crate::admin::partitions::PartitionMap;
    use crate::admin::storage::AdminStore;
    use crate::config::AdminConfig;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let store = Arc::new(AdminStore::in_memory().await.unwrap());
        let partitions = Arc::new(Mutex::new(PartitionMap::new(16)));
        let config = AdminConfig::default();
        let gateway = AdminGateway::new(store.clone(), partitions.clone(), config.clone());
        let service = Arc::new(AdminService::new(store, gateway, partitions, config));
        router(AdminHttpState { service })
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_namespaces_empty() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/namespaces")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let list: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_namespace_is_404() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/namespaces/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: crate::error::ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code.as_deref(), Some("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_create_namespace_without_proxy_is_503() {
        let app = test_app().await;
        let body = serde_json::json!({
            "namespace": "orphan",
            "principal": "alice",
            "config": {
                "pattern": "mailbox",
                "slots": {"table_writer": {"backend": "sqlite"}}
            }
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/namespaces")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: crate::error::ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(error.code.as_deref(), Some("NO_PROXY_AVAILABLE"));
        // remediation guidance is part of the structured detail
        let detail = error.detail.expect("structured detail");
        assert!(detail.metadata.contains_key("remediation"));
    }

    #[tokio::test]
    async fn test_audit_query_params() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/audit?namespace=mailbox-x&user=alice&limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
