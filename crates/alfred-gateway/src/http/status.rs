//! REST status surface: health, status snapshot, Prometheus metrics.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::auth;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// GET /api/v1/health — liveness only, no auth.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn authorize(state: &AppState, headers: &HeaderMap, query: &TokenQuery) -> Result<(), StatusCode> {
    let token = auth::extract_token(headers, query.token.as_deref())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    auth::authenticate(&state.config.gateway, token, None)
        .map(|_| ())
        .ok_or(StatusCode::UNAUTHORIZED)
}

/// GET /api/v1/status — runtime snapshot for dashboards.
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, &query)?;

    let (active, total) = state.sessions.counts();
    let stats = &state.metrics.stats;
    let channels: Vec<serde_json::Value> = state
        .channels
        .statuses()
        .into_iter()
        .map(|(name, status)| json!({ "name": name, "status": status }))
        .collect();

    Ok(Json(json!({
        "agent": {
            "name": state.config.agent.name,
            "version": state.config.agent.version,
            "uptime_seconds": state.uptime_seconds(),
        },
        "sessions": { "active": active, "total": total },
        "tools": {
            "registered": state.tools.list().len(),
            "calls_total": stats.tool_calls.load(std::sync::atomic::Ordering::Relaxed),
            "errors_total": stats.tool_errors.load(std::sync::atomic::Ordering::Relaxed),
        },
        "memory": {
            "provider": state.memory.name(),
            "available": state.memory.available(),
        },
        "channels": channels,
    })))
}

/// GET /metrics — Prometheus exposition text.
pub async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers, &query)?;

    let (active, total) = state.sessions.counts();
    state.metrics.update_gauges(
        active,
        total,
        state.tools.list().len(),
        state.memory.available(),
        state.uptime_seconds(),
    );

    Ok((
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;
    use alfred_core::config::TokenEntry;
    use axum::body::Body;
    use tower::util::ServiceExt;

    fn state_with_token() -> (Arc<AppState>, tempfile::TempDir) {
        let (state, dir) = test_state();
        // Arc has a single owner here, so the config tweak is safe.
        let state = Arc::try_unwrap(state).ok().map(|mut inner| {
            inner.config.gateway.tokens.push(TokenEntry {
                token: "t0ken".into(),
                name: "ops".into(),
                roles: vec![],
            });
            Arc::new(inner)
        });
        (state.expect("state had extra owners"), dir)
    }

    #[tokio::test]
    async fn health_requires_no_token() {
        let (state, _dir) = test_state();
        let app = crate::app::build_router(state);
        let response = app
            .oneshot(
                axum::http::Request::get("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_rejects_missing_and_bad_tokens() {
        let (state, _dir) = state_with_token();
        let app = crate::app::build_router(Arc::clone(&state));
        let missing = app
            .oneshot(
                axum::http::Request::get("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let app = crate::app::build_router(state);
        let bad = app
            .oneshot(
                axum::http::Request::get("/api/v1/status?token=wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_snapshot_shape() {
        let (state, _dir) = state_with_token();
        let app = crate::app::build_router(state);
        let response = app
            .oneshot(
                axum::http::Request::get("/api/v1/status?token=t0ken")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["agent"]["name"], "alfred");
        assert!(json["sessions"]["active"].is_number());
        assert_eq!(json["memory"]["provider"], "none");
        assert_eq!(json["memory"]["available"], false);
        assert!(json["channels"].is_array());
    }

    #[tokio::test]
    async fn metrics_accepts_bearer_auth() {
        let (state, _dir) = state_with_token();
        let app = crate::app::build_router(state);
        let response = app
            .oneshot(
                axum::http::Request::get("/metrics")
                    .header("authorization", "Bearer t0ken")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
