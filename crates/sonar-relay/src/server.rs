//! Axum HTTP server: router, usage API, listener, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use sonar_telemetry::{query, SnapshotFile, UsageEvent, UsageSnapshot, UsageStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::dashboard;
use crate::mcp::{self, JsonRpcRequest, JsonRpcResponse};
use crate::upstream::UpstreamClient;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub upstream: UpstreamClient,
    pub usage: UsageStore,
    pub snapshot: SnapshotFile,
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let shared = Arc::new(state);

    let app = Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(handle_health))
        .route("/dashboard", get(dashboard::handle_dashboard))
        .route("/api/usage", get(handle_usage_summary))
        .route("/api/usage/tools", get(handle_usage_tools))
        .route("/api/usage/recent", get(handle_usage_recent))
        .route("/api/usage/hourly", get(handle_usage_hourly))
        .route("/api/usage/clients", get(handle_usage_clients))
        .route("/api/usage/import", post(handle_import))
        .layer(middleware::from_fn_with_state(
            shared.clone(),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "sonar-relay listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("sonar-relay shut down gracefully");
    Ok(())
}

/// Record one `Request` telemetry event for every inbound request before the
/// handler runs. Never blocks the request on telemetry.
async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    state.usage.record(UsageEvent::Request {
        method: request.method().to_string(),
        endpoint: request.uri().path().to_string(),
        client_ip: client_ip(request.headers(), peer_addr(&request)),
        user_agent: user_agent(request.headers()),
        at: Utc::now(),
    });
    next.run(request).await
}

/// Main handler for POST /mcp: decode the JSON-RPC envelope and dispatch.
async fn handle_mcp(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let ip = client_ip(request.headers(), peer_addr(&request));
    let agent = user_agent(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let rpc: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return Json(JsonRpcResponse::error(
                serde_json::Value::Null,
                mcp::PARSE_ERROR,
                format!("invalid JSON-RPC payload: {e}"),
            ))
            .into_response();
        }
    };

    match mcp::dispatch(&state, rpc, &ip, &agent).await {
        Some(response) => Json(response).into_response(),
        // Notification: acknowledged, no body.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// GET /api/usage — headline totals, unique clients, uptime.
async fn handle_usage_summary(State(state): State<Arc<AppState>>) -> Response {
    let snap = state.usage.snapshot();
    Json(query::summary(&snap, Utc::now())).into_response()
}

/// GET /api/usage/tools — per-tool counts and percentages, busiest first.
async fn handle_usage_tools(State(state): State<Arc<AppState>>) -> Response {
    let snap = state.usage.snapshot();
    Json(query::tool_breakdown(&snap)).into_response()
}

/// GET /api/usage/recent — the bounded recent-calls list, newest first.
async fn handle_usage_recent(State(state): State<Arc<AppState>>) -> Response {
    Json(state.usage.snapshot().recent_tool_calls).into_response()
}

/// GET /api/usage/hourly — last-24-hour request series, oldest first.
async fn handle_usage_hourly(State(state): State<Arc<AppState>>) -> Response {
    let snap = state.usage.snapshot();
    Json(query::hourly_series(&snap, query::SERIES_HOURS)).into_response()
}

/// GET /api/usage/clients — top 20 client IPs by request count.
async fn handle_usage_clients(State(state): State<Arc<AppState>>) -> Response {
    let snap = state.usage.snapshot();
    Json(query::top_clients(&snap, query::TOP_CLIENTS)).into_response()
}

/// POST /api/usage/import — additively merge a foreign snapshot.
///
/// Order matters: credential check, then payload validation, then the merge —
/// a rejected request never touches state. A successful merge is saved
/// synchronously so it survives a crash.
async fn handle_import(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(expected) = state.config.telemetry.import_token.as_deref() {
        let presented = headers.get("x-import-token").and_then(|v| v.to_str().ok());
        if presented != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid import token" })),
            )
                .into_response();
        }
    }

    let foreign: UsageSnapshot = match serde_json::from_slice(&body) {
        Ok(snap) => snap,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid snapshot payload: {e}") })),
            )
                .into_response();
        }
    };

    state.usage.merge(&foreign);

    let merged = state.usage.snapshot();
    if let Err(e) = state.snapshot.save(&merged) {
        tracing::warn!(error = %e, "Failed to persist merged snapshot");
    }

    tracing::info!(
        imported_requests = foreign.total_requests,
        imported_tool_calls = foreign.total_tool_calls,
        "Merged foreign usage snapshot"
    );
    Json(json!({
        "status": "merged",
        "totalRequests": merged.total_requests,
        "totalToolCalls": merged.total_tool_calls,
    }))
    .into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
}

/// Client IP: first hop of `x-forwarded-for` when present, else the socket
/// peer, else `unknown`.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Wait for SIGINT or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
pub fn test_state() -> AppState {
    AppState {
        config: RelayConfig::default(),
        upstream: UpstreamClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9".to_string(),
            String::new(),
        ),
        usage: UsageStore::new(),
        snapshot: SnapshotFile::new(std::env::temp_dir().join("sonar-relay-test-usage.json")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_wins_over_peer_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.2".parse().unwrap());
        let peer: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn missing_client_identity_falls_back_to_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None), "unknown");
        assert_eq!(user_agent(&headers), "unknown");

        let peer: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.1");
    }

    #[tokio::test]
    async fn import_with_wrong_token_rejected_before_mutation() {
        let mut state = test_state();
        state.config.telemetry.import_token = Some("secret".to_string());
        let state = Arc::new(state);

        let mut headers = HeaderMap::new();
        headers.insert("x-import-token", "wrong".parse().unwrap());
        let body = Bytes::from(r#"{"totalRequests": 99}"#);

        let response = handle_import(State(state.clone()), headers, body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.usage.snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn import_with_malformed_payload_rejected_before_mutation() {
        let state = Arc::new(test_state());
        let response = handle_import(
            State(state.clone()),
            HeaderMap::new(),
            Bytes::from("not a snapshot"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.usage.snapshot().total_requests, 0);
    }
}
