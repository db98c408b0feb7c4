//! Gateway state, router, and control-plane handlers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use herald_core::MessageKind;
use herald_engine::{StartOutcome, WorkerSpec, WorkerSupervisor, STATUS_PROCESSING};
use herald_platform::{CallOutcome, MediaRecord, PlatformClient};
use herald_state::SessionStateStore;

use crate::auth::{authenticate, enforce_rate_limit, Identity, RateLimitBucket};
use crate::error::EngineApiError;
use crate::stream::handle_stream;

const ENGINE_START_ENDPOINT: &str = "/engine/start";
const ENGINE_STOP_ENDPOINT: &str = "/engine/stop";
const ENGINE_STOP_ALL_ENDPOINT: &str = "/engine/stop-all";
const ENGINE_STATUS_ENDPOINT: &str = "/engine/status";
const ENGINE_CLEAR_BLOCKS_ENDPOINT: &str = "/engine/clear-blocks";
const ENGINE_STATES_ENDPOINT: &str = "/engine/states";
const ENGINE_SESSIONS_ENDPOINT: &str = "/engine/sessions";
const ENGINE_STREAM_ENDPOINT: &str = "/engine/stream";
const ENGINE_HEALTH_ENDPOINT: &str = "/engine/health";
const AUTH_LOGOUT_ENDPOINT: &str = "/auth/logout";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            rate_limit_window_seconds: 60,
            rate_limit_max_requests: 240,
        }
    }
}

pub struct GatewayState {
    pub config: GatewayConfig,
    pub supervisor: Arc<WorkerSupervisor>,
    pub store: Arc<SessionStateStore>,
    pub client: Arc<PlatformClient>,
    rate_limits: Mutex<BTreeMap<String, RateLimitBucket>>,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        supervisor: Arc<WorkerSupervisor>,
        store: Arc<SessionStateStore>,
        client: Arc<PlatformClient>,
    ) -> Self {
        Self {
            config,
            supervisor,
            store,
            client,
            rate_limits: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn rate_limit_buckets(&self) -> MutexGuard<'_, BTreeMap<String, RateLimitBucket>> {
        self.rate_limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(ENGINE_START_ENDPOINT, post(handle_start))
        .route(ENGINE_STOP_ENDPOINT, post(handle_stop))
        .route(ENGINE_STOP_ALL_ENDPOINT, post(handle_stop_all))
        .route(ENGINE_STATUS_ENDPOINT, get(handle_status))
        .route(ENGINE_CLEAR_BLOCKS_ENDPOINT, post(handle_clear_blocks))
        .route(ENGINE_STATES_ENDPOINT, get(handle_states))
        .route(ENGINE_SESSIONS_ENDPOINT, get(handle_sessions))
        .route(ENGINE_STREAM_ENDPOINT, get(handle_stream))
        .route(ENGINE_HEALTH_ENDPOINT, get(handle_health))
        .route(AUTH_LOGOUT_ENDPOINT, post(handle_logout))
        .with_state(state)
}

/// Binds and serves until ctrl-c, then stops every worker before returning.
pub async fn run_gateway_server(state: Arc<GatewayState>) -> Result<()> {
    let listener = TcpListener::bind(&state.config.bind)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", state.config.bind))?;
    let addr = listener
        .local_addr()
        .context("failed to read gateway listener address")?;
    info!(%addr, "herald gateway listening");

    let supervisor = Arc::clone(&state.supervisor);
    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")?;

    supervisor.shutdown().await;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    profile_id: String,
    kind: String,
    message: String,
    #[serde(default)]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkerKeyRequest {
    profile_id: String,
    kind: String,
}

#[derive(Debug, Deserialize)]
struct WorkerKeyQuery {
    profile_id: String,
    kind: String,
}

fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, EngineApiError> {
    serde_json::from_slice(body).map_err(|error| {
        EngineApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}

fn parse_kind(raw: &str) -> Result<MessageKind, EngineApiError> {
    MessageKind::parse(raw).ok_or_else(|| {
        EngineApiError::bad_request("unknown_kind", format!("unknown message kind: {raw}"))
    })
}

fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<Identity, EngineApiError> {
    let identity = authenticate(state, headers)?;
    enforce_rate_limit(state, &identity.session_id)?;
    Ok(identity)
}

async fn handle_start(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let identity = match authorize(&state, &headers) {
        Ok(identity) => identity,
        Err(error) => return error.into_response(),
    };
    let request = match parse_json_body::<StartRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let kind = match parse_kind(&request.kind) {
        Ok(kind) => kind,
        Err(error) => return error.into_response(),
    };
    let Some(operator_email) = identity.operator_email.clone() else {
        return EngineApiError::bad_request(
            "operator_unknown",
            "session has no operator identity; worker start requires one",
        )
        .into_response();
    };

    if let Some(attachment_id) = request.attachment_id.as_deref() {
        match attachment_exists(&state.client, &request.profile_id, attachment_id).await {
            Some(false) => {
                return EngineApiError::bad_request(
                    "unknown_attachment",
                    format!("profile {} has no media {attachment_id}", request.profile_id),
                )
                .into_response();
            }
            Some(true) => {}
            None => {
                warn!(
                    profile_id = request.profile_id.as_str(),
                    attachment_id, "media listing unavailable, starting without validation",
                );
            }
        }
    }

    let spec = WorkerSpec {
        profile_id: request.profile_id.clone(),
        kind,
        operator_email,
        session_id: identity.session_id,
        message: request.message,
        attachment_id: request.attachment_id,
    };
    match state.supervisor.start(spec) {
        StartOutcome::Started => (
            StatusCode::OK,
            Json(json!({"started": true, "status": STATUS_PROCESSING})),
        )
            .into_response(),
        StartOutcome::AlreadyRunning => (
            StatusCode::OK,
            Json(json!({
                "started": false,
                "status": state.supervisor.status(&request.profile_id, kind),
            })),
        )
            .into_response(),
        StartOutcome::Rejected(reason) => {
            EngineApiError::bad_request("start_rejected", reason).into_response()
        }
    }
}

async fn handle_stop(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = authorize(&state, &headers) {
        return error.into_response();
    }
    let request = match parse_json_body::<WorkerKeyRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let kind = match parse_kind(&request.kind) {
        Ok(kind) => kind,
        Err(error) => return error.into_response(),
    };
    let stopped = state.supervisor.stop(&request.profile_id, kind);
    (StatusCode::OK, Json(json!({"stopped": stopped}))).into_response()
}

async fn handle_stop_all(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(error) = authorize(&state, &headers) {
        return error.into_response();
    }
    let signalled = state.supervisor.stop_all();
    (StatusCode::OK, Json(json!({"signalled": signalled}))).into_response()
}

async fn handle_status(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<WorkerKeyQuery>,
) -> Response {
    if let Err(error) = authorize(&state, &headers) {
        return error.into_response();
    }
    let kind = match parse_kind(&query.kind) {
        Ok(kind) => kind,
        Err(error) => return error.into_response(),
    };
    (
        StatusCode::OK,
        Json(json!({
            "profile_id": query.profile_id,
            "kind": kind,
            "status": state.supervisor.status(&query.profile_id, kind),
            "blocked_counterparts": state
                .supervisor
                .blocked_counterparts(&query.profile_id, kind),
        })),
    )
        .into_response()
}

async fn handle_clear_blocks(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = authorize(&state, &headers) {
        return error.into_response();
    }
    let request = match parse_json_body::<WorkerKeyRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let kind = match parse_kind(&request.kind) {
        Ok(kind) => kind,
        Err(error) => return error.into_response(),
    };
    let cleared = state.supervisor.clear_blocks(&request.profile_id, kind);
    (StatusCode::OK, Json(json!({"cleared": cleared}))).into_response()
}

async fn handle_states(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let identity = match authorize(&state, &headers) {
        Ok(identity) => identity,
        Err(error) => return error.into_response(),
    };
    let states = match identity.operator_email.as_deref() {
        Some(email) => state.store.states_for_email(email),
        None => state.store.states_for_session(&identity.session_id),
    };
    (StatusCode::OK, Json(json!({"states": states}))).into_response()
}

async fn handle_sessions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let identity = match authorize(&state, &headers) {
        Ok(identity) => identity,
        Err(error) => return error.into_response(),
    };
    let Some(email) = identity.operator_email.as_deref() else {
        return EngineApiError::bad_request(
            "operator_unknown",
            "session has no operator identity",
        )
        .into_response();
    };
    (
        StatusCode::OK,
        Json(json!({"sessions": state.store.sessions_for_email(email)})),
    )
        .into_response()
}

async fn handle_logout(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let identity = match authorize(&state, &headers) {
        Ok(identity) => identity,
        Err(error) => return error.into_response(),
    };
    let removed = state.store.remove_session(&identity.session_id);
    (StatusCode::OK, Json(json!({"removed": removed}))).into_response()
}

async fn handle_health(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(error) = authorize(&state, &headers) {
        return error.into_response();
    }
    (
        StatusCode::OK,
        Json(json!({
            "engine": {
                "active_workers": state.supervisor.active_count(),
            },
            "sessions": {
                "count": state.store.session_count(),
                "subscribers": state.store.subscriber_count(),
            },
            "endpoints": {
                "start": ENGINE_START_ENDPOINT,
                "stop": ENGINE_STOP_ENDPOINT,
                "stop_all": ENGINE_STOP_ALL_ENDPOINT,
                "status": ENGINE_STATUS_ENDPOINT,
                "clear_blocks": ENGINE_CLEAR_BLOCKS_ENDPOINT,
                "states": ENGINE_STATES_ENDPOINT,
                "sessions": ENGINE_SESSIONS_ENDPOINT,
                "stream": ENGINE_STREAM_ENDPOINT,
                "logout": AUTH_LOGOUT_ENDPOINT,
            },
        })),
    )
        .into_response()
}

/// Confirms a media id against the profile's listing when the platform lets
/// us; `None` means the listing was unavailable and the start proceeds
/// unvalidated.
async fn attachment_exists(
    client: &PlatformClient,
    profile_id: &str,
    attachment_id: &str,
) -> Option<bool> {
    match client.list_media(profile_id).await {
        CallOutcome::Success(data) => {
            let records = data
                .get("media")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            serde_json::from_value::<MediaRecord>(item.clone()).ok()
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Some(records.iter().any(|record| record.id == attachment_id))
        }
        _ => None,
    }
}
