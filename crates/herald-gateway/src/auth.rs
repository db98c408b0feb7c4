//! Request authentication and per-principal rate limiting.

use axum::http::{header::AUTHORIZATION, header::COOKIE, HeaderMap};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

use herald_core::current_unix_timestamp_ms;

use crate::error::EngineApiError;
use crate::server::GatewayState;

const SESSION_COOKIE_NAME: &str = "herald_session";

/// The authenticated caller: its session id and, when known, the operator
/// email the session belongs to.
#[derive(Debug, Clone)]
pub struct Identity {
    pub session_id: String,
    pub operator_email: Option<String>,
}

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?;
    let raw = header.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn session_cookie_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Best-effort extraction of the operator email from a bearer token: either
/// a JWT-style payload segment or a plain base64 JSON document. The token is
/// not verified here; the login subsystem issued it out-of-band.
pub fn decode_token_email(token: &str) -> Option<String> {
    let payload = match token.split('.').collect::<Vec<_>>().as_slice() {
        [_, payload, _] => URL_SAFE_NO_PAD.decode(payload).ok()?,
        _ => STANDARD
            .decode(token)
            .or_else(|_| URL_SAFE_NO_PAD.decode(token))
            .ok()?,
    };
    let parsed = serde_json::from_slice::<Value>(&payload).ok()?;
    parsed
        .get("email")
        .or_else(|| parsed.get("sub"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Resolves the caller's identity. A session cookie must reference a live
/// session; a bearer token with no session yet opportunistically seeds one,
/// decoding the operator email from the token payload when possible. Every
/// authorized request refreshes the session's activity stamp.
pub fn authenticate(state: &GatewayState, headers: &HeaderMap) -> Result<Identity, EngineApiError> {
    let now_unix_ms = current_unix_timestamp_ms();

    if let Some(session_id) = session_cookie_from_headers(headers) {
        if let Some(record) = state.store.session(&session_id) {
            state.store.touch_session(&session_id, now_unix_ms);
            return Ok(Identity {
                session_id,
                operator_email: record.operator_email,
            });
        }
        return Err(EngineApiError::unauthorized());
    }

    if let Some(token) = bearer_token_from_headers(headers) {
        if let Some(record) = state.store.session(&token) {
            state.store.touch_session(&token, now_unix_ms);
            return Ok(Identity {
                session_id: token,
                operator_email: record.operator_email,
            });
        }
        let operator_email = decode_token_email(&token);
        state
            .store
            .set_session(&token, operator_email.as_deref(), now_unix_ms);
        return Ok(Identity {
            session_id: token,
            operator_email,
        });
    }

    Err(EngineApiError::unauthorized())
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RateLimitBucket {
    window_started_unix_ms: u64,
    accepted_requests: usize,
}

/// Windowed per-principal request limiting for the control plane.
pub fn enforce_rate_limit(state: &GatewayState, principal: &str) -> Result<(), EngineApiError> {
    let window_ms = state
        .config
        .rate_limit_window_seconds
        .saturating_mul(1_000)
        .max(1);
    let max_requests = state.config.rate_limit_max_requests.max(1);
    let now_unix_ms = current_unix_timestamp_ms();

    let mut buckets = state.rate_limit_buckets();
    let bucket = buckets.entry(principal.to_string()).or_default();
    if bucket.window_started_unix_ms == 0
        || now_unix_ms.saturating_sub(bucket.window_started_unix_ms) >= window_ms
    {
        bucket.window_started_unix_ms = now_unix_ms;
        bucket.accepted_requests = 0;
    }
    if bucket.accepted_requests >= max_requests {
        return Err(EngineApiError::too_many_requests(format!(
            "rate limit exceeded: max {} requests per {} seconds",
            max_requests, state.config.rate_limit_window_seconds
        )));
    }
    bucket.accepted_requests += 1;
    Ok(())
}
