//! The long-lived push channel: one ND-JSON stream per client connection.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use herald_state::SessionStateStore;

use crate::auth::authenticate;
use crate::server::GatewayState;

/// Unsubscribes when the client's stream is dropped, so a disconnect tears
/// the subscription down without waiting for the next publish to notice.
struct SubscriptionGuard {
    store: Arc<SessionStateStore>,
    subscriber_id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscriber_id);
    }
}

/// Authenticates, sends one `initialState` snapshot, then streams every
/// subsequent delta as one JSON object per line until the client
/// disconnects. A slow client only backs up its own channel.
pub async fn handle_stream(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let identity = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(error) => return error.into_response(),
    };
    debug!(
        session_id = identity.session_id.as_str(),
        "stream client connected",
    );

    let (subscriber_id, rx) = state.store.subscribe(&identity.session_id);
    let guard = SubscriptionGuard {
        store: Arc::clone(&state.store),
        subscriber_id,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        let mut line = serde_json::to_string(&event).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        Ok::<_, Infallible>(Bytes::from(line))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
