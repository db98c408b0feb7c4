//! End-to-end flows: workers against a mock platform API, fanned out to
//! clients through the session store and the gateway stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use httpmock::prelude::*;
use serde_json::{json, Value};

use herald_core::MessageKind;
use herald_engine::{BlockListRegistry, StartOutcome, WorkerSpec, WorkerSupervisor, WorkerTimings};
use herald_gateway::{build_gateway_router, GatewayConfig, GatewayState, StorePublisher};
use herald_platform::{PlatformClient, PlatformClientConfig};
use herald_state::{SessionStateStore, SessionStateStoreConfig};

fn operator_token(email: &str, tab: u32) -> String {
    STANDARD.encode(format!(r#"{{"email":"{email}","tab":{tab}}}"#))
}

fn platform_client(base_url: &str) -> Arc<PlatformClient> {
    Arc::new(
        PlatformClient::new(PlatformClientConfig {
            api_base: base_url.to_string(),
            bearer_token: "platform-token".to_string(),
            clearance_cookie: None,
            request_timeout_ms: 2_000,
        })
        .expect("build platform client"),
    )
}

fn fast_timings() -> WorkerTimings {
    WorkerTimings {
        send_pacing_ms: 1,
        cooldown_ms: 25,
        heartbeat_interval_ms: 60_000,
    }
}

/// Platform with two eligible counterparts for profile p1 and accepting
/// sends. Returns the chat-send mock for call counting.
fn messaging_platform(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/conversations/list")
            .json_body_includes(r#"{"page": 1}"#);
        then.status(200).json_body(json!({"ok": true, "data": {"conversations": [
            {"conversation_id": "cv1", "counterpart_id": "c1", "blocked_by_platform": false},
            {"conversation_id": "cv2", "counterpart_id": "c2", "blocked_by_platform": false},
        ]}}));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/conversations/list")
            .json_body_includes(r#"{"page": 2}"#);
        then.status(200)
            .json_body(json!({"ok": true, "data": {"conversations": []}}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/v1/messages/last-batch");
        then.status(200).json_body(json!({"ok": true, "data": {"messages": [
            {"conversation_id": "cv1", "sender_id": "c1", "recipient_id": "p1"},
            {"conversation_id": "cv2", "sender_id": "c2", "recipient_id": "p1"},
        ]}}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/v1/profiles/presence");
        then.status(200).json_body(json!({"ok": true, "data": {}}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/send");
        then.status(200)
            .json_body(json!({"ok": true, "data": {"message_id": "m"}}));
    })
}

fn build_engine(
    platform_base: &str,
) -> (
    Arc<WorkerSupervisor>,
    Arc<SessionStateStore>,
    Arc<PlatformClient>,
) {
    let client = platform_client(platform_base);
    let store = Arc::new(SessionStateStore::new(SessionStateStoreConfig::default()));
    let supervisor = Arc::new(WorkerSupervisor::new(
        Arc::clone(&client),
        Arc::new(BlockListRegistry::new()),
        Arc::new(StorePublisher::new(Arc::clone(&store))),
        fast_timings(),
    ));
    (supervisor, store, client)
}

async fn spawn_gateway(state: Arc<GatewayState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let app = build_gateway_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test gateway");
    });
    addr
}

/// Reads newline-delimited JSON events from a response body stream.
struct EventReader<S> {
    chunks: S,
    buffer: String,
}

impl<S, B, E> EventReader<S>
where
    S: futures_util::Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Debug,
{
    fn new(chunks: S) -> Self {
        Self {
            chunks,
            buffer: String::new(),
        }
    }

    async fn next_event(&mut self) -> Value {
        loop {
            if let Some(position) = self.buffer.find('\n') {
                let line = self.buffer[..position].to_string();
                self.buffer.drain(..=position);
                if line.trim().is_empty() {
                    continue;
                }
                return serde_json::from_str(&line).expect("event line is json");
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.chunks.next())
                .await
                .expect("stream produced an event in time")
                .expect("stream still open")
                .expect("chunk bytes");
            self.buffer
                .push_str(std::str::from_utf8(chunk.as_ref()).expect("utf8 chunk"));
        }
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met before timeout");
}

#[tokio::test]
async fn integration_chat_run_fans_updates_to_every_session_of_the_operator() {
    let platform = MockServer::start();
    let send = messaging_platform(&platform);
    let (supervisor, store, client) = build_engine(&platform.base_url());
    let state = Arc::new(GatewayState::new(
        GatewayConfig::default(),
        Arc::clone(&supervisor),
        store,
        client,
    ));
    let addr = spawn_gateway(state).await;

    let token_a = operator_token("operator@example.com", 1);
    let token_b = operator_token("operator@example.com", 2);
    let http = reqwest::Client::new();

    // Second tab connects its push stream before the first tab starts work.
    let stream_response = http
        .get(format!("http://{addr}/engine/stream"))
        .bearer_auth(&token_b)
        .send()
        .await
        .expect("open stream");
    let mut events = EventReader::new(stream_response.bytes_stream());
    let initial = events.next_event().await;
    assert_eq!(initial["type"], "initialState");

    let start = http
        .post(format!("http://{addr}/engine/start"))
        .bearer_auth(&token_a)
        .json(&json!({"profile_id": "p1", "kind": "chat", "message": "Hi!"}))
        .send()
        .await
        .expect("start worker")
        .json::<Value>()
        .await
        .expect("start body");
    assert_eq!(start["started"], true);

    // The other tab observes the cycle through fan-out alone.
    loop {
        let event = events.next_event().await;
        if event["type"] == "sessionUpdate" {
            continue;
        }
        assert_eq!(event["type"], "stateUpdate");
        assert_eq!(event["data"]["profile_id"], "p1");
        if event["data"]["progress"]["sent"] == 2 {
            break;
        }
    }
    wait_until(|| send.calls() == 2, Duration::from_secs(5)).await;

    // Merged states are visible to the second tab's polling call too.
    let states = http
        .get(format!("http://{addr}/engine/states"))
        .bearer_auth(&token_b)
        .send()
        .await
        .expect("states")
        .json::<Value>()
        .await
        .expect("states body");
    assert_eq!(states["states"][0]["progress"]["sent"], 2);

    // Either tab may stop the worker; the terminal status reaches the stream.
    let stop = http
        .post(format!("http://{addr}/engine/stop"))
        .bearer_auth(&token_b)
        .json(&json!({"profile_id": "p1", "kind": "chat"}))
        .send()
        .await
        .expect("stop")
        .json::<Value>()
        .await
        .expect("stop body");
    assert_eq!(stop["stopped"], true);

    loop {
        let event = events.next_event().await;
        if event["type"] == "stateUpdate" && event["data"]["status"] == "Processing stopped" {
            break;
        }
    }
    wait_until(
        || !supervisor.is_processing("p1", MessageKind::Chat),
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(supervisor.status("p1", MessageKind::Chat), "Ready");
}

#[tokio::test]
async fn integration_block_list_prevents_recontact_until_cleared() {
    let platform = MockServer::start();
    let send = messaging_platform(&platform);
    let (supervisor, store, _client) = build_engine(&platform.base_url());
    store.set_session("session-1", Some("operator@example.com"), 1);

    let spec = WorkerSpec {
        profile_id: "p1".to_string(),
        kind: MessageKind::Chat,
        operator_email: "operator@example.com".to_string(),
        session_id: "session-1".to_string(),
        message: "Hi!".to_string(),
        attachment_id: None,
    };
    assert_eq!(supervisor.start(spec), StartOutcome::Started);

    // First cycle contacts both counterparts.
    wait_until(|| send.calls() == 2, Duration::from_secs(5)).await;

    // The platform keeps listing the same conversations, but later cycles
    // filter them through the block list: the send count must not move.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(send.calls(), 2);

    // Clearing the blocks lets the next cycle contact them again.
    assert_eq!(supervisor.clear_blocks("p1", MessageKind::Chat), 2);
    wait_until(|| send.calls() == 4, Duration::from_secs(5)).await;

    supervisor.shutdown().await;
}

#[tokio::test]
async fn integration_stop_all_publishes_terminal_status_for_every_profile() {
    let platform = MockServer::start();
    let _send = messaging_platform(&platform);
    let (supervisor, store, _client) = build_engine(&platform.base_url());
    store.set_session("session-1", Some("operator@example.com"), 1);

    for profile_id in ["p1", "p2"] {
        let outcome = supervisor.start(WorkerSpec {
            profile_id: profile_id.to_string(),
            kind: MessageKind::Chat,
            operator_email: "operator@example.com".to_string(),
            session_id: "session-1".to_string(),
            message: "Hi!".to_string(),
            attachment_id: None,
        });
        assert_eq!(outcome, StartOutcome::Started);
    }

    assert_eq!(supervisor.stop_all(), 2);
    wait_until(|| supervisor.active_count() == 0, Duration::from_secs(5)).await;

    let states = store.states_for_email("operator@example.com");
    let stopped = states
        .iter()
        .filter(|snapshot| snapshot.status == "Processing stopped")
        .count();
    assert_eq!(stopped, 2);

    supervisor.shutdown().await;
}
