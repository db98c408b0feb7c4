//! Authenticated HTTP client for the platform API.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::outcome::{
    classify_response, is_transient_transport_error, truncate_for_error, CallOutcome,
    PlatformEnvelope,
};
use crate::types::{ChatMessageRequest, MailDraftRequest};

const CONVERSATIONS_LIST_ENDPOINT: &str = "/v1/conversations/list";
const MESSAGES_LAST_BATCH_ENDPOINT: &str = "/v1/messages/last-batch";
const CHAT_SEND_ENDPOINT: &str = "/v1/chat/send";
const MAIL_DRAFT_CREATE_ENDPOINT: &str = "/v1/mail/drafts";
const MAIL_DRAFT_SEND_ENDPOINT: &str = "/v1/mail/drafts/send";
const MAIL_DRAFT_DELETE_ENDPOINT: &str = "/v1/mail/drafts/delete";
const PRESENCE_ENDPOINT: &str = "/v1/profiles/presence";
const MEDIA_LIST_ENDPOINT: &str = "/v1/media/list";

const ERROR_BODY_MAX_CHARS: usize = 320;

#[derive(Debug, Clone)]
pub struct PlatformClientConfig {
    pub api_base: String,
    pub bearer_token: String,
    /// Secondary clearance cookie obtained out-of-band by the login
    /// subsystem; sent verbatim when present.
    pub clearance_cookie: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    api_base: String,
    bearer_token: String,
    clearance_cookie: Option<String>,
}

impl PlatformClient {
    pub fn new(config: PlatformClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("herald-engine"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create platform api client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.trim().to_string(),
            clearance_cookie: config
                .clearance_cookie
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }

    /// Issues one POST against the platform and classifies the result. This
    /// is the single funnel every send, fetch, and presence call goes
    /// through; callers decide recovery from the returned [`CallOutcome`]
    /// alone.
    pub async fn execute(&self, endpoint: &str, payload: &Value) -> CallOutcome {
        let mut request = self
            .http
            .post(format!("{}{endpoint}", self.api_base))
            .bearer_auth(&self.bearer_token)
            .json(payload);
        if let Some(cookie) = self.clearance_cookie.as_deref() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                if is_transient_transport_error(&error) {
                    debug!(endpoint, %error, "platform call hit a transport failure");
                    return CallOutcome::TransientTimeout;
                }
                return CallOutcome::SoftError(truncate_for_error(
                    &format!("platform request failed: {error}"),
                    ERROR_BODY_MAX_CHARS,
                ));
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let envelope = serde_json::from_str::<PlatformEnvelope>(&body).unwrap_or_else(|_| {
            PlatformEnvelope {
                ok: false,
                error: Some(truncate_for_error(&body, ERROR_BODY_MAX_CHARS)),
                data: Value::Null,
            }
        });
        classify_response(status, envelope)
    }

    pub async fn list_conversation_page(
        &self,
        profile_id: &str,
        kind: herald_core::MessageKind,
        page: u32,
    ) -> CallOutcome {
        self.execute(
            CONVERSATIONS_LIST_ENDPOINT,
            &json!({
                "profile_id": profile_id,
                "type": kind.as_str(),
                "page": page,
            }),
        )
        .await
    }

    pub async fn last_messages_batch(
        &self,
        profile_id: &str,
        conversation_ids: &[String],
    ) -> CallOutcome {
        self.execute(
            MESSAGES_LAST_BATCH_ENDPOINT,
            &json!({
                "profile_id": profile_id,
                "conversation_ids": conversation_ids,
            }),
        )
        .await
    }

    pub async fn send_chat_message(&self, message: &ChatMessageRequest) -> CallOutcome {
        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(error) => {
                return CallOutcome::SoftError(format!("failed to encode chat message: {error}"))
            }
        };
        self.execute(CHAT_SEND_ENDPOINT, &payload).await
    }

    pub async fn create_mail_draft(&self, draft: &MailDraftRequest) -> CallOutcome {
        let payload = match serde_json::to_value(draft) {
            Ok(payload) => payload,
            Err(error) => {
                return CallOutcome::SoftError(format!("failed to encode mail draft: {error}"))
            }
        };
        self.execute(MAIL_DRAFT_CREATE_ENDPOINT, &payload).await
    }

    pub async fn send_mail_draft(&self, profile_id: &str, draft_id: &str) -> CallOutcome {
        self.execute(
            MAIL_DRAFT_SEND_ENDPOINT,
            &json!({"profile_id": profile_id, "draft_id": draft_id}),
        )
        .await
    }

    pub async fn delete_mail_draft(&self, profile_id: &str, draft_id: &str) -> CallOutcome {
        self.execute(
            MAIL_DRAFT_DELETE_ENDPOINT,
            &json!({"profile_id": profile_id, "draft_id": draft_id}),
        )
        .await
    }

    pub async fn set_online_presence(&self, profile_id: &str, online: bool) -> CallOutcome {
        self.execute(
            PRESENCE_ENDPOINT,
            &json!({"profile_id": profile_id, "online": online}),
        )
        .await
    }

    pub async fn list_media(&self, profile_id: &str) -> CallOutcome {
        self.execute(MEDIA_LIST_ENDPOINT, &json!({"profile_id": profile_id}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{PlatformClient, PlatformClientConfig};
    use crate::outcome::CallOutcome;
    use crate::types::ChatMessageRequest;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_client(base_url: &str) -> PlatformClient {
        PlatformClient::new(PlatformClientConfig {
            api_base: base_url.to_string(),
            bearer_token: "platform-token".to_string(),
            clearance_cookie: Some("cf_clearance=abc".to_string()),
            request_timeout_ms: 2_000,
        })
        .expect("build platform client")
    }

    #[tokio::test]
    async fn functional_execute_sends_bearer_and_cookie_and_returns_data() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/send")
                .header("authorization", "Bearer platform-token")
                .header("cookie", "cf_clearance=abc");
            then.status(200)
                .json_body(json!({"ok": true, "data": {"message_id": "m1"}}));
        });

        let client = test_client(&server.base_url());
        let outcome = client
            .send_chat_message(&ChatMessageRequest::text("p1", "c1", "Hi!"))
            .await;
        mock.assert();
        assert_eq!(
            outcome,
            CallOutcome::Success(json!({"message_id": "m1"}))
        );
    }

    #[tokio::test]
    async fn functional_execute_classifies_http_429_as_rate_limited() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/send");
            then.status(429).json_body(json!({"ok": false}));
        });

        let client = test_client(&server.base_url());
        let outcome = client
            .send_chat_message(&ChatMessageRequest::text("p1", "c1", "Hi!"))
            .await;
        assert_eq!(outcome, CallOutcome::RateLimited);
    }

    #[tokio::test]
    async fn functional_execute_classifies_unreachable_host_as_transient() {
        let client = test_client("http://127.0.0.1:9");
        let outcome = client.set_online_presence("p1", true).await;
        assert_eq!(outcome, CallOutcome::TransientTimeout);
    }

    #[tokio::test]
    async fn regression_execute_survives_non_json_error_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/media/list");
            then.status(502).body("<html>bad gateway</html>");
        });

        let client = test_client(&server.base_url());
        match client.list_media("p1").await {
            CallOutcome::SoftError(reason) => assert!(reason.contains("bad gateway")),
            other => panic!("expected soft error, got {other:?}"),
        }
    }
}
