//! Classification of a single platform call into the recovery action it
//! demands from the caller.

use serde::Deserialize;
use serde_json::Value;

/// Platform error strings that mean "you are sending too fast"; the platform
/// reports these with HTTP 200, so status alone is not enough.
const RESTRICTION_ERRORS: &[&str] = &[
    "message restriction applied",
    "sending limit reached",
    "too many messages",
];

/// Platform error strings that mean the bearer token has no access to the
/// profile it is acting for. Not recoverable by waiting.
const AUTHORIZATION_ERRORS: &[&str] = &[
    "not authorized for this profile",
    "profile access revoked",
    "account suspended",
];

/// Outcome of one classified platform call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// HTTP 2xx with a clean platform envelope; carries the `data` payload.
    Success(Value),
    /// The platform asked us to back off; retry the same operation after the
    /// cooldown without counting it as skipped.
    RateLimited,
    /// The owning worker must stop entirely and surface the reason.
    Fatal(String),
    /// Edge timeout or network failure; retry after the cooldown, bounded
    /// only by the cancellation token.
    TransientTimeout,
    /// Anything else; log it, count the item as skipped, move on.
    SoftError(String),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Response envelope every platform endpoint wraps its payload in.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PlatformEnvelope {
    #[serde(default)]
    pub(crate) ok: bool,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) data: Value,
}

pub(crate) fn classify_response(status: u16, envelope: PlatformEnvelope) -> CallOutcome {
    let error_text = envelope
        .error
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match status {
        200..=299 => {
            if let Some(error) = error_text {
                let lowered = error.to_ascii_lowercase();
                if AUTHORIZATION_ERRORS
                    .iter()
                    .any(|known| lowered.contains(known))
                {
                    return CallOutcome::Fatal(error.to_string());
                }
                if RESTRICTION_ERRORS.iter().any(|known| lowered.contains(known)) {
                    return CallOutcome::RateLimited;
                }
            }
            if envelope.ok {
                CallOutcome::Success(envelope.data)
            } else {
                CallOutcome::SoftError(
                    error_text
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            "platform reported ok=false without a reason".to_string()
                        }),
                )
            }
        }
        429 => CallOutcome::RateLimited,
        400 | 401 => CallOutcome::Fatal(
            error_text
                .map(str::to_string)
                .unwrap_or_else(|| format!("platform rejected the request with status {status}")),
        ),
        524 => CallOutcome::TransientTimeout,
        _ => CallOutcome::SoftError(
            error_text
                .map(str::to_string)
                .unwrap_or_else(|| format!("platform call failed with status {status}")),
        ),
    }
}

pub(crate) fn is_transient_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub(crate) fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = String::new();
    for ch in value.chars().take(max_chars) {
        truncated.push(ch);
    }
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::{classify_response, truncate_for_error, CallOutcome, PlatformEnvelope};
    use serde_json::json;

    fn envelope(ok: bool, error: Option<&str>) -> PlatformEnvelope {
        PlatformEnvelope {
            ok,
            error: error.map(str::to_string),
            data: json!({"items": []}),
        }
    }

    #[test]
    fn unit_classify_success_carries_data_payload() {
        let outcome = classify_response(200, envelope(true, None));
        assert_eq!(outcome, CallOutcome::Success(json!({"items": []})));
    }

    #[test]
    fn unit_classify_http_429_is_rate_limited() {
        assert_eq!(
            classify_response(429, envelope(false, None)),
            CallOutcome::RateLimited
        );
    }

    #[test]
    fn unit_classify_restriction_message_on_200_is_rate_limited() {
        assert_eq!(
            classify_response(200, envelope(false, Some("Sending limit reached for today"))),
            CallOutcome::RateLimited
        );
    }

    #[test]
    fn unit_classify_authorization_error_is_fatal_even_on_200() {
        let outcome = classify_response(200, envelope(false, Some("Not authorized for this profile")));
        assert_eq!(
            outcome,
            CallOutcome::Fatal("Not authorized for this profile".to_string())
        );
    }

    #[test]
    fn unit_classify_http_400_and_401_are_fatal() {
        for status in [400_u16, 401] {
            assert!(matches!(
                classify_response(status, envelope(false, None)),
                CallOutcome::Fatal(_)
            ));
        }
    }

    #[test]
    fn unit_classify_http_524_is_transient_timeout() {
        assert_eq!(
            classify_response(524, envelope(false, None)),
            CallOutcome::TransientTimeout
        );
    }

    #[test]
    fn unit_classify_other_failures_are_soft_errors() {
        for status in [403_u16, 404, 500, 503] {
            assert!(matches!(
                classify_response(status, envelope(false, Some("nope"))),
                CallOutcome::SoftError(_)
            ));
        }
        assert!(matches!(
            classify_response(200, envelope(false, None)),
            CallOutcome::SoftError(_)
        ));
    }

    #[test]
    fn unit_truncate_for_error_appends_ellipsis_beyond_limit() {
        assert_eq!(truncate_for_error("short", 10), "short");
        assert_eq!(truncate_for_error("abcdefghij", 4), "abcd...");
    }
}
