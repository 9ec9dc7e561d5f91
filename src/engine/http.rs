// ── Sommaii Engine: HTTP status policy, error bodies & client factory ──────
//
// Shared helpers used by the HTTP backend and the session controller.
//
// Features:
//   • Stream-open classification: 2xx proceed, 4xx (except 429) terminal,
//     everything else a failure that is not retried
//   • Retryable status detection (429, 500, 502, 503, 504) for log context
//   • FastAPI error body parsing into EngineError::Api
//   • reqwest::Client factories for REST calls and the long-lived stream

use crate::atoms::constants::{MAX_ERROR_BODY_CHARS, TOKEN_EXPIRED_CODE, UNKNOWN_ERROR_CODE};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ApiErrorBody;
use crate::engine::config::ClientConfig;
use reqwest::Client;

// ── Stream-open classification ─────────────────────────────────────────────

/// What the session controller does with the status of a stream handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// 2xx: read the stream.
    Proceed,
    /// 400-499 except 429: the request itself is wrong. Never retried.
    ClientError,
    /// Anything else (429, 5xx, 1xx/3xx). Would be retryable, but no retry
    /// loop exists, so the turn fails.
    Unhandled,
}

pub fn classify_open_status(status: u16) -> OpenOutcome {
    match status {
        200..=299 => OpenOutcome::Proceed,
        429 => OpenOutcome::Unhandled,
        400..=499 => OpenOutcome::ClientError,
        _ => OpenOutcome::Unhandled,
    }
}

// ── Retryable status detection ─────────────────────────────────────────────

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

// ── Error bodies ───────────────────────────────────────────────────────────

/// Build an `Api` error from a non-success response body. Bodies that are
/// not FastAPI `{"detail": {...}}` objects keep a truncated raw description.
pub fn parse_api_error(status: u16, body: &str) -> EngineError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => EngineError::api(status, parsed.detail.code, parsed.detail.description),
        Err(_) => EngineError::api(status, UNKNOWN_ERROR_CODE, truncate_utf8(body, MAX_ERROR_BODY_CHARS)),
    }
}

/// True when the backend rejected the access token as expired.
pub fn is_token_expired(err: &EngineError) -> bool {
    err.api_code() == Some(TOKEN_EXPIRED_CODE)
}

/// Truncate to at most `max_chars` characters without splitting a code point.
fn truncate_utf8(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ── Client factories ───────────────────────────────────────────────────────

/// Client for ordinary request/response calls: connect and total timeouts.
pub fn rest_client(config: &ClientConfig) -> EngineResult<Client> {
    Ok(Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()?)
}

/// Client for the question stream: connect timeout only. A total timeout
/// would cut long answers off mid-stream.
pub fn stream_client(config: &ClientConfig) -> EngineResult<Client> {
    Ok(Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()?)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_status_classes() {
        assert_eq!(classify_open_status(200), OpenOutcome::Proceed);
        assert_eq!(classify_open_status(204), OpenOutcome::Proceed);
        assert_eq!(classify_open_status(400), OpenOutcome::ClientError);
        assert_eq!(classify_open_status(401), OpenOutcome::ClientError);
        assert_eq!(classify_open_status(403), OpenOutcome::ClientError);
        assert_eq!(classify_open_status(499), OpenOutcome::ClientError);
        assert_eq!(classify_open_status(429), OpenOutcome::Unhandled);
        assert_eq!(classify_open_status(500), OpenOutcome::Unhandled);
        assert_eq!(classify_open_status(503), OpenOutcome::Unhandled);
        assert_eq!(classify_open_status(302), OpenOutcome::Unhandled);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(502));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(504));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(403));
    }

    #[test]
    fn fastapi_error_body() {
        let err = parse_api_error(
            401,
            r#"{"detail": {"code": "token_expired", "description": "Token expired"}}"#,
        );
        assert!(is_token_expired(&err));
        match err {
            EngineError::Api { status, description, .. } => {
                assert_eq!(status, 401);
                assert_eq!(description, "Token expired");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_json_error_body_is_truncated() {
        let body = "ก".repeat(MAX_ERROR_BODY_CHARS + 20);
        let err = parse_api_error(502, &body);
        assert!(!is_token_expired(&err));
        match err {
            EngineError::Api { code, description, .. } => {
                assert_eq!(code, UNKNOWN_ERROR_CODE);
                assert_eq!(description.chars().count(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn clients_build_from_default_config() {
        let config = ClientConfig::default();
        assert!(rest_client(&config).is_ok());
        assert!(stream_client(&config).is_ok());
    }
}
