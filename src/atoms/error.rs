// ── Sommaii Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the chat engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, HTTP, Stream, Auth…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Backend error bodies (`{"detail": {"code", "description"}}`) land in `Api`
//     so callers can match on the backend's error code.
//   • No variant carries secret material (tokens, passwords) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Config file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Backend URL could not be joined with an endpoint path.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Client configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication failure: no stored tokens, or refresh rejected.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Backend answered with a non-success status.
    #[error("API error {status} ({code}): {description}")]
    Api {
        status: u16,
        code: String,
        description: String,
    },

    /// The event stream broke at the transport or framing level.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A single stream message could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Another question is already in flight on this transcript.
    #[error("A question is already in flight (turn {0})")]
    Busy(uuid::Uuid),

    /// Caller-supplied input was rejected before any I/O happened.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create an API error from its parts.
    pub fn api(status: u16, code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            description: description.into(),
        }
    }

    /// Backend error code, when this is an `Api` error.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ──────────────────────────────────────
// Lets view layers (CLI) print errors without importing the enum.

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_exposes_code() {
        let err = EngineError::api(401, "token_expired", "Token expired");
        assert_eq!(err.api_code(), Some("token_expired"));
        assert_eq!(err.to_string(), "API error 401 (token_expired): Token expired");
        assert_eq!(EngineError::Auth("x".into()).api_code(), None);
    }
}
