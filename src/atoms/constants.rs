// ── Sommaii Atoms: Constants ───────────────────────────────────────────────
// All named constants for the crate live here.

// ── Backend endpoints ─────────────────────────────────────────────────────
// Paths are relative to `ClientConfig::backend_url`.
pub const QUESTION_PATH: &str = "chats/question";
pub const RETRIEVAL_PATH: &str = "chats/retrieval";
pub const CHATS_PATH: &str = "chats/";
pub const CHAT_ROOMS_PATH: &str = "chat-rooms/";
pub const AUTH_LOGIN_PATH: &str = "auth/login";
pub const AUTH_LOGOUT_PATH: &str = "auth/logout";
pub const AUTH_REFRESH_PATH: &str = "auth/refresh";

// ── Backend error codes ───────────────────────────────────────────────────
// `detail.code` values the client reacts to.
pub const TOKEN_EXPIRED_CODE: &str = "token_expired";
pub const UNKNOWN_ERROR_CODE: &str = "unknown";

// ── Stream protocol ───────────────────────────────────────────────────────
pub const SSE_MESSAGE_EVENT: &str = "message";
pub const SSE_ERROR_EVENT: &str = "error";
pub const SSE_FATAL_EVENT: &str = "FatalError";

/// Marker phrase the backend emits when it cannot answer a question.
/// A completed answer containing it never triggers a law-reference lookup.
pub const NO_ANSWER_MARKER: &str = "ไม่สามารถตอบคำถาม";

// ── Configuration ─────────────────────────────────────────────────────────
pub const ENV_BACKEND_API: &str = "SOMMAII_BACKEND_API";
pub const ENV_TOKEN_FILE: &str = "SOMMAII_TOKEN_FILE";
pub const CONFIG_DIR_NAME: &str = "sommaii";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const TOKEN_FILE_NAME: &str = "token.json";

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/api/v1/";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Longest error body kept in an `Api` error description.
pub const MAX_ERROR_BODY_CHARS: usize = 500;
