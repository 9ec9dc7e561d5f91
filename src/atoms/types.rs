// Sommaii Chat Engine — Core types
// These are the data structures that flow through the entire engine:
// backend wire shapes, transcript turns, and the updates views observe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Credentials ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

// ── Turn status ────────────────────────────────────────────────────────

/// Lifecycle of one question/answer exchange.
///
/// ```text
/// Queued ──► Streaming ──► Completed ──► CompletedWithReferences
///    │           │  ▲  │
///    │           └──┘  │
///    └───────────┴─────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatStatus {
    Queued,
    Streaming,
    Failed,
    Completed,
    CompletedWithReferences,
}

impl ChatStatus {
    /// Still waiting on the stream.
    pub fn is_in_flight(self) -> bool {
        matches!(self, ChatStatus::Queued | ChatStatus::Streaming)
    }

    /// Finished streaming, successfully or not.
    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    /// Finished with an answer.
    pub fn is_done(self) -> bool {
        matches!(self, ChatStatus::Completed | ChatStatus::CompletedWithReferences)
    }
}

// ── Law references ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawReference {
    pub text: String,
    pub law_name: String,
    pub law_code: String,
    pub url: String,
    pub score: f64,
}

// ── Rating ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Like,
    Dislike,
}

impl Rating {
    /// Parse the backend's stored rating column ("" means unrated).
    pub fn from_stored(value: &str) -> Option<Self> {
        match value {
            "Like" => Some(Rating::Like),
            "Dislike" => Some(Rating::Dislike),
            _ => None,
        }
    }
}

// ── Transcript turn ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    /// Client-generated identity, stable before the backend assigns one.
    pub correlation_id: Uuid,
    /// Backend chat id; empty until the first stream message carries it.
    pub persistent_id: String,
    pub question: String,
    pub answer_text: String,
    pub status: ChatStatus,
    pub model_id: String,
    pub law_references: Option<Vec<LawReference>>,
    /// True between `Completed` and the end of the law-reference lookup.
    pub loading_references: bool,
    /// The stream ended because the user asked it to.
    pub stopped_by_user: bool,
    pub rating: Option<Rating>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Number of mutations applied to this turn since creation.
    pub revision: u64,
}

impl ChatTurn {
    pub fn queued(question: impl Into<String>, model_id: impl Into<String>) -> Self {
        ChatTurn {
            correlation_id: Uuid::new_v4(),
            persistent_id: String::new(),
            question: question.into(),
            answer_text: String::new(),
            status: ChatStatus::Queued,
            model_id: model_id.into(),
            law_references: None,
            loading_references: false,
            stopped_by_user: false,
            rating: None,
            feedback: None,
            created_at: Utc::now(),
            revision: 0,
        }
    }

    /// Rebuild a settled turn from a stored history row.
    pub fn from_stored(chat: StoredChat) -> Self {
        let status = if chat.status.as_deref() == Some("FAILED") {
            ChatStatus::Failed
        } else if chat.law_references.is_some() {
            ChatStatus::CompletedWithReferences
        } else {
            ChatStatus::Completed
        };
        ChatTurn {
            correlation_id: Uuid::new_v4(),
            persistent_id: chat.id,
            question: chat.question,
            answer_text: chat.answer.unwrap_or_default(),
            status,
            model_id: chat.inference_model_id,
            law_references: chat.law_references,
            loading_references: false,
            stopped_by_user: false,
            rating: chat.rating.as_deref().and_then(Rating::from_stored),
            feedback: chat.feedback.filter(|f| !f.is_empty()),
            created_at: chat
                .created_at
                .as_deref()
                .and_then(parse_backend_timestamp)
                .unwrap_or_else(Utc::now),
            revision: 0,
        }
    }
}

/// Accept RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.f]` timestamp (taken as UTC).
pub fn parse_backend_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ── Turn updates (fan-out to views) ────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TurnChange {
    Created,
    PersistentId(String),
    Fragment(String),
    Failed(String),
    Completed,
    References(usize),
    ReferencesUnavailable,
    Rated(Rating),
}

/// One applied transcript mutation, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnUpdate {
    pub correlation_id: Uuid,
    pub status: ChatStatus,
    pub change: TurnChange,
}

// ── Stream frames ──────────────────────────────────────────────────────

/// One dispatched server-sent event, before payload decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field; `None` means the default "message" event.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

// ── Backend requests ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct QuestionRequest {
    pub chat_room_id: String,
    pub inference_model_id: String,
    pub question: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalRequest {
    pub question: String,
    pub chat_id: String,
    pub inference_model_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameRoomRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateChatRequest {
    pub rating: Rating,
    pub feedback: String,
}

impl RateChatRequest {
    pub fn like() -> Self {
        RateChatRequest { rating: Rating::Like, feedback: String::new() }
    }

    pub fn dislike(feedback: impl Into<String>) -> Self {
        RateChatRequest { rating: Rating::Dislike, feedback: feedback.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// ── Backend responses ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalResponse {
    #[serde(default)]
    pub law_references: Option<Vec<LawReference>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRoom {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One row of `GET /chats?chat_room_id=…`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredChat {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub chat_room_id: String,
    #[serde(default)]
    pub inference_model_id: String,
    #[serde(default)]
    pub law_references: Option<Vec<LawReference>>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Backend timestamps may omit the UTC offset.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// FastAPI-style error body: `{"detail": {"code": "...", "description": "..."}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub detail: ApiErrorDetail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
}
