// ── Sommaii Atoms: Traits ──────────────────────────────────────────────────
// The backend seam. The session controller only talks to `ChatBackend`,
// so the HTTP implementation and the scripted test backend are
// interchangeable.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{
    ChatRoom, QuestionRequest, RateChatRequest, RetrievalRequest, RetrievalResponse, SseFrame,
    StoredChat, TokenPair,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// An opened question stream: the handshake status plus the frames that follow.
/// Dropping `frames` aborts the underlying connection.
pub struct QuestionStream {
    pub status: u16,
    pub frames: BoxStream<'static, EngineResult<SseFrame>>,
}

impl std::fmt::Debug for QuestionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionStream").field("status", &self.status).finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Exchange a refresh token for a new token pair.
    async fn refresh(&self, refresh_token: &str) -> EngineResult<TokenPair>;

    /// Open the question event stream. Any HTTP status is returned as-is;
    /// only transport failures are errors.
    async fn open_question(
        &self,
        access_token: &str,
        request: &QuestionRequest,
    ) -> EngineResult<QuestionStream>;

    async fn retrieve_law_references(
        &self,
        request: &RetrievalRequest,
    ) -> EngineResult<RetrievalResponse>;

    async fn rename_room(&self, room_id: &str, name: &str) -> EngineResult<ChatRoom>;

    async fn rate_chat(&self, chat_id: &str, request: &RateChatRequest) -> EngineResult<()>;

    async fn list_chats(&self, room_id: &str) -> EngineResult<Vec<StoredChat>>;
}
