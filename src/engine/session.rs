// Sommaii Chat Engine — Streaming Session Controller
//
// Drives one question through to a terminal state:
//
//   push Queued ─► supersede signal ─► proactive refresh ─► open stream
//     ─► classify open status ─► apply frames until close/fatal/cancel
//     ─► Completed | Failed ─► optional law-reference lookup
//
// All transcript mutations go through the guarded methods on `Transcript`,
// so a late event for a turn that already failed, or that was dropped by a
// room switch, is a no-op. Every applied mutation is broadcast as a
// `TurnUpdate` after the transcript lock is released.
//
// A caller that drops the `ask_question` future mid-flight does not strand
// the turn: a `TurnGuard` settles it as stopped on drop.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::ChatBackend;
use crate::atoms::types::{
    ChatStatus, ChatTurn, QuestionRequest, RateChatRequest, Rating, RetrievalRequest, TurnUpdate,
};
use crate::engine::auth::TokenStore;
use crate::engine::cancel::{CancellationCoordinator, StreamSignal};
use crate::engine::config::ClientConfig;
use crate::engine::http::{classify_open_status, is_retryable_status, OpenOutcome};
use crate::engine::sse::{self, StreamEvent};
use crate::engine::transcript::Transcript;
use futures::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Result of one `ask_question` call: which turn it created and where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AskOutcome {
    pub correlation_id: Uuid,
    pub status: ChatStatus,
}

/// Settles a turn whose `ask_question` future is dropped before the turn is
/// final. Once the turn is terminal (and not loading references) dropping the
/// guard changes nothing.
struct TurnGuard {
    transcript: Arc<Mutex<Transcript>>,
    updates: broadcast::Sender<TurnUpdate>,
    signal: StreamSignal,
    id: Uuid,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let applied = {
            let mut transcript = self.transcript.lock();
            let (in_flight, loading) = transcript
                .get(self.id)
                .map(|t| (t.status.is_in_flight(), t.loading_references))
                .unwrap_or_default();
            if in_flight {
                transcript.mark_stopped(self.id, "Abandoned before any answer arrived")
            } else if loading {
                transcript.finish_references_unavailable(self.id)
            } else {
                None
            }
        };
        let Some(update) = applied else {
            return;
        };
        warn!(
            "[chat] Turn {} abandoned by its caller, settled as {:?}",
            self.id, update.status
        );
        self.signal.cancel();
        let _ = self.updates.send(update);
    }
}

/// How the frame loop ended.
enum StreamEnd {
    /// Transport closed normally.
    Closed,
    /// The signal was cancelled from outside (stop or room switch).
    Cancelled,
    /// An `error` / `FatalError` event already failed the turn.
    Fatal,
    /// Transport-level read error.
    Broken(String),
}

pub struct SessionController<B: ChatBackend + 'static> {
    backend: Arc<B>,
    tokens: Arc<TokenStore>,
    config: ClientConfig,
    transcript: Arc<Mutex<Transcript>>,
    coordinator: CancellationCoordinator,
    updates: broadcast::Sender<TurnUpdate>,
}

impl<B: ChatBackend + 'static> SessionController<B> {
    pub fn new(backend: Arc<B>, tokens: Arc<TokenStore>, config: ClientConfig) -> Self {
        let (updates, _) = broadcast::channel(config.event_buffer.max(1));
        SessionController {
            backend,
            tokens,
            config,
            transcript: Arc::new(Mutex::new(Transcript::new(None))),
            coordinator: CancellationCoordinator::new(),
            updates,
        }
    }

    // ── Read access for views ──────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<TurnUpdate> {
        self.updates.subscribe()
    }

    /// Snapshot of all turns, oldest first.
    pub fn transcript(&self) -> Vec<ChatTurn> {
        self.transcript.lock().turns().to_vec()
    }

    pub fn turn(&self, correlation_id: Uuid) -> Option<ChatTurn> {
        self.transcript.lock().get(correlation_id).cloned()
    }

    pub fn room_id(&self) -> Option<String> {
        self.transcript.lock().room_id().map(str::to_string)
    }

    pub fn is_busy(&self) -> bool {
        self.transcript.lock().in_flight().is_some()
    }

    pub fn active_signal(&self) -> StreamSignal {
        self.coordinator.active_signal()
    }

    // ── Intents ────────────────────────────────────────────────────────

    /// Ask a question in `room_id` and drive the turn to a terminal state.
    ///
    /// Rejected up front (no turn created) when the question is blank, when
    /// no tokens are stored, or when another turn of this transcript is still
    /// in flight. Asking in a different room than the current transcript
    /// resets the transcript to that room first.
    pub async fn ask_question(
        &self,
        question: &str,
        model_id: &str,
        room_id: &str,
    ) -> EngineResult<AskOutcome> {
        if question.trim().is_empty() {
            return Err(EngineError::InvalidInput("question is empty".into()));
        }
        if model_id.is_empty() || room_id.is_empty() {
            return Err(EngineError::InvalidInput("model id and room id are required".into()));
        }
        if !self.tokens.is_signed_in() {
            return Err(EngineError::Auth("Not signed in".into()));
        }

        let turn = ChatTurn::queued(question, model_id);
        let id = turn.correlation_id;
        let (first_turn, created, signal) = {
            let mut transcript = self.transcript.lock();
            if transcript.room_id() != Some(room_id) {
                transcript.reset(Some(room_id.to_string()), Vec::new());
            } else if let Some(busy) = transcript.in_flight() {
                return Err(EngineError::Busy(busy.correlation_id));
            }
            let first_turn = transcript.is_empty();
            let created = transcript.push_queued(turn);
            // Signals are handed out in the same order turns are pushed.
            (first_turn, created, self.coordinator.supersede())
        };
        let _guard = TurnGuard {
            transcript: Arc::clone(&self.transcript),
            updates: self.updates.clone(),
            signal: signal.clone(),
            id,
        };
        self.emit(created);

        info!(
            "[chat] Turn {} queued in room {} (model {}, signal {})",
            id,
            room_id,
            model_id,
            signal.generation()
        );

        self.refresh_tokens().await;

        let Some(access_token) = self.tokens.access_token() else {
            self.fail(id, "Signed out before the stream opened");
            return Ok(self.outcome(id));
        };
        let request = QuestionRequest {
            chat_room_id: room_id.to_string(),
            inference_model_id: model_id.to_string(),
            question: question.to_string(),
        };

        let opened = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                self.finish_stopped(id);
                return Ok(self.outcome(id));
            }
            opened = self.backend.open_question(&access_token, &request) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!("[chat] Turn {} stream failed to open: {}", id, e);
                self.fail(id, &e.to_string());
                return Ok(self.outcome(id));
            }
        };

        if first_turn {
            self.spawn_rename(room_id, question);
        }

        match classify_open_status(stream.status) {
            OpenOutcome::Proceed => {}
            OpenOutcome::ClientError => {
                warn!("[chat] Turn {} rejected with client error {}", id, stream.status);
                self.fail(id, &format!("HTTP {}", stream.status));
                signal.cancel();
                return Ok(self.outcome(id));
            }
            OpenOutcome::Unhandled => {
                warn!(
                    "[chat] Turn {} stream open returned {} (retryable: {}), not retrying",
                    id,
                    stream.status,
                    is_retryable_status(stream.status)
                );
                self.fail(id, &format!("HTTP {}", stream.status));
                signal.cancel();
                return Ok(self.outcome(id));
            }
        }

        let mut frames = stream.frames;
        let end = loop {
            tokio::select! {
                biased;
                _ = signal.cancelled() => break StreamEnd::Cancelled,
                next = frames.next() => match next {
                    None => break StreamEnd::Closed,
                    Some(Err(e)) => break StreamEnd::Broken(e.to_string()),
                    Some(Ok(frame)) => match sse::decode_event(&frame) {
                        Ok(None) => {}
                        Ok(Some(StreamEvent::Message(payload))) => {
                            let text = payload.text.unwrap_or_default();
                            let updates = self
                                .transcript
                                .lock()
                                .apply_fragment(id, &payload.chat_id, &text);
                            updates.into_iter().for_each(|u| self.emit(u));
                        }
                        Ok(Some(StreamEvent::Error(detail) | StreamEvent::Fatal(detail))) => {
                            warn!(
                                "[chat] Turn {} aborted by backend ({}): {}",
                                id, detail.code, detail.description
                            );
                            self.fail(id, &detail.description);
                            signal.cancel();
                            break StreamEnd::Fatal;
                        }
                        Err(e) => warn!("[sse] Turn {} skipping message: {}", id, e),
                    },
                },
            }
        };
        drop(frames);

        match end {
            StreamEnd::Fatal => {}
            StreamEnd::Cancelled => self.finish_stopped(id),
            StreamEnd::Broken(reason) => {
                error!("[chat] Turn {} stream broke: {}", id, reason);
                self.fail(id, &reason);
            }
            StreamEnd::Closed if stream.status == 200 => {
                self.finish_completed(id, question, model_id).await;
            }
            StreamEnd::Closed => {
                warn!("[chat] Turn {} stream closed with status {}", id, stream.status);
                self.fail(id, &format!("HTTP {}", stream.status));
            }
        }
        Ok(self.outcome(id))
    }

    /// Cancel the in-flight stream. A turn that already has a partial answer
    /// finishes as Completed with `stopped_by_user`; one without any answer
    /// fails. Returns whether a turn was in flight.
    pub fn stop(&self) -> bool {
        let in_flight = self.is_busy();
        let signal = self.coordinator.supersede();
        info!(
            "[chat] Stop requested (in flight: {}, next signal {})",
            in_flight,
            signal.generation()
        );
        in_flight
    }

    /// Replace the transcript with `history` for `room_id`, cancelling any
    /// stream of the previous room.
    pub fn switch_room(&self, room_id: &str, history: Vec<ChatTurn>) {
        let mut transcript = self.transcript.lock();
        self.coordinator.supersede();
        transcript.reset(Some(room_id.to_string()), history);
    }

    /// Fetch stored history for `room_id` and switch to it.
    pub async fn load_room(&self, room_id: &str) -> EngineResult<usize> {
        let chats = self.backend.list_chats(room_id).await?;
        let history: Vec<ChatTurn> = chats.into_iter().map(ChatTurn::from_stored).collect();
        let count = history.len();
        self.switch_room(room_id, history);
        info!("[chat] Loaded {} turns for room {}", count, room_id);
        Ok(count)
    }

    /// Rate a finished turn. Like always sends empty feedback.
    pub async fn rate(
        &self,
        correlation_id: Uuid,
        rating: Rating,
        feedback: Option<String>,
    ) -> EngineResult<()> {
        let chat_id = match self.turn(correlation_id) {
            Some(turn) if turn.status.is_done() && !turn.persistent_id.is_empty() => {
                turn.persistent_id
            }
            Some(turn) => {
                return Err(EngineError::InvalidInput(format!(
                    "turn {} cannot be rated while {:?}",
                    correlation_id, turn.status
                )))
            }
            None => {
                return Err(EngineError::InvalidInput(format!(
                    "unknown turn {}",
                    correlation_id
                )))
            }
        };
        let request = match rating {
            Rating::Like => RateChatRequest::like(),
            Rating::Dislike => RateChatRequest::dislike(feedback.unwrap_or_default()),
        };
        self.backend.rate_chat(&chat_id, &request).await?;
        let applied = self
            .transcript
            .lock()
            .set_rating(correlation_id, rating, Some(request.feedback));
        if let Some(update) = applied {
            self.emit(update);
        }
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn emit(&self, update: TurnUpdate) {
        // No receivers is fine; views subscribe on their own schedule.
        let _ = self.updates.send(update);
    }

    fn outcome(&self, id: Uuid) -> AskOutcome {
        let status = self
            .turn(id)
            .map(|t| t.status)
            .unwrap_or(ChatStatus::Failed);
        AskOutcome {
            correlation_id: id,
            status,
        }
    }

    fn fail(&self, id: Uuid, reason: &str) {
        let applied = self.transcript.lock().mark_failed(id, reason);
        if let Some(update) = applied {
            self.emit(update);
        }
    }

    /// Best effort; the stored access token is used as-is on failure.
    async fn refresh_tokens(&self) {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            return;
        };
        match self.backend.refresh(&refresh_token).await {
            Ok(pair) => {
                self.tokens.replace(pair);
                debug!("[auth] Proactive refresh succeeded");
            }
            Err(e) => warn!("[auth] Proactive refresh failed, using stored token: {}", e),
        }
    }

    fn spawn_rename(&self, room_id: &str, question: &str) {
        let backend = Arc::clone(&self.backend);
        let room_id = room_id.to_string();
        let name = question.to_string();
        tokio::spawn(async move {
            match backend.rename_room(&room_id, &name).await {
                Ok(room) => debug!("[chat] Room {} renamed to {:?}", room.id, room.name),
                Err(e) => warn!("[chat] Room {} rename failed: {}", room_id, e),
            }
        });
    }

    fn finish_stopped(&self, id: Uuid) {
        let applied = self
            .transcript
            .lock()
            .mark_stopped(id, "Stopped before any answer arrived");
        if let Some(update) = applied {
            info!("[chat] Turn {} stopped ({:?})", id, update.status);
            self.emit(update);
        }
    }

    async fn finish_completed(&self, id: Uuid, question: &str, model_id: &str) {
        let (applied, chat_id) = {
            let mut transcript = self.transcript.lock();
            let Some(turn) = transcript.get(id) else {
                return;
            };
            let chat_id = turn.persistent_id.clone();
            let wants_references =
                !chat_id.is_empty() && !turn.answer_text.contains(&self.config.no_answer_marker);
            let applied = transcript.mark_completed(id, false, wants_references);
            (applied, wants_references.then_some(chat_id))
        };
        let Some(update) = applied else {
            return;
        };
        self.emit(update);
        let Some(chat_id) = chat_id else {
            info!("[chat] Turn {} completed without reference lookup", id);
            return;
        };

        let request = RetrievalRequest {
            question: question.to_string(),
            chat_id,
            inference_model_id: model_id.to_string(),
        };
        let result = self.backend.retrieve_law_references(&request).await;
        let applied = {
            let mut transcript = self.transcript.lock();
            if !transcript.contains(id) {
                debug!("[chat] Turn {} left the transcript before references arrived", id);
                return;
            }
            match result {
                Ok(resp) => match resp.law_references {
                    Some(references) => transcript.attach_references(id, references),
                    None => transcript.finish_references_unavailable(id),
                },
                Err(e) => {
                    warn!("[chat] Turn {} law-reference lookup failed: {}", id, e);
                    transcript.finish_references_unavailable(id)
                }
            }
        };
        if let Some(update) = applied {
            self.emit(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::traits::QuestionStream;
    use crate::atoms::types::{ChatRoom, RetrievalResponse, StoredChat, TokenPair};
    use async_trait::async_trait;

    /// Backend that refuses everything; enough for the paths that never reach I/O.
    struct Offline;

    #[async_trait]
    impl ChatBackend for Offline {
        async fn refresh(&self, _: &str) -> EngineResult<TokenPair> {
            Err(EngineError::Stream("offline".into()))
        }
        async fn open_question(&self, _: &str, _: &QuestionRequest) -> EngineResult<QuestionStream> {
            Err(EngineError::Stream("offline".into()))
        }
        async fn retrieve_law_references(&self, _: &RetrievalRequest) -> EngineResult<RetrievalResponse> {
            Err(EngineError::Stream("offline".into()))
        }
        async fn rename_room(&self, _: &str, _: &str) -> EngineResult<ChatRoom> {
            Err(EngineError::Stream("offline".into()))
        }
        async fn rate_chat(&self, _: &str, _: &RateChatRequest) -> EngineResult<()> {
            Err(EngineError::Stream("offline".into()))
        }
        async fn list_chats(&self, _: &str) -> EngineResult<Vec<StoredChat>> {
            Err(EngineError::Stream("offline".into()))
        }
    }

    fn controller() -> SessionController<Offline> {
        let tokens = TokenStore::new(Some(TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        }));
        SessionController::new(Arc::new(Offline), Arc::new(tokens), ClientConfig::default())
    }

    #[tokio::test]
    async fn open_failure_fails_the_turn() {
        let c = controller();
        let mut rx = c.subscribe();
        let outcome = c.ask_question("q", "m", "r1").await.unwrap();
        assert_eq!(outcome.status, ChatStatus::Failed);
        assert_eq!(rx.try_recv().unwrap().status, ChatStatus::Queued);
        assert_eq!(rx.try_recv().unwrap().status, ChatStatus::Failed);
        assert!(!c.is_busy());
    }

    #[tokio::test]
    async fn blank_inputs_create_no_turn() {
        let c = controller();
        assert!(matches!(c.ask_question("\n ", "m", "r1").await, Err(EngineError::InvalidInput(_))));
        assert!(matches!(c.ask_question("q", "", "r1").await, Err(EngineError::InvalidInput(_))));
        assert!(c.transcript().is_empty());
    }

    #[test]
    fn stop_when_idle_still_supersedes() {
        let c = controller();
        let before = c.active_signal();
        assert!(!c.stop());
        assert!(before.is_cancelled());
        assert!(c.active_signal().generation() > before.generation());
    }

    #[tokio::test]
    async fn rating_an_unknown_turn_is_rejected() {
        let c = controller();
        c.switch_room("r1", Vec::new());
        let err = c.rate(Uuid::new_v4(), Rating::Like, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(c.room_id().as_deref(), Some("r1"));
    }
}
