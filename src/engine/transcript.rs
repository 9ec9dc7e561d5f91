// Sommaii Chat Engine — Transcript State
//
// Ordered turns of one chat room. Every mutation is keyed by correlation id
// and guarded by the turn's current status; a mutation that does not apply
// (unknown id, or a transition the status machine forbids) returns None and
// leaves the turn untouched. Failed is absorbing.

use crate::atoms::types::{
    ChatStatus, ChatTurn, LawReference, Rating, TurnChange, TurnUpdate,
};
use log::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Transcript {
    room_id: Option<String>,
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn new(room_id: Option<String>) -> Self {
        Transcript {
            room_id,
            turns: Vec::new(),
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, correlation_id: Uuid) -> Option<&ChatTurn> {
        self.turns.iter().find(|t| t.correlation_id == correlation_id)
    }

    pub fn contains(&self, correlation_id: Uuid) -> bool {
        self.get(correlation_id).is_some()
    }

    /// The turn currently Queued or Streaming, if any.
    pub fn in_flight(&self) -> Option<&ChatTurn> {
        self.turns.iter().find(|t| t.status.is_in_flight())
    }

    /// Replace the whole transcript. Turns of the previous room are dropped,
    /// so late mutations keyed by their correlation ids are ignored.
    pub fn reset(&mut self, room_id: Option<String>, history: Vec<ChatTurn>) {
        debug!(
            "[chat] Transcript reset to room {:?} ({} turns)",
            room_id,
            history.len()
        );
        self.room_id = room_id;
        self.turns = history;
    }

    /// Append a freshly queued turn.
    pub fn push_queued(&mut self, turn: ChatTurn) -> TurnUpdate {
        let update = TurnUpdate {
            correlation_id: turn.correlation_id,
            status: turn.status,
            change: TurnChange::Created,
        };
        self.turns.push(turn);
        update
    }

    /// Apply one message event. Assigns the persistent id on first sight and
    /// appends `text`. Always moves the turn to Streaming, even for an
    /// empty fragment. Returns one update per applied change.
    pub fn apply_fragment(
        &mut self,
        correlation_id: Uuid,
        chat_id: &str,
        text: &str,
    ) -> Vec<TurnUpdate> {
        let Some(turn) = self.in_flight_mut(correlation_id) else {
            return Vec::new();
        };
        let mut updates = Vec::new();
        turn.status = ChatStatus::Streaming;

        if turn.persistent_id.is_empty() && !chat_id.is_empty() {
            turn.persistent_id = chat_id.to_string();
            turn.revision += 1;
            updates.push(update(turn, TurnChange::PersistentId(chat_id.to_string())));
        } else if !chat_id.is_empty() && turn.persistent_id != chat_id {
            debug!(
                "[chat] Turn {} ignoring chat_id {} (already {})",
                correlation_id, chat_id, turn.persistent_id
            );
        }

        turn.answer_text.push_str(text);
        turn.revision += 1;
        updates.push(update(turn, TurnChange::Fragment(text.to_string())));
        updates
    }

    pub fn mark_failed(&mut self, correlation_id: Uuid, reason: &str) -> Option<TurnUpdate> {
        let turn = self.in_flight_mut(correlation_id)?;
        turn.status = ChatStatus::Failed;
        turn.revision += 1;
        Some(update(turn, TurnChange::Failed(reason.to_string())))
    }

    /// End a turn the user (or its caller) walked away from: a partial answer
    /// is kept as Completed with `stopped_by_user`, no answer at all fails.
    pub fn mark_stopped(&mut self, correlation_id: Uuid, reason: &str) -> Option<TurnUpdate> {
        let has_answer = self
            .get(correlation_id)
            .map(|t| !t.answer_text.is_empty())
            .unwrap_or(false);
        if has_answer {
            self.mark_completed(correlation_id, true, false)
        } else {
            self.mark_failed(correlation_id, reason)
        }
    }

    /// Finish streaming. `loading_references` marks that a lookup follows.
    pub fn mark_completed(
        &mut self,
        correlation_id: Uuid,
        stopped_by_user: bool,
        loading_references: bool,
    ) -> Option<TurnUpdate> {
        let turn = self.in_flight_mut(correlation_id)?;
        turn.status = ChatStatus::Completed;
        turn.stopped_by_user = stopped_by_user;
        turn.loading_references = loading_references;
        turn.revision += 1;
        Some(update(turn, TurnChange::Completed))
    }

    pub fn attach_references(
        &mut self,
        correlation_id: Uuid,
        references: Vec<LawReference>,
    ) -> Option<TurnUpdate> {
        let turn = self.loading_mut(correlation_id)?;
        let count = references.len();
        turn.law_references = Some(references);
        turn.loading_references = false;
        turn.status = ChatStatus::CompletedWithReferences;
        turn.revision += 1;
        Some(update(turn, TurnChange::References(count)))
    }

    /// The lookup failed or returned nothing; the turn stays Completed.
    pub fn finish_references_unavailable(&mut self, correlation_id: Uuid) -> Option<TurnUpdate> {
        let turn = self.loading_mut(correlation_id)?;
        turn.loading_references = false;
        turn.revision += 1;
        Some(update(turn, TurnChange::ReferencesUnavailable))
    }

    pub fn set_rating(
        &mut self,
        correlation_id: Uuid,
        rating: Rating,
        feedback: Option<String>,
    ) -> Option<TurnUpdate> {
        let turn = self.turn_mut(correlation_id)?;
        if !turn.status.is_done() || turn.persistent_id.is_empty() {
            debug!("[chat] Turn {} cannot be rated in {:?}", correlation_id, turn.status);
            return None;
        }
        turn.rating = Some(rating);
        turn.feedback = feedback.filter(|f| !f.is_empty());
        turn.revision += 1;
        Some(update(turn, TurnChange::Rated(rating)))
    }

    fn turn_mut(&mut self, correlation_id: Uuid) -> Option<&mut ChatTurn> {
        let found = self
            .turns
            .iter_mut()
            .find(|t| t.correlation_id == correlation_id);
        if found.is_none() {
            debug!("[chat] Ignoring mutation for unknown turn {}", correlation_id);
        }
        found
    }

    fn in_flight_mut(&mut self, correlation_id: Uuid) -> Option<&mut ChatTurn> {
        self.turn_mut(correlation_id)
            .filter(|t| t.status.is_in_flight())
    }

    fn loading_mut(&mut self, correlation_id: Uuid) -> Option<&mut ChatTurn> {
        self.turn_mut(correlation_id)
            .filter(|t| t.status == ChatStatus::Completed && t.loading_references)
    }
}

fn update(turn: &ChatTurn, change: TurnChange) -> TurnUpdate {
    TurnUpdate {
        correlation_id: turn.correlation_id,
        status: turn.status,
        change,
    }
}
