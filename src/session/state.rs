//! Turn phase, per-turn context, and conversation history.

use tokio_util::sync::CancellationToken;

use crate::adapters::{ChatMessage, Role};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Coarse state of the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Listening,
    Transcribed,
    Thinking,
    Speaking,
    Interrupted,
    Error,
}

impl TurnPhase {
    /// Phases during which the barge-in gate evaluates inbound audio.
    pub fn accepts_barge_in(self) -> bool {
        matches!(self, TurnPhase::Thinking | TurnPhase::Speaking)
    }

    /// Phases during which a [`TurnContext`] exists.
    pub fn has_active_turn(self) -> bool {
        matches!(
            self,
            TurnPhase::Transcribed | TurnPhase::Thinking | TurnPhase::Speaking
        )
    }
}

// ---------------------------------------------------------------------------
// Turn context
// ---------------------------------------------------------------------------

/// State of the turn currently being generated and spoken.
///
/// Exists only during `Thinking`/`Speaking`; at most one per session.
#[derive(Debug)]
pub struct TurnContext {
    /// Monotonic turn number within the session.
    pub turn_id: u64,
    /// Epoch the turn was started under; outbound items are tagged with it.
    pub epoch: u64,
    /// Child of the session token; cancelling it stops LLM and TTS.
    pub cancel: CancellationToken,
    /// The finalized user utterance that started the turn.
    pub user_text: String,
    /// Running assistant text, mirrored to the client incrementally.
    pub assistant_buffer: String,
    /// Full assistant text once the token stream ended.
    pub final_text: Option<String>,
    pub llm_done: bool,
    pub speaking_started: bool,
    pub speaking_done: bool,
}

impl TurnContext {
    pub fn new(turn_id: u64, epoch: u64, cancel: CancellationToken, user_text: String) -> Self {
        Self {
            turn_id,
            epoch,
            cancel,
            user_text,
            assistant_buffer: String::new(),
            final_text: None,
            llm_done: false,
            speaking_started: false,
            speaking_done: false,
        }
    }

    /// Both the token stream and playback have finished.
    pub fn is_complete(&self) -> bool {
        self.llm_done && self.speaking_done
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Ordered conversation history with a bounded window for prompting.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            text: text.into(),
        });
    }

    /// The last `max_messages` messages, oldest first.
    pub fn window(&self, max_messages: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(max_messages);
        self.messages[start..].to_vec()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_barge_in_windows() {
        assert!(TurnPhase::Thinking.accepts_barge_in());
        assert!(TurnPhase::Speaking.accepts_barge_in());
        assert!(!TurnPhase::Listening.accepts_barge_in());
        assert!(!TurnPhase::Idle.accepts_barge_in());
    }

    #[test]
    fn test_turn_completion_requires_both_sides() {
        let mut turn = TurnContext::new(1, 0, CancellationToken::new(), "hi".into());
        assert!(!turn.is_complete());
        turn.llm_done = true;
        assert!(!turn.is_complete());
        turn.speaking_done = true;
        assert!(turn.is_complete());
    }

    #[test]
    fn test_history_window() {
        let mut h = ConversationHistory::new();
        for i in 0..10 {
            h.push(Role::User, format!("m{i}"));
        }
        let w = h.window(3);
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].text, "m7");
        assert_eq!(w[2].text, "m9");
    }

    #[test]
    fn test_history_window_smaller_than_max() {
        let mut h = ConversationHistory::new();
        h.push(Role::User, "only");
        assert_eq!(h.window(20).len(), 1);
    }

    #[test]
    fn test_history_clear() {
        let mut h = ConversationHistory::new();
        h.push(Role::User, "a");
        h.push(Role::Assistant, "b");
        assert_eq!(h.len(), 2);
        h.clear();
        assert!(h.is_empty());
    }
}
