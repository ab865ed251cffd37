//! Process-wide conversation history
//!
//! Every question appends a user turn followed by an empty assistant turn,
//! which is then grown in place as upstream deltas arrive. The total content
//! length is bounded by a character budget: after every append, if the budget
//! is exceeded the oldest turns (up to `evict_batch`) are dropped from the
//! front. The newest turn is never evicted, so a reply that alone exceeds
//! the budget keeps growing in place. Eviction is coarse and does not
//! guarantee the history ends up within budget after a single pass.

use crate::config::HistoryConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[derive(Debug, Default)]
struct HistoryState {
    turns: Vec<ConversationTurn>,
    total_chars: usize,
}

/// Shared, bounded log of conversation turns
#[derive(Debug)]
pub struct ConversationHistory {
    state: Mutex<HistoryState>,
    max_chars: usize,
    evict_batch: usize,
}

impl ConversationHistory {
    /// Create an empty history with the given budget
    pub fn new(max_chars: usize, evict_batch: usize) -> Self {
        Self {
            state: Mutex::new(HistoryState::default()),
            max_chars,
            evict_batch,
        }
    }

    /// Create an empty history from configuration
    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::new(config.max_chars, config.evict_batch)
    }

    /// Append a user turn
    pub fn append_user_turn(&self, text: impl Into<String>) {
        let mut state = self.state.lock();
        self.push(&mut state, ConversationTurn::new(Role::User, text));
    }

    /// Append an empty assistant turn that later deltas grow
    pub fn append_assistant_placeholder(&self) {
        let mut state = self.state.lock();
        self.push(&mut state, ConversationTurn::new(Role::Assistant, ""));
    }

    /// Record a new question and its assistant placeholder in one step.
    ///
    /// Returns the contents of the user turns recorded before this question,
    /// oldest first.
    pub fn begin_exchange(&self, question: impl Into<String>) -> Vec<String> {
        let mut state = self.state.lock();
        let prior = user_contents(&state.turns);
        self.push(&mut state, ConversationTurn::new(Role::User, question));
        self.push(&mut state, ConversationTurn::new(Role::Assistant, ""));
        prior
    }

    /// Append a streamed fragment to the last turn if it belongs to the assistant.
    ///
    /// Returns `false` (and leaves history untouched) otherwise.
    pub fn append_delta(&self, text: &str) -> bool {
        let mut state = self.state.lock();
        let Some(last) = state.turns.last_mut() else {
            warn!("Dropping delta: conversation history is empty");
            return false;
        };
        if last.role != Role::Assistant {
            warn!(role = %last.role, "Dropping delta: last turn is not an assistant turn");
            return false;
        }

        last.content.push_str(text);
        state.total_chars += text.chars().count();
        self.evict_if_over_budget(&mut state);
        true
    }

    /// Independent copy of all turns, oldest first
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.state.lock().turns.clone()
    }

    /// Contents of all user turns, oldest first
    pub fn user_turns(&self) -> Vec<String> {
        user_contents(&self.state.lock().turns)
    }

    /// Remove every turn
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.turns.clear();
        state.total_chars = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().turns.is_empty()
    }

    /// Total content length across all turns, in characters
    pub fn total_chars(&self) -> usize {
        self.state.lock().total_chars
    }

    fn push(&self, state: &mut HistoryState, turn: ConversationTurn) {
        state.total_chars += turn.char_len();
        state.turns.push(turn);
        self.evict_if_over_budget(state);
    }

    fn evict_if_over_budget(&self, state: &mut HistoryState) {
        if state.total_chars <= self.max_chars {
            return;
        }

        // The last turn may be the assistant reply still streaming.
        let count = self.evict_batch.min(state.turns.len().saturating_sub(1));
        if count == 0 {
            return;
        }
        let freed: usize = state
            .turns
            .drain(..count)
            .map(|turn| turn.char_len())
            .sum();
        state.total_chars -= freed;

        debug!(
            evicted = count,
            freed,
            remaining = state.total_chars,
            "History over budget, evicted oldest turns"
        );
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::from_config(&HistoryConfig::default())
    }
}

fn user_contents(turns: &[ConversationTurn]) -> Vec<String> {
    turns
        .iter()
        .filter(|turn| turn.role == Role::User)
        .map(|turn| turn.content.clone())
        .collect()
}
