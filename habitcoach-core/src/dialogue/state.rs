//! Technical conversation states and their allowed transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DialogueError;

/// Technical state of the voice/text conversation.
///
/// There is no terminal state. The conversation ends when the completion
/// detector fires, which the hosting screen hears about through a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    Idle,
    Connecting,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::Connecting => "connecting",
            VoiceState::Listening => "listening",
            VoiceState::Processing => "processing",
            VoiceState::Speaking => "speaking",
            VoiceState::Error => "error",
        }
    }

    /// States in which user input is not accepted.
    pub fn is_busy(&self) -> bool {
        matches!(self, VoiceState::Processing | VoiceState::Speaking)
    }

    /// Whether `self -> to` is an allowed edge.
    pub fn can_transition_to(&self, to: VoiceState) -> bool {
        use VoiceState::*;
        match (self, to) {
            (_, Error) => true,
            (Error, Idle) => true,
            (Idle, Connecting | Listening | Processing) => true,
            (Connecting, Listening | Idle) => true,
            (Listening, Processing | Idle) => true,
            (Processing, Speaking | Idle) => true,
            (Speaking, Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for VoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: VoiceState,
    pub to: VoiceState,
    pub at: DateTime<Utc>,
}

/// Transitions kept for inspection; older entries are dropped first.
pub const MAX_STATE_HISTORY: usize = 64;

/// State holder that rejects edges outside the transition table.
#[derive(Debug, Clone)]
pub struct VoiceStateMachine {
    state: VoiceState,
    history: Vec<StateTransition>,
}

impl Default for VoiceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceStateMachine {
    pub fn new() -> Self {
        Self {
            state: VoiceState::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Move to `to`, or fail with `InvalidStateTransition`.
    ///
    /// A transition to the current state is a no-op.
    pub fn transition(&mut self, to: VoiceState) -> Result<VoiceState, DialogueError> {
        if self.state == to {
            return Ok(to);
        }
        if !self.state.can_transition_to(to) {
            return Err(DialogueError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        debug!(from = %self.state, to = %to, "Voice state transition");
        self.record(to);
        Ok(to)
    }

    /// Force the machine back to `Idle` from any state.
    pub fn reset(&mut self) {
        if self.state != VoiceState::Idle {
            self.record(VoiceState::Idle);
        }
    }

    fn record(&mut self, to: VoiceState) {
        if self.history.len() >= MAX_STATE_HISTORY {
            let excess = self.history.len() + 1 - MAX_STATE_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }
}
