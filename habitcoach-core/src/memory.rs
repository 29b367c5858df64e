//! Conversation memory for a dialogue session.
//!
//! An append-only, insertion-ordered list of turns. Only a bounded lookback
//! window is rendered into the model context; the full list is kept for the
//! history-mining extraction pass and the final transcript.

use crate::types::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    /// The speaker label used when rendering context for the model.
    pub fn label(&self) -> &'static str {
        match self {
            TurnRole::User => "사용자",
            TurnRole::Model => "코치",
        }
    }
}

/// One utterance in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Model, text)
    }

    fn render(&self) -> String {
        format!("{}: {}", self.role.label(), self.text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    fn window(&self, max_turns: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(max_turns);
        &self.turns[start..]
    }

    /// The last `max_turns` turns as `역할: 텍스트` lines.
    pub fn recent_context(&self, max_turns: usize) -> String {
        self.window(max_turns)
            .iter()
            .map(ConversationTurn::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The last `max_turns` turns as request messages.
    pub fn recent_messages(&self, max_turns: usize) -> Vec<Message> {
        self.window(max_turns)
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => Message::user(turn.text.clone()),
                TurnRole::Model => Message::assistant(turn.text.clone()),
            })
            .collect()
    }

    /// Every user utterance so far, one per line.
    pub fn user_history(&self) -> String {
        self.turns
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The whole conversation rendered as lines.
    pub fn transcript(&self) -> String {
        self.recent_context(self.turns.len())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last_model_turn(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.role == TurnRole::Model)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
