//! A single coaching conversation and the hooks the hosting screen implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DialogueError;
use crate::goal::{CompletionVerdict, GoalRecord};
use crate::memory::{ConversationMemory, ConversationTurn};

use super::prompt::ChatMode;
use super::state::{VoiceState, VoiceStateMachine};
use super::steps::{DialogueStep, next_step};

/// Whether the finishing turn came in as a recording or as typed text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionSource {
    Voice,
    #[default]
    Text,
}

/// Payload handed to the hosting screen when the goal is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalCompletion {
    pub habit_name: String,
    pub goal_period: String,
    pub available_time: String,
    pub difficulty_reason: String,
    pub intensity: String,
    pub transcript: String,
    pub mode: ChatMode,
    pub source: CompletionSource,
    pub is_voice_complete: bool,
}

/// Hooks through which the orchestrator reports to its host.
#[async_trait]
pub trait DialogueCallback: Send + Sync {
    /// The technical state changed.
    async fn on_state_change(&self, state: VoiceState);

    /// A streamed fragment of the reply. Display only; never parsed.
    async fn on_token(&self, _token: &str) {}

    /// The goal is complete. Called at most once per session.
    async fn on_complete(&self, completion: &GoalCompletion);
}

/// A callback that ignores everything.
pub struct NoOpCallback;

#[async_trait]
impl DialogueCallback for NoOpCallback {
    async fn on_state_change(&self, _state: VoiceState) {}
    async fn on_complete(&self, _completion: &GoalCompletion) {}
}

/// A callback that records all events for test assertions.
pub struct RecordingCallback {
    states: tokio::sync::Mutex<Vec<VoiceState>>,
    tokens: tokio::sync::Mutex<Vec<String>>,
    completions: tokio::sync::Mutex<Vec<GoalCompletion>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self {
            states: tokio::sync::Mutex::new(Vec::new()),
            tokens: tokio::sync::Mutex::new(Vec::new()),
            completions: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn states(&self) -> Vec<VoiceState> {
        self.states.lock().await.clone()
    }

    pub async fn tokens(&self) -> Vec<String> {
        self.tokens.lock().await.clone()
    }

    pub async fn completions(&self) -> Vec<GoalCompletion> {
        self.completions.lock().await.clone()
    }
}

impl Default for RecordingCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DialogueCallback for RecordingCallback {
    async fn on_state_change(&self, state: VoiceState) {
        self.states.lock().await.push(state);
    }

    async fn on_token(&self, token: &str) {
        self.tokens.lock().await.push(token.to_string());
    }

    async fn on_complete(&self, completion: &GoalCompletion) {
        self.completions.lock().await.push(completion.clone());
    }
}

/// One live conversation: the goal record, the turns, and the state overlay.
///
/// Created when the chat screen opens and closed on completion or teardown.
/// A closed session accepts no further turns.
#[derive(Debug)]
pub struct DialogueSession {
    id: Uuid,
    mode: ChatMode,
    user_name: Option<String>,
    record: GoalRecord,
    memory: ConversationMemory,
    machine: VoiceStateMachine,
    step: DialogueStep,
    source: CompletionSource,
    started_at: DateTime<Utc>,
    closed: bool,
}

impl DialogueSession {
    pub fn new(mode: ChatMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            user_name: None,
            record: GoalRecord::new(),
            memory: ConversationMemory::new(),
            machine: VoiceStateMachine::new(),
            step: DialogueStep::Name,
            source: CompletionSource::Text,
            started_at: Utc::now(),
            closed: false,
        }
    }

    /// Start with a known user name (the host may already have it).
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.set_user_name(name);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn set_user_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !name.trim().is_empty() {
            self.user_name = Some(name.trim().to_string());
            self.step = next_step(&self.record, self.user_name());
        }
    }

    pub fn record(&self) -> &GoalRecord {
        &self.record
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn state(&self) -> VoiceState {
        self.machine.state()
    }

    pub fn state_machine(&self) -> &VoiceStateMachine {
        &self.machine
    }

    pub fn step(&self) -> DialogueStep {
        self.step
    }

    pub fn source(&self) -> CompletionSource {
        self.source
    }

    pub fn set_source(&mut self, source: CompletionSource) {
        self.source = source;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Fail unless the session can take a new turn.
    pub fn ensure_open(&self) -> Result<(), DialogueError> {
        if self.closed {
            return Err(DialogueError::SessionClosed);
        }
        Ok(())
    }

    pub fn transition(&mut self, to: VoiceState) -> Result<VoiceState, DialogueError> {
        self.machine.transition(to)
    }

    pub fn reset_state(&mut self) {
        self.machine.reset();
    }

    /// Replace the record with a merged snapshot.
    pub fn set_record(&mut self, record: GoalRecord) {
        self.record = record;
    }

    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.memory.append_turn(turn);
    }

    /// Recompute the step after an AI turn. A summary read-back pins the
    /// step to `Summary` even if a slot is still empty.
    pub fn advance_step(&mut self, verdict: CompletionVerdict) -> DialogueStep {
        self.step = match verdict {
            CompletionVerdict::AwaitingConfirmation => DialogueStep::Summary,
            _ => next_step(&self.record, self.user_name()),
        };
        self.step
    }

    /// Build the completion payload from the current record and transcript.
    pub fn completion_payload(&self) -> GoalCompletion {
        let value = |s: Option<&str>| s.unwrap_or_default().to_string();
        GoalCompletion {
            habit_name: value(self.record.habit_name.as_deref()),
            goal_period: value(self.record.goal_period.as_deref()),
            available_time: value(self.record.available_time.as_deref()),
            difficulty_reason: value(self.record.difficulty_reason.as_deref()),
            intensity: self
                .record
                .intensity
                .map(|i| i.as_str().to_string())
                .unwrap_or_default(),
            transcript: self.memory.transcript(),
            mode: self.mode,
            source: self.source,
            is_voice_complete: true,
        }
    }
}
