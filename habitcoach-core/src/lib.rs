//! # Habitcoach Core
//!
//! Core library for the habitcoach goal-setting coach.
//! Turns a spoken or typed Korean conversation with a generative model into a
//! structured habit goal: entity extraction, completion detection, the
//! dialogue state overlay, turn orchestration and the model client.

pub mod brain;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod goal;
pub mod memory;
pub mod providers;
pub mod typewriter;
pub mod types;
pub mod voice;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{CoachConfig, load_config};
pub use dialogue::{
    ChatMode, CompletionSource, DialogueCallback, DialogueSession, DialogueStep, GoalCompletion,
    NoOpCallback, VoiceState,
};
pub use error::{CoachError, ConfigError, DialogueError, LlmError, Result, VoiceError};
pub use goal::{CompletionDetector, CompletionVerdict, EntityExtractor, GoalRecord, GoalSlot, Intensity};
pub use memory::{ConversationMemory, ConversationTurn, TurnRole};
pub use providers::create_provider;
pub use typewriter::{Typewriter, TypewriterHandle};
pub use types::{CompletionRequest, CompletionResponse, Content, Message, Role, StreamEvent, TokenUsage};
pub use voice::{AiTurnResult, AudioClip, DiscardReason, TurnInput, TurnOrchestrator, TurnOutcome};
