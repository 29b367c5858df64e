//! Dialogue flow: technical states, the content step overlay, system
//! instructions and the session that owns them.

pub mod prompt;
pub mod session;
pub mod state;
pub mod steps;

pub use prompt::{ChatMode, PromptContext, build_system_instruction};
pub use session::{
    CompletionSource, DialogueCallback, DialogueSession, GoalCompletion, NoOpCallback,
    RecordingCallback,
};
pub use state::{StateTransition, VoiceState, VoiceStateMachine};
pub use steps::{DialogueStep, next_step};
