//! Voice and text turn handling.
//!
//! [`TurnOrchestrator`] runs one user utterance (a recorded clip or typed
//! text) through the AI request, extraction and completion settling. Audio
//! capture and playback belong to the host; this module only sees encoded
//! clips and reports when a spoken reply is waiting to be played.

pub mod orchestrator;
pub mod types;

pub use orchestrator::{DiscardReason, TurnInput, TurnOrchestrator, TurnOutcome};
pub use types::{AiTurnResult, AudioClip, decode_wav_duration};
