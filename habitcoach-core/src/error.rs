//! Error types for the habitcoach core.
//!
//! Uses `thiserror` for public API error types with structured variants covering
//! the model service, dialogue flow, audio input and configuration domains.
//!
//! Nothing here is fatal to a hosting screen: the orchestrator converts these
//! into "ask again" outcomes. The types exist so that each layer can decide
//! which of those outcomes applies.

/// Top-level error type for the habitcoach core library.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Dialogue error: {0}")]
    Dialogue(#[from] DialogueError),

    #[error("Voice error: {0}")]
    Voice(#[from] VoiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the generative model service.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Model returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Whether the failure happened below the level of a readable reply
    /// (service unreachable, non-success status, broken stream).
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            LlmError::ResponseParse { .. } | LlmError::EmptyResponse
        )
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Timeout { .. }
                | LlmError::Connection { .. }
                | LlmError::Streaming { .. }
        )
    }
}

/// Errors from the dialogue session and its state machine.
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error("A turn is already in progress (state: {state})")]
    AlreadyBusy { state: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Dialogue session is closed")]
    SessionClosed,

    #[error("Turn was cancelled")]
    Cancelled,
}

/// Errors from audio input handling.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("Recording too short: {duration_secs:.2}s (minimum {min_secs:.2}s)")]
    AudioTooShort { duration_secs: f32, min_secs: f32 },

    #[error("Recording contains no audio data")]
    EmptyAudio,

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `CoachError`.
pub type Result<T> = std::result::Result<T, CoachError>;
