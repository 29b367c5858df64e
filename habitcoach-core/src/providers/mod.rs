//! LLM provider implementations.
//!
//! Provides the Google Gemini implementation of the `LlmProvider` trait.
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod gemini;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use gemini::GeminiProvider;

/// Create an LLM provider based on the configuration.
///
/// - `"gemini"` -> `GeminiProvider` (API key from config or environment)
/// - `"mock"` -> `MockLlmProvider` with its default coaching reply
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "gemini" => {
            let provider = GeminiProvider::new(config)?;
            tracing::info!(model = %config.model, "Using Gemini provider");
            Ok(Arc::new(provider))
        }
        "mock" => {
            tracing::info!("Using mock provider");
            Ok(Arc::new(MockLlmProvider::new()))
        }
        other => Err(LlmError::ApiRequest {
            message: format!("Unsupported provider '{}'", other),
        }),
    }
}
