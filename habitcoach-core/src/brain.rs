//! Brain module: model provider abstraction and interaction.
//!
//! Defines the `LlmProvider` trait that the turn orchestrator talks to, a
//! scriptable `MockLlmProvider`, and the `Brain` wrapper that prepends the
//! system instruction, retries transient failures and tracks usage.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Content, Message, Role, StreamEvent, TokenUsage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Trait for model providers, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Perform a streaming completion, sending events to the channel.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Whether this provider can return spoken replies.
    fn supports_audio(&self) -> bool {
        false
    }
}

/// The Brain wraps a provider and adds prompt assembly, retries and usage tracking.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: Option<usize>,
    response_audio: bool,
    total_usage: TokenUsage,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            temperature: 0.7,
            max_tokens: None,
            response_audio: false,
            total_usage: TokenUsage::default(),
        }
    }

    /// Set generation parameters used for every request.
    pub fn with_generation(mut self, temperature: f32, max_tokens: Option<usize>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Request spoken replies when the provider supports them.
    pub fn with_response_audio(mut self, enabled: bool) -> Self {
        self.response_audio = enabled && self.provider.supports_audio();
        self
    }

    /// Construct messages for the model with the system instruction prepended.
    pub fn build_messages(&self, system_instruction: &str, conversation: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(system_instruction));
        messages.extend(
            conversation
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        messages
    }

    fn build_request(&self, system_instruction: &str, conversation: &[Message]) -> CompletionRequest {
        CompletionRequest {
            messages: self.build_messages(system_instruction, conversation),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
            response_audio: self.response_audio,
        }
    }

    /// Send a completion request and return the response, tracking usage.
    pub async fn think(
        &mut self,
        system_instruction: &str,
        conversation: &[Message],
    ) -> Result<CompletionResponse, LlmError> {
        let request = self.build_request(system_instruction, conversation);

        debug!(
            model = self.provider.model_name(),
            messages = request.messages.len(),
            response_audio = request.response_audio,
            "Sending completion request"
        );

        let response = self.provider.complete(request).await?;
        self.total_usage.accumulate(&response.usage);

        info!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );

        Ok(response)
    }

    /// Send a completion request with retry logic and exponential backoff.
    ///
    /// Retries retryable errors up to `max_retries` times with exponential
    /// backoff (1s, 2s, 4s, ..., capped at 32s). Other errors return immediately.
    pub async fn think_with_retry(
        &mut self,
        system_instruction: &str,
        conversation: &[Message],
        max_retries: usize,
    ) -> Result<CompletionResponse, LlmError> {
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match self.think(system_instruction, conversation).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let backoff_secs = std::cmp::min(1u64 << attempt, 32);
                    let wait = match &e {
                        LlmError::RateLimited { retry_after_secs } => {
                            std::cmp::max(*retry_after_secs, backoff_secs)
                        }
                        _ => backoff_secs,
                    };
                    info!(
                        attempt = attempt + 1,
                        max_retries,
                        backoff_secs = wait,
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(LlmError::Connection {
            message: "Max retries exceeded".to_string(),
        }))
    }

    /// Stream a completion, forwarding text tokens to `on_token`, and return
    /// the assembled reply once the stream is done.
    ///
    /// Nothing downstream sees the reply until the `Done` event arrives, so a
    /// truncated stream never reaches extraction or completion detection.
    pub async fn think_streaming<F>(
        &mut self,
        system_instruction: &str,
        conversation: &[Message],
        mut on_token: F,
    ) -> Result<CompletionResponse, LlmError>
    where
        F: FnMut(&str) + Send,
    {
        let request = self.build_request(system_instruction, conversation);
        let (tx, mut rx) = mpsc::channel(64);
        let provider = self.provider.clone();
        let producer = tokio::spawn(async move { provider.complete_streaming(request, tx).await });

        let mut text = String::new();
        let mut audio: Option<(String, Vec<u8>)> = None;
        let mut usage = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    on_token(&token);
                    text.push_str(&token);
                }
                StreamEvent::Audio { mime_type, data } => match audio.as_mut() {
                    Some((_, buf)) => buf.extend_from_slice(&data),
                    None => audio = Some((mime_type, data)),
                },
                StreamEvent::Done { usage: u } => {
                    usage = Some(u);
                    break;
                }
                StreamEvent::Error(message) => return Err(LlmError::Streaming { message }),
            }
        }

        producer.await.map_err(|e| LlmError::Streaming {
            message: format!("stream task failed: {}", e),
        })??;

        let usage = usage.ok_or_else(|| LlmError::Streaming {
            message: "stream ended before completion".to_string(),
        })?;
        self.total_usage.accumulate(&usage);

        let content = match audio {
            Some((mime_type, data)) => Content::MultiPart {
                parts: vec![Content::text(text), Content::audio(mime_type, data)],
            },
            None => Content::text(text),
        };

        Ok(CompletionResponse {
            message: Message::new(Role::Assistant, content),
            usage,
            model: self.provider.model_name().to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    /// Get total token usage across all calls.
    pub fn total_usage(&self) -> &TokenUsage {
        &self.total_usage
    }

    /// Get the model name.
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

/// A scripted outcome for the mock provider.
enum MockOutcome {
    Response(CompletionResponse),
    Failure(LlmError),
}

/// A mock provider for testing and offline use.
pub struct MockLlmProvider {
    model: String,
    outcomes: std::sync::Mutex<Vec<MockOutcome>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            outcomes: std::sync::Mutex::new(Vec::new()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that returns the given texts in order.
    pub fn with_responses(texts: &[&str]) -> Self {
        let provider = Self::new();
        for text in texts {
            provider.queue_response(Self::text_response(text));
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.outcomes
            .lock()
            .unwrap()
            .push(MockOutcome::Response(response));
    }

    /// Queue a failure to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.outcomes.lock().unwrap().push(MockOutcome::Failure(error));
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The most recent request received, if any.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a text-plus-audio response for testing the voice path.
    pub fn voice_response(text: &str, mime_type: &str, audio: Vec<u8>) -> CompletionResponse {
        CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::MultiPart {
                    parts: vec![Content::text(text), Content::audio(mime_type, audio)],
                },
            ),
            usage: TokenUsage {
                input_tokens: 120,
                output_tokens: 80,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return Ok(MockLlmProvider::text_response(
                "좋아요! 조금 더 자세히 이야기해 주시겠어요?",
            ));
        }
        match outcomes.remove(0) {
            MockOutcome::Response(response) => Ok(response),
            MockOutcome::Failure(error) => Err(error),
        }
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let response = self.complete(request).await?;
        let text = response.message.content.joined_text();
        for piece in text.split_inclusive(' ') {
            let _ = tx.send(StreamEvent::Token(piece.to_string())).await;
        }
        if let Some((mime_type, data)) = response.message.content.first_audio() {
            let _ = tx
                .send(StreamEvent::Audio {
                    mime_type: mime_type.to_string(),
                    data: data.to_vec(),
                })
                .await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: response.usage,
            })
            .await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_audio(&self) -> bool {
        true
    }
}
