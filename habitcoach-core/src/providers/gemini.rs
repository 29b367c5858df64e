//! Google Gemini API provider implementation.
//!
//! Implements the `LlmProvider` trait for the native Google Gemini API, with
//! both synchronous and streaming completions.
//!
//! Key differences from OpenAI-compatible APIs:
//! - Auth via `?key=API_KEY` query parameter (not header-based)
//! - System instruction is a top-level `system_instruction` field
//! - Roles are `"user"` / `"model"` (not `"assistant"`)
//! - Recorded speech travels as base64 `inline_data` parts; spoken replies
//!   come back as `inlineData` parts
//! - Streaming uses `?alt=sse` query parameter

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Content, Message, Role, StreamEvent, TokenUsage,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration.
    ///
    /// Uses `config.api_key` when set, otherwise reads the environment variable
    /// named by `config.api_key_env`. Returns `LlmError::AuthFailed` if neither
    /// is available.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!("Gemini (env var '{}' not set)", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new Gemini provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
        })
    }

    /// Build the JSON request body for the Gemini API.
    ///
    /// System messages become the top-level `system_instruction` field. All
    /// other messages are converted to Gemini's `contents` format.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(1024);

        let (system_text, non_system_messages) =
            Self::extract_system_instruction(&request.messages);

        let raw_contents: Vec<Value> = non_system_messages
            .iter()
            .map(|msg| Self::message_to_gemini_json(msg))
            .collect();
        let contents = Self::fix_gemini_turns(raw_contents);

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": request.temperature,
            },
        });

        if request.response_audio {
            body["generationConfig"]["responseModalities"] = serde_json::json!(["TEXT", "AUDIO"]);
        }

        if let Some(system) = &system_text {
            body["system_instruction"] = serde_json::json!({
                "parts": [{"text": system}]
            });
        }

        body
    }

    /// Extract system messages from the messages list.
    ///
    /// Returns a tuple of (optional concatenated system text, non-system messages).
    fn extract_system_instruction(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            if msg.role == Role::System {
                system_parts.push(msg.content.joined_text());
            } else {
                non_system.push(msg);
            }
        }

        let system_text = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system_text, non_system)
    }

    /// Convert a single `Message` to Gemini JSON format.
    fn message_to_gemini_json(msg: &Message) -> Value {
        let role = match msg.role {
            Role::User | Role::System => "user",
            Role::Assistant => "model",
        };

        serde_json::json!({
            "role": role,
            "parts": Self::content_to_gemini_parts(&msg.content),
        })
    }

    /// Convert a `Content` enum to a Gemini parts array.
    fn content_to_gemini_parts(content: &Content) -> Value {
        match content {
            Content::Text { text } => serde_json::json!([{"text": text}]),
            Content::Audio { mime_type, data } => serde_json::json!([{
                "inline_data": {
                    "mime_type": mime_type,
                    "data": STANDARD.encode(data),
                }
            }]),
            Content::MultiPart { parts } => {
                let gemini_parts: Vec<Value> = parts
                    .iter()
                    .flat_map(|part| match Self::content_to_gemini_parts(part) {
                        Value::Array(arr) => arr,
                        other => vec![other],
                    })
                    .collect();
                Value::Array(gemini_parts)
            }
        }
    }

    /// Post-process Gemini contents to satisfy API sequencing rules:
    /// 1. Filter out turns with empty parts arrays
    /// 2. Merge consecutive same-role turns
    /// 3. Ensure the first message has `"user"` role
    fn fix_gemini_turns(contents: Vec<Value>) -> Vec<Value> {
        let mut merged: Vec<Value> = Vec::with_capacity(contents.len());
        for entry in contents {
            let has_parts = entry["parts"].as_array().is_some_and(|p| !p.is_empty());
            if !has_parts {
                continue;
            }
            let role = entry["role"].as_str().unwrap_or("").to_string();
            match merged.last_mut() {
                Some(last) if last["role"].as_str() == Some(role.as_str()) => {
                    if let (Some(existing), Some(new)) =
                        (last["parts"].as_array_mut(), entry["parts"].as_array())
                    {
                        existing.extend(new.iter().cloned());
                    }
                }
                _ => merged.push(entry),
            }
        }

        if merged
            .first()
            .is_some_and(|first| first["role"].as_str() == Some("model"))
        {
            merged.insert(
                0,
                serde_json::json!({"role": "user", "parts": [{"text": "(대화 시작)"}]}),
            );
        }

        merged
    }

    /// Parse a Gemini API response JSON into a `CompletionResponse`.
    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let candidates = body["candidates"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'candidates' array in response".to_string(),
            })?;

        let candidate = candidates.first().ok_or(LlmError::EmptyResponse)?;
        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'parts' array in candidate content".to_string(),
            })?;

        let parsed_content = Self::parse_parts(parts)?;
        let finish_reason = candidate["finishReason"].as_str().map(|s| s.to_string());
        let usage = Self::parse_usage(&body["usageMetadata"]);
        let model = body["modelVersion"]
            .as_str()
            .unwrap_or("gemini")
            .to_string();

        Ok(CompletionResponse {
            message: Message::new(Role::Assistant, parsed_content),
            usage,
            model,
            finish_reason,
        })
    }

    fn parse_usage(usage_metadata: &Value) -> TokenUsage {
        TokenUsage {
            input_tokens: usage_metadata["promptTokenCount"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        }
    }

    /// Decode one `inlineData` part.
    fn parse_inline_data(inline: &Value) -> Result<(String, Vec<u8>), LlmError> {
        let mime_type = inline["mimeType"]
            .as_str()
            .or_else(|| inline["mime_type"].as_str())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = STANDARD
            .decode(inline["data"].as_str().unwrap_or_default())
            .map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid base64 in inline audio: {}", e),
            })?;
        Ok((mime_type, data))
    }

    /// Parse an array of Gemini parts into a `Content` value.
    fn parse_parts(parts: &[Value]) -> Result<Content, LlmError> {
        let mut content_parts: Vec<Content> = Vec::new();

        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                content_parts.push(Content::text(text));
            } else if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
                let (mime_type, data) = Self::parse_inline_data(inline)?;
                content_parts.push(Content::audio(mime_type, data));
            } else {
                debug!(?part, "Ignoring unknown Gemini part type");
            }
        }

        if content_parts.len() == 1 {
            return Ok(content_parts.remove(0));
        }
        if content_parts.is_empty() {
            return Ok(Content::text(""));
        }
        Ok(Content::MultiPart {
            parts: content_parts,
        })
    }

    /// Map an HTTP status code to the appropriate `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            408 | 504 => LlmError::Timeout { timeout_secs: 0 },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    /// Build the endpoint URL for a Gemini API call.
    fn endpoint_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    /// Process a parsed SSE event and send the appropriate `StreamEvent` on the channel.
    async fn process_stream_chunk(
        data: &Value,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Option<TokenUsage>, LlmError> {
        let candidates = match data["candidates"].as_array() {
            Some(c) if !c.is_empty() => c,
            _ => return Ok(None),
        };

        if let Some(parts) = candidates[0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    if !text.is_empty() {
                        let _ = tx.send(StreamEvent::Token(text.to_string())).await;
                    }
                } else if let Some(inline) = part.get("inlineData") {
                    let (mime_type, data) = Self::parse_inline_data(inline)?;
                    let _ = tx.send(StreamEvent::Audio { mime_type, data }).await;
                }
            }
        }

        let usage_metadata = &data["usageMetadata"];
        if usage_metadata.is_object() {
            return Ok(Some(Self::parse_usage(usage_metadata)));
        }

        Ok(None)
    }

    async fn handle_sse_line(
        line: &str,
        tx: &mpsc::Sender<StreamEvent>,
        total_usage: &mut TokenUsage,
    ) -> Result<(), LlmError> {
        let Some(data_str) = line.strip_prefix("data: ") else {
            return Ok(());
        };
        match serde_json::from_str::<Value>(data_str) {
            Ok(data_json) => {
                if let Some(usage) = Self::process_stream_chunk(&data_json, tx).await? {
                    *total_usage = usage;
                }
            }
            Err(e) => {
                let preview: String = data_str.chars().take(200).collect();
                warn!(
                    error = %e,
                    data_preview = preview.as_str(),
                    "Failed to parse Gemini SSE JSON chunk"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    /// Perform a full (non-streaming) completion via the Gemini API.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = self.build_request_body(&request);
        let url = self.endpoint_url(model, "generateContent");

        debug!(model, "Sending Gemini completion request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    LlmError::Connection {
                        message: e.to_string(),
                    }
                } else {
                    LlmError::ApiRequest {
                        message: format!("Request to Gemini API failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }

    /// Perform a streaming completion via the `streamGenerateContent` endpoint.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = self.build_request_body(&request);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        );

        debug!(model, "Sending Gemini streaming request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest {
                message: format!("Streaming request to Gemini API failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let mut byte_stream = response.bytes_stream();
        let mut total_usage = TokenUsage::default();
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| LlmError::Streaming {
                message: format!("Failed to read streaming chunk: {}", e),
            })?;
            line_buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].trim().to_string();
                line_buffer = line_buffer[newline_pos + 1..].to_string();
                if line.is_empty() || line.starts_with("event:") {
                    continue;
                }
                Self::handle_sse_line(&line, &tx, &mut total_usage).await?;
            }
        }

        let remaining = line_buffer.trim().to_string();
        if !remaining.is_empty() {
            Self::handle_sse_line(&remaining, &tx, &mut total_usage).await?;
        }

        let _ = tx.send(StreamEvent::Done { usage: total_usage }).await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_audio(&self) -> bool {
        true
    }
}
