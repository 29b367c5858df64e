//! Configuration system for habitcoach.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/habitcoach/config.toml` and/or
//! `.habitcoach/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::dialogue::prompt::ChatMode;
use crate::error::ConfigError;

/// Apology shown when the model service cannot be reached.
pub const DEFAULT_APOLOGY: &str = "죄송해요, 지금은 답변을 드리기 어려워요. 잠시 후 다시 말씀해 주세요.";

/// Top-level configuration for the coach.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachConfig {
    pub llm: LlmConfig,
    pub dialogue: DialogueConfig,
    pub voice: VoiceConfig,
    pub typewriter: TypewriterConfig,
}

impl CoachConfig {
    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.dialogue.validate());
        warnings
    }
}

/// Model service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "gemini" or "mock".
    pub provider: String,
    /// Model identifier (e.g., "gemini-2.0-flash").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// API key provided directly (takes precedence over the env var).
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Temperature for generation.
    pub temperature: f32,
    /// Whether to stream replies token by token.
    pub use_streaming: bool,
    /// Ask the model for a spoken reply alongside the text.
    pub response_audio: bool,
    /// Retries for transient failures before giving up on a turn.
    pub max_retries: usize,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 1024,
            temperature: 0.7,
            use_streaming: false,
            response_audio: false,
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid. Problems are reported as
    /// human-readable warnings, never as errors.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; the model cannot reply".to_string());
        }
        if !matches!(self.provider.as_str(), "gemini" | "mock") {
            warnings.push(format!(
                "unknown provider '{}'; expected 'gemini' or 'mock'",
                self.provider
            ));
        }
        warnings
    }
}

/// Conversation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// How many recent turns are rendered into the model context.
    pub context_turns: usize,
    /// Replies shorter than this (in characters) are discarded.
    pub min_reply_chars: usize,
    /// Fixed message recorded when the model service fails.
    pub apology_message: String,
    /// Mode used when the host does not choose one.
    pub default_mode: ChatMode,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            context_turns: 6,
            min_reply_chars: 3,
            apology_message: DEFAULT_APOLOGY.to_string(),
            default_mode: ChatMode::GoalSetting,
        }
    }
}

impl DialogueConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.context_turns == 0 {
            warnings.push("context_turns is 0; the model will not see prior turns".to_string());
        }
        if self.apology_message.trim().is_empty() {
            warnings.push("apology_message is empty".to_string());
        }
        warnings
    }
}

/// Audio input handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Recordings shorter than this are treated as accidental taps.
    pub min_audio_secs: f32,
    /// Sample rate used when encoding raw samples to WAV.
    pub sample_rate: u32,
    /// MIME type attached to encoded recordings.
    pub input_mime_type: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            min_audio_secs: 0.5,
            sample_rate: 16000,
            input_mime_type: "audio/wav".to_string(),
        }
    }
}

/// Typewriter presentation speed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypewriterConfig {
    /// Delay between revealed characters, in milliseconds.
    pub speed_ms: u64,
}

impl Default for TypewriterConfig {
    fn default() -> Self {
        Self { speed_ms: 30 }
    }
}

/// Load configuration with layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `HABITCOACH_`)
/// 3. Workspace-local config (`.habitcoach/config.toml`)
/// 4. User config (`~/.config/habitcoach/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&CoachConfig>,
) -> Result<CoachConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(CoachConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "habitcoach", "habitcoach") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".habitcoach").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // HABITCOACH_LLM__MODEL, HABITCOACH_DIALOGUE__CONTEXT_TURNS, etc.
    figment = figment.merge(Env::prefixed("HABITCOACH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "habitcoach", "habitcoach")
        && config_dir.config_dir().join("config.toml").exists()
    {
        return true;
    }

    if let Some(ws) = workspace
        && ws.join(".habitcoach").join("config.toml").exists()
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoachConfig::default();
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.llm.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.dialogue.context_turns, 6);
        assert_eq!(config.dialogue.min_reply_chars, 3);
        assert!((config.voice.min_audio_secs - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.typewriter.speed_ms, 30);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = CoachConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: CoachConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.dialogue.default_mode, ChatMode::GoalSetting);
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut config = CoachConfig::default();
        config.llm.api_key = Some("secret-key".into());
        let toml_str = config.to_toml().unwrap();
        assert!(!toml_str.contains("secret-key"));
    }

    #[test]
    fn test_load_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.dialogue.min_reply_chars, 3);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = CoachConfig::default();
        overrides.llm.provider = "mock".into();
        overrides.typewriter.speed_ms = 5;
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.llm.provider, "mock");
        assert_eq!(config.typewriter.speed_ms, 5);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".habitcoach");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            r#"
[llm]
model = "gemini-2.5-flash"
response_audio = true

[dialogue]
context_turns = 5
default_mode = "report"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert!(config.llm.response_audio);
        assert_eq!(config.dialogue.context_turns, 5);
        assert_eq!(config.dialogue.default_mode, ChatMode::Report);
        assert_eq!(config.llm.provider, "gemini");
        assert!(config_exists(Some(dir.path())));
    }

    #[test]
    fn test_llm_config_validate_defaults_clean() {
        assert!(LlmConfig::default().validate().is_empty());
    }

    #[test]
    fn test_llm_config_validate_bad_values() {
        let config = LlmConfig {
            temperature: 3.5,
            provider: "openai".into(),
            ..Default::default()
        };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("temperature"));
        assert!(warnings[1].contains("openai"));
    }

    #[test]
    fn test_dialogue_config_validate() {
        let config = DialogueConfig {
            context_turns: 0,
            apology_message: " ".into(),
            ..Default::default()
        };
        assert_eq!(config.validate().len(), 2);
    }
}
