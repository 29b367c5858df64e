//! Completion detection on full AI turns.
//!
//! Must only be fed complete replies. A streamed fragment can end halfway
//! through a phrase, so the orchestrator runs this after the reply (and, on the
//! voice path, its playback) is finished.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Any one of these is sufficient to end the conversation.
const COMPLETION_PHRASES: &[&str] = &["루틴을 만들어드릴게요", "루틴을 만들어 드릴게요", "홈에서 봐요!"];

/// Pairs that signal completion when both halves appear.
const COMPLETION_PAIRS: &[(&str, &str)] = &[
    ("와! 좋아요!", "루틴을 만들어드릴게요"),
    ("잠시만 기다려 주세요", "루틴을 만들어 드릴게요"),
];

/// The model is describing intermediate plan generation. Overrides any
/// completion phrase in the same reply.
const PREMATURE_PHRASES: &[&str] = &[
    "프로젝트를 만들",
    "계획을 생성",
    "운동 계획",
    "달성 계획",
    "생성 계획",
    "목표를 설정",
    "습관을 만들",
];

static SUMMARY_CONFIRMATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)정리해\s*볼게요.*맞(?:나요|죠|을까요)\s*\?")
        .expect("summary confirmation pattern is valid")
});

/// What a full AI turn means for the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionVerdict {
    /// A completion phrase with no premature-generation phrase.
    Complete,
    /// A completion phrase suppressed by a premature-generation phrase.
    Premature,
    /// The model read the summary back and asked the user to confirm.
    AwaitingConfirmation,
    Continue,
}

impl std::fmt::Display for CompletionVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CompletionVerdict::Complete => "complete",
            CompletionVerdict::Premature => "premature",
            CompletionVerdict::AwaitingConfirmation => "awaiting_confirmation",
            CompletionVerdict::Continue => "continue",
        };
        f.write_str(label)
    }
}

/// Phrase-table completion detector.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    phrases: Vec<&'static str>,
    pairs: Vec<(&'static str, &'static str)>,
    premature: Vec<&'static str>,
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self {
            phrases: COMPLETION_PHRASES.to_vec(),
            pairs: COMPLETION_PAIRS.to_vec(),
            premature: PREMATURE_PHRASES.to_vec(),
        }
    }
}

impl CompletionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_positive(&self, text: &str) -> bool {
        self.phrases.iter().any(|p| text.contains(p))
            || self
                .pairs
                .iter()
                .any(|(a, b)| text.contains(a) && text.contains(b))
    }

    /// The first premature-generation phrase present in `text`.
    pub fn premature_phrase(&self, text: &str) -> Option<&'static str> {
        self.premature.iter().copied().find(|p| text.contains(p))
    }

    /// Whether the reply ends the conversation.
    pub fn is_complete(&self, text: &str) -> bool {
        self.classify(text) == CompletionVerdict::Complete
    }

    /// Whether the reply reads the summary back for confirmation
    /// (`정리해볼게요 ... 맞나요?`).
    pub fn is_summary_confirmation(&self, text: &str) -> bool {
        SUMMARY_CONFIRMATION_RE.is_match(text)
    }

    pub fn classify(&self, text: &str) -> CompletionVerdict {
        if self.has_positive(text) {
            if self.premature_phrase(text).is_some() {
                return CompletionVerdict::Premature;
            }
            return CompletionVerdict::Complete;
        }
        if self.is_summary_confirmation(text) {
            return CompletionVerdict::AwaitingConfirmation;
        }
        CompletionVerdict::Continue
    }
}
