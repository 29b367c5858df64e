//! Turn orchestrator: one user utterance in, one AI turn out.
//!
//! The orchestrator exclusively owns the [`DialogueSession`]. Each turn is a
//! short sequential pipeline with two suspension points: the AI request, and
//! (for spoken replies) the host's playback-finished notification. Completion
//! is settled only after the full reply is in hand and, on the voice path,
//! after playback has finished.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::brain::{Brain, LlmProvider};
use crate::config::CoachConfig;
use crate::dialogue::{
    ChatMode, CompletionSource, DialogueCallback, DialogueSession, DialogueStep, GoalCompletion,
    PromptContext, VoiceState, build_system_instruction, next_step,
};
use crate::error::{DialogueError, LlmError};
use crate::goal::{
    CompletionDetector, CompletionVerdict, EntityExtractor, GoalRecord, SummaryStreamFilter,
};
use crate::memory::ConversationTurn;
use crate::types::{CompletionResponse, Content, Message, Role};

use super::types::{AiTurnResult, AudioClip};

/// Placeholder stored as the user turn when a recording has no transcript.
const UNTRANSCRIBED_AUDIO: &str = "(음성 메시지)";

/// One user utterance.
#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    Audio(AudioClip),
}

impl TurnInput {
    fn source(&self) -> CompletionSource {
        match self {
            TurnInput::Text(_) => CompletionSource::Text,
            TurnInput::Audio(_) => CompletionSource::Voice,
        }
    }
}

/// Why a turn was dropped without touching memory or the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    AudioTooShort,
    EmptyInput,
    EmptyReply,
    ReplyTooShort,
}

/// What happened to a submitted turn.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The AI replied and the turn was recorded.
    Replied(AiTurnResult),
    /// Invalid input or reply; nothing was recorded and the user should retry.
    Discarded { reason: DiscardReason },
    /// The AI service failed; the apology was recorded as the AI turn.
    Failed { apology: String },
    /// The session was torn down while the request was in flight.
    Cancelled,
}

/// Drives a dialogue session turn by turn.
pub struct TurnOrchestrator {
    session: DialogueSession,
    brain: Brain,
    callback: Arc<dyn DialogueCallback>,
    config: CoachConfig,
    extractor: &'static EntityExtractor,
    detector: CompletionDetector,
    cancel: CancellationToken,
    /// Detector verdict held back until playback finishes.
    pending_verdict: Option<CompletionVerdict>,
    /// Whether the audio channel has been opened once this session.
    connected: bool,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: CoachConfig,
        mode: ChatMode,
        callback: Arc<dyn DialogueCallback>,
    ) -> Self {
        let brain = Brain::new(provider)
            .with_generation(config.llm.temperature, Some(config.llm.max_tokens))
            .with_response_audio(config.llm.response_audio);
        Self {
            session: DialogueSession::new(mode),
            brain,
            callback,
            config,
            extractor: EntityExtractor::shared(),
            detector: CompletionDetector::new(),
            cancel: CancellationToken::new(),
            pending_verdict: None,
            connected: false,
        }
    }

    /// Start with a known user name, skipping the name step.
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.session.set_user_name(name);
        self
    }

    pub fn session(&self) -> &DialogueSession {
        &self.session
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    /// Token tied to the hosting screen's lifetime. Cancelling it aborts an
    /// in-flight request and closes the session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The question the host can show before the first turn.
    pub fn opening_question(&self) -> &'static str {
        self.session.step().fallback_question()
    }

    async fn set_state(&mut self, to: VoiceState) -> Result<(), DialogueError> {
        let before = self.session.state();
        self.session.transition(to)?;
        if before != to {
            self.callback.on_state_change(to).await;
        }
        Ok(())
    }

    async fn reset_to_idle(&mut self) {
        if self.session.state() != VoiceState::Idle {
            self.session.reset_state();
            self.callback.on_state_change(VoiceState::Idle).await;
        }
    }

    fn ensure_accepting(&mut self) -> Result<(), DialogueError> {
        if self.cancel.is_cancelled() {
            self.session.close();
        }
        self.session.ensure_open()?;
        let state = self.session.state();
        if state.is_busy() {
            return Err(DialogueError::AlreadyBusy {
                state: state.to_string(),
            });
        }
        Ok(())
    }

    /// The recorder opened. The first call of a session passes through
    /// `Connecting` while the host brings up its audio channel.
    pub async fn start_listening(&mut self) -> Result<(), DialogueError> {
        self.ensure_accepting()?;
        if !self.connected {
            self.set_state(VoiceState::Connecting).await?;
            self.connected = true;
        }
        self.set_state(VoiceState::Listening).await
    }

    /// The recorder closed without submitting anything.
    pub async fn cancel_listening(&mut self) -> Result<(), DialogueError> {
        if self.session.state() == VoiceState::Listening {
            self.set_state(VoiceState::Idle).await?;
        }
        Ok(())
    }

    /// Submit one user utterance and run the AI turn.
    pub async fn submit_turn(&mut self, input: TurnInput) -> Result<TurnOutcome, DialogueError> {
        self.ensure_accepting()?;

        let (user_text, user_message, has_transcript) = match &input {
            TurnInput::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(self.discard(DiscardReason::EmptyInput).await);
                }
                (text.to_string(), Message::user(text), true)
            }
            TurnInput::Audio(clip) => {
                if let Err(e) = clip.validate(self.config.voice.min_audio_secs) {
                    info!(error = %e, "Discarding recording");
                    return Ok(self.discard(DiscardReason::AudioTooShort).await);
                }
                let transcript = clip
                    .transcript
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty());
                let mut parts = vec![Content::audio(clip.mime_type.clone(), clip.data.clone())];
                if let Some(t) = transcript {
                    parts.push(Content::text(t));
                }
                (
                    transcript.unwrap_or(UNTRANSCRIBED_AUDIO).to_string(),
                    Message::new(Role::User, Content::MultiPart { parts }),
                    transcript.is_some(),
                )
            }
        };

        self.set_state(VoiceState::Processing).await?;

        // Tentative extraction; committed only with the turn.
        let tentative = if has_transcript {
            self.extractor.extract_turn(&user_text, self.session.record())
        } else {
            self.session.record().clone()
        };
        let tentative_name = match self.session.user_name() {
            None if has_transcript => self.extractor.extract_user_name(&user_text),
            _ => None,
        };

        let instruction = {
            let name = tentative_name.as_deref().or(self.session.user_name());
            let context = self
                .session
                .memory()
                .recent_context(self.config.dialogue.context_turns);
            let ctx = PromptContext {
                record: &tentative,
                user_name: name,
                next_step: next_step(&tentative, name),
                recent_context: &context,
            };
            build_system_instruction(self.session.mode(), &ctx)
        };
        let mut conversation = self
            .session
            .memory()
            .recent_messages(self.config.dialogue.context_turns);
        conversation.push(user_message);

        let cancel = self.cancel.clone();
        let reply = tokio::select! {
            _ = cancel.cancelled() => None,
            reply = Self::request_reply(
                &mut self.brain,
                &self.callback,
                &self.config,
                &instruction,
                &conversation,
            ) => Some(reply),
        };

        let Some(reply) = reply else {
            info!("Turn cancelled while waiting for the AI reply");
            self.session.close();
            self.reset_to_idle().await;
            return Ok(TurnOutcome::Cancelled);
        };

        let response = match reply {
            Ok(response) => response,
            Err(e) => {
                return self
                    .fail_turn(e, user_text, tentative, tentative_name)
                    .await;
            }
        };

        let full_text = response.message.content.joined_text().trim().to_string();
        if full_text.chars().count() < self.config.dialogue.min_reply_chars.max(1) {
            let reason = if full_text.is_empty() {
                DiscardReason::EmptyReply
            } else {
                DiscardReason::ReplyTooShort
            };
            return Ok(self.discard(reason).await);
        }

        self.session.set_source(input.source());
        self.commit_user_turn(user_text, tentative, tentative_name);
        self.finish_ai_turn(full_text, &response).await
    }

    async fn request_reply(
        brain: &mut Brain,
        callback: &Arc<dyn DialogueCallback>,
        config: &CoachConfig,
        instruction: &str,
        conversation: &[Message],
    ) -> Result<CompletionResponse, LlmError> {
        if !config.llm.use_streaming {
            return brain
                .think_with_retry(instruction, conversation, config.llm.max_retries)
                .await;
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let forward_to = callback.clone();
        let forwarder = tokio::spawn(async move {
            let mut filter = SummaryStreamFilter::new();
            while let Some(token) = rx.recv().await {
                let shown = filter.push(&token);
                if !shown.is_empty() {
                    forward_to.on_token(&shown).await;
                }
            }
            let rest = filter.finish();
            if !rest.is_empty() {
                forward_to.on_token(&rest).await;
            }
        });
        let result = brain
            .think_streaming(instruction, conversation, move |token| {
                let _ = tx.send(token.to_string());
            })
            .await;
        let _ = forwarder.await;
        result
    }

    async fn discard(&mut self, reason: DiscardReason) -> TurnOutcome {
        debug!(?reason, "Turn discarded");
        self.reset_to_idle().await;
        TurnOutcome::Discarded { reason }
    }

    fn commit_user_turn(
        &mut self,
        user_text: String,
        record: GoalRecord,
        user_name: Option<String>,
    ) {
        if let Some(name) = user_name {
            debug!(name = %name, "User name captured");
            self.session.set_user_name(name);
        }
        self.session.set_record(record);
        self.session.append_turn(ConversationTurn::user(user_text));
    }

    async fn fail_turn(
        &mut self,
        error: LlmError,
        user_text: String,
        tentative: GoalRecord,
        tentative_name: Option<String>,
    ) -> Result<TurnOutcome, DialogueError> {
        let apology = self.config.dialogue.apology_message.clone();
        self.commit_user_turn(user_text, tentative, tentative_name);
        self.session
            .append_turn(ConversationTurn::model(apology.clone()));

        if error.is_transport() {
            warn!(error = %error, "AI service unavailable; recorded apology");
            self.set_state(VoiceState::Error).await?;
            self.set_state(VoiceState::Idle).await?;
        } else {
            warn!(error = %error, "Unusable AI reply; recorded apology");
            self.reset_to_idle().await;
        }
        Ok(TurnOutcome::Failed { apology })
    }

    async fn finish_ai_turn(
        &mut self,
        full_text: String,
        response: &CompletionResponse,
    ) -> Result<TurnOutcome, DialogueError> {
        let record = self
            .extractor
            .extract_final_summary(&full_text, self.session.record());
        self.session.set_record(record);
        self.session
            .append_turn(ConversationTurn::model(full_text.clone()));

        let verdict = self.detector.classify(&full_text);
        if verdict == CompletionVerdict::Premature {
            debug!("Completion phrase suppressed by plan-generation wording");
        }
        if verdict == CompletionVerdict::Complete {
            let mined = self
                .extractor
                .extract_from_history(&self.session.memory().user_history(), self.session.record());
            self.session.set_record(mined);
        }
        let step = self.session.advance_step(verdict);
        let display = self.extractor.strip_summary_block(&full_text);
        let audio = response
            .message
            .content
            .first_audio()
            .map(|(mime, data)| (mime.to_string(), data.to_vec()));

        info!(
            verdict = %verdict,
            step = %step,
            filled = self.session.record().filled_count(),
            spoken = audio.is_some(),
            "AI turn recorded"
        );

        let (audio_data, mime_type) = match audio {
            Some((mime, data)) => (Some(data), Some(mime)),
            None => (None, None),
        };

        let completed = if audio_data.is_some() {
            self.set_state(VoiceState::Speaking).await?;
            self.pending_verdict = Some(verdict);
            false
        } else {
            let completed = self.settle(verdict).await;
            if self.session.state() != VoiceState::Idle {
                self.set_state(VoiceState::Idle).await?;
            }
            completed
        };

        Ok(TurnOutcome::Replied(AiTurnResult {
            text: display,
            audio_data,
            mime_type,
            verdict,
            step,
            record: self.session.record().clone(),
            completed,
        }))
    }

    /// Settle completion for the latest AI turn; fires the callback when the
    /// goal is complete.
    async fn settle(&mut self, verdict: CompletionVerdict) -> bool {
        let fired = verdict == CompletionVerdict::Complete;
        let mut record = self.session.record().clone();
        let complete = record.settle_completion(fired);
        self.session.set_record(record);
        if fired && !complete {
            let missing = self.session.record().missing_slots();
            info!(?missing, "Completion phrase seen but slots are missing");
        }
        if complete {
            let payload = self.session.completion_payload();
            info!(habit = %payload.habit_name, "Goal complete");
            self.callback.on_complete(&payload).await;
            self.session.close();
        }
        complete
    }

    /// The host finished playing the spoken reply.
    ///
    /// Returns the completion payload when this turn completed the goal.
    pub async fn playback_finished(&mut self) -> Result<Option<GoalCompletion>, DialogueError> {
        if self.session.state() != VoiceState::Speaking {
            return Err(DialogueError::InvalidStateTransition {
                from: self.session.state().to_string(),
                to: VoiceState::Idle.to_string(),
            });
        }
        let verdict = self
            .pending_verdict
            .take()
            .unwrap_or(CompletionVerdict::Continue);
        let completed = self.settle(verdict).await;
        self.set_state(VoiceState::Idle).await?;
        Ok(completed.then(|| self.session.completion_payload()))
    }

    /// The hosting screen is closing: abort any request, drop the pending
    /// playback and close the session. Partial turns are not submitted.
    pub async fn teardown(&mut self) {
        self.cancel.cancel();
        self.pending_verdict = None;
        self.session.close();
        self.reset_to_idle().await;
        debug!(session = %self.session.id(), "Dialogue session torn down");
    }

    /// The step the next user turn answers.
    pub fn current_step(&self) -> DialogueStep {
        self.session.step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::dialogue::RecordingCallback;

    fn orchestrator(
        provider: Arc<MockLlmProvider>,
        callback: Arc<RecordingCallback>,
    ) -> TurnOrchestrator {
        let mut config = CoachConfig::default();
        config.llm.max_retries = 0;
        TurnOrchestrator::new(provider, config, ChatMode::GoalSetting, callback)
            .with_user_name("김철수")
    }

    #[tokio::test]
    async fn test_text_turn_extracts_and_records() {
        let provider = Arc::new(MockLlmProvider::with_responses(&[
            "좋아요! 언제 하실 수 있나요?",
        ]));
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider.clone(), callback.clone());

        let outcome = orch
            .submit_turn(TurnInput::Text("삼개월 동안 매일 운동하기".into()))
            .await
            .unwrap();
        let TurnOutcome::Replied(result) = outcome else {
            panic!("expected a reply");
        };
        assert_eq!(result.text, "좋아요! 언제 하실 수 있나요?");
        assert_eq!(result.record.goal_period.as_deref(), Some("3개월"));
        assert_eq!(result.step, DialogueStep::PeriodTime);
        assert!(!result.completed);
        assert_eq!(orch.session().memory().len(), 2);
        assert_eq!(orch.session().state(), VoiceState::Idle);
        assert_eq!(
            callback.states().await,
            vec![VoiceState::Processing, VoiceState::Idle]
        );

        let request = provider.last_request().unwrap();
        assert_eq!(request.messages[0].role, Role::System);
        assert!(
            request.messages[0]
                .content
                .joined_text()
                .contains("- 기간: 3개월")
        );
    }

    #[tokio::test]
    async fn test_short_audio_is_discarded() {
        let provider = Arc::new(MockLlmProvider::new());
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider.clone(), callback);
        orch.start_listening().await.unwrap();

        let clip = AudioClip::from_samples(&[0.0; 3200], 16000)
            .unwrap()
            .with_transcript("운동");
        let outcome = orch.submit_turn(TurnInput::Audio(clip)).await.unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Discarded {
                reason: DiscardReason::AudioTooShort
            }
        ));
        assert!(orch.session().memory().is_empty());
        assert_eq!(orch.session().record(), &GoalRecord::new());
        assert_eq!(orch.session().state(), VoiceState::Idle);
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_too_short_reply_is_discarded() {
        let provider = Arc::new(MockLlmProvider::with_responses(&["네"]));
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider, callback);

        let outcome = orch
            .submit_turn(TurnInput::Text("매일 독서하고 싶어요".into()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Discarded {
                reason: DiscardReason::ReplyTooShort
            }
        ));
        assert!(orch.session().memory().is_empty());
        assert_eq!(orch.session().record().habit_name, None);
        assert_eq!(orch.current_step(), DialogueStep::Goal);
    }

    #[tokio::test]
    async fn test_transport_failure_records_apology() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::Connection {
            message: "unreachable".into(),
        });
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider, callback.clone());

        let outcome = orch
            .submit_turn(TurnInput::Text("안녕하세요".into()))
            .await
            .unwrap();
        let TurnOutcome::Failed { apology } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(apology, crate::config::DEFAULT_APOLOGY);
        let turns = orch.session().memory().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text, apology);
        assert_eq!(
            callback.states().await,
            vec![VoiceState::Processing, VoiceState::Error, VoiceState::Idle]
        );
    }

    #[tokio::test]
    async fn test_empty_response_error_returns_to_idle_without_error_state() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::EmptyResponse);
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider, callback.clone());

        let outcome = orch
            .submit_turn(TurnInput::Text("안녕하세요".into()))
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed { .. }));
        assert!(!callback.states().await.contains(&VoiceState::Error));
        assert_eq!(orch.session().state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_empty_text_is_discarded() {
        let provider = Arc::new(MockLlmProvider::new());
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider.clone(), callback);
        let outcome = orch.submit_turn(TurnInput::Text("   ".into())).await.unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Discarded {
                reason: DiscardReason::EmptyInput
            }
        ));
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_turns() {
        let provider = Arc::new(MockLlmProvider::new());
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider, callback);
        orch.teardown().await;
        let err = orch
            .submit_turn(TurnInput::Text("안녕".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::SessionClosed));
    }

    #[tokio::test]
    async fn test_playback_finished_requires_speaking() {
        let provider = Arc::new(MockLlmProvider::new());
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider, callback);
        assert!(matches!(
            orch.playback_finished().await,
            Err(DialogueError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_listening() {
        let provider = Arc::new(MockLlmProvider::new());
        let callback = Arc::new(RecordingCallback::new());
        let mut orch = orchestrator(provider, callback.clone());
        orch.start_listening().await.unwrap();
        orch.cancel_listening().await.unwrap();
        orch.start_listening().await.unwrap();
        orch.cancel_listening().await.unwrap();
        assert_eq!(orch.session().state(), VoiceState::Idle);
        assert_eq!(
            callback.states().await,
            vec![
                VoiceState::Connecting,
                VoiceState::Listening,
                VoiceState::Idle,
                VoiceState::Listening,
                VoiceState::Idle,
            ]
        );
    }
}
