//! Integration tests for the turn orchestrator.
//!
//! These drive full goal-setting conversations through MockLlmProvider,
//! covering the text path, the voice path with deferred completion, and the
//! discard and failure paths.

use async_trait::async_trait;
use habitcoach_core::brain::{LlmProvider, MockLlmProvider};
use habitcoach_core::config::CoachConfig;
use habitcoach_core::dialogue::{
    ChatMode, CompletionSource, DialogueStep, RecordingCallback, VoiceState,
};
use habitcoach_core::error::{DialogueError, LlmError};
use habitcoach_core::goal::{CompletionVerdict, GoalRecord, GoalSlot, Intensity};
use habitcoach_core::types::{CompletionRequest, CompletionResponse, StreamEvent};
use habitcoach_core::voice::{AudioClip, DiscardReason, TurnInput, TurnOrchestrator, TurnOutcome};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SUMMARY_REPLY: &str = "정리해볼게요! 김철수님은 저녁 9시에 운동하기로 했어요. 맞나요?\n\
목표: 매일 운동하기\n\
기간: 3개월\n\
시간: 저녁 9시\n\
어려운 점: 자꾸 까먹어요\n\
강도: 보통";

const COMPLETION_REPLY: &str = "와! 좋아요! 루틴을 만들어드릴게요. 홈에서 봐요!";

fn test_config() -> CoachConfig {
    let mut config = CoachConfig::default();
    config.llm.use_streaming = false;
    config.llm.max_retries = 0;
    config
}

fn create_orchestrator(
    provider: Arc<dyn LlmProvider>,
) -> (TurnOrchestrator, Arc<RecordingCallback>) {
    let callback = Arc::new(RecordingCallback::new());
    let orchestrator =
        TurnOrchestrator::new(provider, test_config(), ChatMode::GoalSetting, callback.clone());
    (orchestrator, callback)
}

async fn say(orchestrator: &mut TurnOrchestrator, text: &str) -> TurnOutcome {
    orchestrator
        .submit_turn(TurnInput::Text(text.to_string()))
        .await
        .unwrap()
}

fn replied(outcome: TurnOutcome) -> habitcoach_core::voice::AiTurnResult {
    match outcome {
        TurnOutcome::Replied(result) => result,
        other => panic!("expected a reply, got {:?}", other),
    }
}

/// Answer every question up to the summary read-back.
async fn fill_all_slots(orchestrator: &mut TurnOrchestrator) {
    replied(say(orchestrator, "삼개월 동안 매일 운동하기").await);
    replied(say(orchestrator, "저녁 9시에 할게요").await);
    replied(say(orchestrator, "자꾸 까먹어요").await);
    replied(say(orchestrator, "보통으로 해주세요").await);
}

fn filled_record() -> GoalRecord {
    GoalRecord::new()
        .with_slot(GoalSlot::HabitName, "매일 운동하기")
        .with_slot(GoalSlot::GoalPeriod, "3개월")
        .with_slot(GoalSlot::AvailableTime, "저녁 9시")
        .with_slot(GoalSlot::DifficultyReason, "자꾸 까먹어요")
        .with_slot(GoalSlot::Intensity, Intensity::Medium.as_str())
}

#[tokio::test]
async fn test_text_conversation_reaches_completion() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[
        "좋아요! 언제 시간이 나세요?",
        "저녁이군요! 어떤 점이 어려우세요?",
        "그럴 수 있어요. 강도는 어느 정도로 할까요?",
        "좋아요! 곧 정리해 드릴게요.",
        SUMMARY_REPLY,
        COMPLETION_REPLY,
    ]));
    let (orch, callback) = create_orchestrator(provider.clone());
    // the host already knows the name
    let mut orch = orch.with_user_name("김철수");
    assert_eq!(orch.current_step(), DialogueStep::Goal);

    fill_all_slots(&mut orch).await;
    assert_eq!(orch.session().record(), &filled_record());
    assert_eq!(orch.current_step(), DialogueStep::Summary);

    let summary = replied(say(&mut orch, "그게 다예요").await);
    assert_eq!(summary.verdict, CompletionVerdict::AwaitingConfirmation);
    assert_eq!(summary.step, DialogueStep::Summary);
    assert!(!summary.completed);
    assert!(!summary.text.contains("목표:"));
    assert!(summary.text.starts_with("정리해볼게요!"));
    assert!(callback.completions().await.is_empty());

    let done = replied(say(&mut orch, "네 맞아요").await);
    assert_eq!(done.verdict, CompletionVerdict::Complete);
    assert!(done.completed);
    assert!(done.record.is_complete());
    assert!(orch.session().is_closed());

    let completions = callback.completions().await;
    assert_eq!(completions.len(), 1);
    let payload = &completions[0];
    assert_eq!(payload.habit_name, "매일 운동하기");
    assert_eq!(payload.goal_period, "3개월");
    assert_eq!(payload.available_time, "저녁 9시");
    assert_eq!(payload.difficulty_reason, "자꾸 까먹어요");
    assert_eq!(payload.intensity, "보통");
    assert_eq!(payload.source, CompletionSource::Text);
    assert!(payload.is_voice_complete);
    assert!(payload.transcript.starts_with("사용자: 삼개월 동안 매일 운동하기"));

    // The screen hands off after completion; nothing more is accepted.
    let err = orch
        .submit_turn(TurnInput::Text("하나 더요".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DialogueError::SessionClosed));
    assert_eq!(provider.request_count(), 6);
}

#[tokio::test]
async fn test_completion_phrase_without_all_fields_does_not_complete() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[COMPLETION_REPLY]));
    let (orch, callback) = create_orchestrator(provider);
    let mut orch = orch.with_user_name("김철수");

    let result = replied(say(&mut orch, "매일 운동하고 싶어요").await);
    assert_eq!(result.verdict, CompletionVerdict::Complete);
    assert!(!result.completed);
    assert!(!result.record.is_complete());
    assert!(!orch.session().is_closed());
    assert!(callback.completions().await.is_empty());
}

#[tokio::test]
async fn test_premature_completion_wording_is_ignored() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[
        "좋아요! 언제 시간이 나세요?",
        "저녁이군요! 어떤 점이 어려우세요?",
        "그럴 수 있어요. 강도는 어느 정도로 할까요?",
        "좋아요! 곧 정리해 드릴게요.",
        "계획을 생성하고 루틴을 만들어드릴게요",
    ]));
    let (orch, callback) = create_orchestrator(provider);
    let mut orch = orch.with_user_name("김철수");
    fill_all_slots(&mut orch).await;

    let result = replied(say(&mut orch, "네").await);
    assert_eq!(result.verdict, CompletionVerdict::Premature);
    assert!(!result.completed);
    assert!(!orch.session().is_closed());
    assert!(callback.completions().await.is_empty());
}

#[tokio::test]
async fn test_voice_completion_waits_for_playback() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[
        "좋아요! 언제 시간이 나세요?",
        "저녁이군요! 어떤 점이 어려우세요?",
        "그럴 수 있어요. 강도는 어느 정도로 할까요?",
        "좋아요! 곧 정리해 드릴게요.",
    ]));
    provider.queue_response(MockLlmProvider::voice_response(
        COMPLETION_REPLY,
        "audio/wav",
        vec![1, 2, 3, 4],
    ));
    let (orch, callback) = create_orchestrator(provider);
    let mut orch = orch.with_user_name("김철수");
    fill_all_slots(&mut orch).await;

    orch.start_listening().await.unwrap();
    let clip = AudioClip::from_samples(&[0.1; 16000], 16000)
        .unwrap()
        .with_transcript("네 좋아요");
    let result = replied(orch.submit_turn(TurnInput::Audio(clip)).await.unwrap());

    assert!(result.awaiting_playback());
    assert_eq!(result.mime_type.as_deref(), Some("audio/wav"));
    assert_eq!(result.verdict, CompletionVerdict::Complete);
    assert!(!result.completed);
    assert_eq!(orch.session().state(), VoiceState::Speaking);
    assert!(callback.completions().await.is_empty());

    // Input stays disabled while the reply plays.
    let busy = orch
        .submit_turn(TurnInput::Text("잠깐만요".into()))
        .await
        .unwrap_err();
    assert!(matches!(busy, DialogueError::AlreadyBusy { .. }));

    let payload = orch.playback_finished().await.unwrap().unwrap();
    assert_eq!(payload.source, CompletionSource::Voice);
    assert_eq!(payload.habit_name, "매일 운동하기");
    assert_eq!(callback.completions().await.len(), 1);
    assert_eq!(orch.session().state(), VoiceState::Idle);
    assert!(orch.session().is_closed());

    let states = callback.states().await;
    assert_eq!(
        &states[states.len() - 4..],
        &[
            VoiceState::Listening,
            VoiceState::Processing,
            VoiceState::Speaking,
            VoiceState::Idle
        ]
    );
}

#[tokio::test]
async fn test_spoken_reply_without_completion_returns_to_idle() {
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_response(MockLlmProvider::voice_response(
        "좋아요! 언제 시간이 나세요?",
        "audio/pcm",
        vec![0; 8],
    ));
    let (orch, callback) = create_orchestrator(provider);
    let mut orch = orch.with_user_name("민지");

    let result = replied(say(&mut orch, "매일 독서하고 싶어요").await);
    assert!(result.awaiting_playback());
    assert_eq!(orch.playback_finished().await.unwrap(), None);
    assert_eq!(orch.session().state(), VoiceState::Idle);
    assert!(!orch.session().is_closed());
    assert!(callback.completions().await.is_empty());
}

#[tokio::test]
async fn test_short_recording_records_nothing() {
    let provider = Arc::new(MockLlmProvider::new());
    let (orch, callback) = create_orchestrator(provider.clone());
    let mut orch = orch.with_user_name("김철수");

    orch.start_listening().await.unwrap();
    let clip = AudioClip::from_samples(&[0.2; 1600], 16000)
        .unwrap()
        .with_transcript("매일 운동하기");
    let outcome = orch.submit_turn(TurnInput::Audio(clip)).await.unwrap();

    assert!(matches!(
        outcome,
        TurnOutcome::Discarded {
            reason: DiscardReason::AudioTooShort
        }
    ));
    assert_eq!(orch.session().memory().len(), 0);
    assert_eq!(orch.session().record(), &GoalRecord::new());
    assert_eq!(provider.request_count(), 0);
    assert_eq!(
        callback.states().await,
        vec![VoiceState::Connecting, VoiceState::Listening, VoiceState::Idle]
    );
}

#[tokio::test]
async fn test_untranscribed_recording_sends_audio() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[
        "좋아요! 어떤 습관을 만들고 싶으세요?",
    ]));
    let (orch, _callback) = create_orchestrator(provider.clone());
    let mut orch = orch.with_user_name("김철수");

    let clip = AudioClip::from_samples(&[0.0; 16000], 16000).unwrap();
    replied(orch.submit_turn(TurnInput::Audio(clip)).await.unwrap());

    let request = provider.last_request().unwrap();
    let user = request.messages.last().unwrap();
    let (mime, data) = user.content.first_audio().unwrap();
    assert_eq!(mime, "audio/wav");
    assert_eq!(data.len(), 44 + 32000);
    assert_eq!(orch.session().memory().turns()[0].text, "(음성 메시지)");
    assert_eq!(orch.session().record(), &GoalRecord::new());
}

#[tokio::test]
async fn test_transport_error_then_recovery() {
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_error(LlmError::ApiRequest {
        message: "HTTP 500".into(),
    });
    provider.queue_response(MockLlmProvider::text_response(
        "좋아요! 언제 시간이 나세요?",
    ));
    let (orch, callback) = create_orchestrator(provider);
    let mut orch = orch.with_user_name("김철수");

    let outcome = say(&mut orch, "삼개월 동안 매일 운동하기").await;
    let TurnOutcome::Failed { apology } = outcome else {
        panic!("expected failure");
    };
    assert_eq!(orch.session().memory().len(), 2);
    assert_eq!(orch.session().memory().turns()[1].text, apology);
    assert_eq!(orch.session().state(), VoiceState::Idle);
    // The user's answer still counts.
    assert_eq!(
        orch.session().record().habit_name.as_deref(),
        Some("매일 운동하기")
    );

    let result = replied(say(&mut orch, "저녁 9시에 할게요").await);
    assert_eq!(result.record.available_time.as_deref(), Some("저녁 9시"));
    assert_eq!(orch.session().memory().len(), 4);

    assert_eq!(
        callback.states().await,
        vec![
            VoiceState::Processing,
            VoiceState::Error,
            VoiceState::Idle,
            VoiceState::Processing,
            VoiceState::Idle,
        ]
    );
}

#[tokio::test]
async fn test_name_is_captured_from_first_turn() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[
        "반가워요 김철수님! 어떤 습관을 만들고 싶으세요?",
    ]));
    let (mut orch, _callback) = create_orchestrator(provider.clone());
    assert_eq!(orch.current_step(), DialogueStep::Name);

    replied(say(&mut orch, "제 이름은 김철수예요").await);
    assert_eq!(orch.session().user_name(), Some("김철수"));
    assert_ne!(orch.current_step(), DialogueStep::Name);

    let instruction = provider.last_request().unwrap().messages[0]
        .content
        .joined_text();
    assert!(instruction.contains("사용자 이름: 김철수님"));
}

#[tokio::test]
async fn test_streaming_forwards_tokens() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[
        "좋아요! 언제 시간이 나세요?",
    ]));
    let callback = Arc::new(RecordingCallback::new());
    let mut config = test_config();
    config.llm.use_streaming = true;
    let mut orch = TurnOrchestrator::new(provider, config, ChatMode::GoalSetting, callback.clone())
        .with_user_name("김철수");

    let result = replied(say(&mut orch, "매일 운동하고 싶어요").await);
    assert_eq!(result.text, "좋아요! 언제 시간이 나세요?");
    assert_eq!(callback.tokens().await.concat(), "좋아요! 언제 시간이 나세요?");
}

#[tokio::test]
async fn test_streaming_never_shows_the_summary_block() {
    let provider = Arc::new(MockLlmProvider::with_responses(&[SUMMARY_REPLY]));
    let callback = Arc::new(RecordingCallback::new());
    let mut config = test_config();
    config.llm.use_streaming = true;
    let mut orch = TurnOrchestrator::new(provider, config, ChatMode::GoalSetting, callback.clone())
        .with_user_name("김철수");

    let result = replied(say(&mut orch, "보통으로 해주세요").await);
    let streamed = callback.tokens().await.concat();
    assert_eq!(streamed.trim_end(), result.text);
    assert!(!streamed.contains("목표:"));
    assert!(!streamed.contains("강도:"));
    assert_eq!(orch.session().record(), &filled_record());
}

/// A provider that never answers within the test.
struct StalledProvider;

#[async_trait]
impl LlmProvider for StalledProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(LlmError::Timeout { timeout_secs: 30 })
    }

    async fn complete_streaming(
        &self,
        _request: CompletionRequest,
        _tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(LlmError::Timeout { timeout_secs: 30 })
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

#[tokio::test]
async fn test_cancellation_drops_the_partial_turn() {
    let (orch, callback) = create_orchestrator(Arc::new(StalledProvider));
    let mut orch = orch.with_user_name("김철수");

    let token = orch.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let outcome = say(&mut orch, "매일 운동하고 싶어요").await;
    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert!(orch.session().memory().is_empty());
    assert_eq!(orch.session().record(), &GoalRecord::new());
    assert!(orch.session().is_closed());
    assert_eq!(orch.session().state(), VoiceState::Idle);
    assert!(callback.completions().await.is_empty());

    let err = orch
        .submit_turn(TurnInput::Text("다시요".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DialogueError::SessionClosed));
}
