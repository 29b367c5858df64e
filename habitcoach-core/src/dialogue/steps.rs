//! The content step sequence layered over the technical states.
//!
//! `name -> goal -> period+time -> difficulty -> intensity -> summary`.
//! A step whose slots are already filled is skipped, so answers given early
//! or out of order move the conversation forward.

use serde::{Deserialize, Serialize};

use crate::goal::{GoalRecord, GoalSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueStep {
    Name,
    Goal,
    PeriodTime,
    Difficulty,
    Intensity,
    Summary,
}

impl DialogueStep {
    pub const SEQUENCE: [DialogueStep; 6] = [
        DialogueStep::Name,
        DialogueStep::Goal,
        DialogueStep::PeriodTime,
        DialogueStep::Difficulty,
        DialogueStep::Intensity,
        DialogueStep::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Goal => "goal",
            Self::PeriodTime => "period_time",
            Self::Difficulty => "difficulty",
            Self::Intensity => "intensity",
            Self::Summary => "summary",
        }
    }

    /// Position in the sequence, for progress display.
    pub fn index(&self) -> usize {
        Self::SEQUENCE
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }

    /// Goal slots this step is responsible for.
    pub fn slots(&self) -> &'static [GoalSlot] {
        match self {
            Self::Name | Self::Summary => &[],
            Self::Goal => &[GoalSlot::HabitName],
            Self::PeriodTime => &[GoalSlot::GoalPeriod, GoalSlot::AvailableTime],
            Self::Difficulty => &[GoalSlot::DifficultyReason],
            Self::Intensity => &[GoalSlot::Intensity],
        }
    }

    /// The question asked when this step's slots are still empty.
    pub fn fallback_question(&self) -> &'static str {
        match self {
            Self::Name => "안녕하세요! 먼저 이름을 알려주시겠어요?",
            Self::Goal => "어떤 습관을 만들고 싶으세요?",
            Self::PeriodTime => "얼마 동안, 그리고 하루 중 언제 실천하실 수 있을까요?",
            Self::Difficulty => "이 습관을 지키는 데 가장 어려운 점은 무엇인가요?",
            Self::Intensity => "강도는 높음, 보통, 낮음 중 어느 정도로 할까요?",
            Self::Summary => "지금까지 말씀하신 내용을 정리해볼게요. 맞나요?",
        }
    }

    /// Whether the step has what it needs. The summary step is never
    /// satisfied by slots alone; it ends with the completion detector.
    pub fn is_satisfied(&self, record: &GoalRecord, user_name: Option<&str>) -> bool {
        match self {
            Self::Name => user_name.is_some_and(|n| !n.trim().is_empty()),
            Self::Summary => false,
            step => step.slots().iter().all(|slot| record.is_filled(*slot)),
        }
    }
}

impl std::fmt::Display for DialogueStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first step that still needs an answer.
pub fn next_step(record: &GoalRecord, user_name: Option<&str>) -> DialogueStep {
    DialogueStep::SEQUENCE
        .iter()
        .copied()
        .find(|step| !step.is_satisfied(record, user_name))
        .unwrap_or(DialogueStep::Summary)
}
