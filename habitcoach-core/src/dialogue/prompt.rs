//! System instructions sent with every AI request.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::goal::{GoalRecord, GoalSlot};

use super::steps::DialogueStep;

/// Which screen is hosting the conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Collect a new goal through the step sequence.
    #[default]
    GoalSetting,
    /// Talk through how to fit the routine into the day.
    Plan,
    /// Daily or weekly reflection on progress.
    Report,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::GoalSetting => "goal_setting",
            ChatMode::Plan => "plan",
            ChatMode::Report => "report",
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "goal" | "goal_setting" | "goal-setting" => Ok(ChatMode::GoalSetting),
            "plan" => Ok(ChatMode::Plan),
            "report" => Ok(ChatMode::Report),
            other => Err(format!(
                "unknown chat mode '{}'; expected goal, plan or report",
                other
            )),
        }
    }
}

/// Everything the instruction interpolates.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub record: &'a GoalRecord,
    pub user_name: Option<&'a str>,
    pub next_step: DialogueStep,
    pub recent_context: &'a str,
}

const PERSONA: &str = "너는 사용자의 습관 형성을 돕는 따뜻하고 간결한 한국어 코치야. \
한 번에 하나의 질문만 하고, 답변은 두세 문장 이내로 짧게 말해.";

const SUMMARY_RULES: &str = "\
모든 정보가 모이면 \"정리해볼게요!\"로 시작해 내용을 요약하고 \"맞나요?\"라고 확인한 뒤, \
아래 형식의 줄을 정확히 그대로 덧붙여:
목표: <습관>
기간: <기간>
시간: <시간>
어려운 점: <어려운 점>
강도: <높음|보통|낮음>
사용자가 확인하면 \"와! 좋아요! 루틴을 만들어드릴게요\"라고 말하고 \"홈에서 봐요!\"로 마무리해.
확인 전에는 절대 루틴이나 계획을 만든다고 말하지 마.";

/// Build the system instruction for one request.
pub fn build_system_instruction(mode: ChatMode, ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();
    out.push_str(PERSONA);
    out.push_str("\n\n");

    if let Some(name) = ctx.user_name {
        let _ = writeln!(out, "사용자 이름: {}님", name);
    }

    match mode {
        ChatMode::GoalSetting => {
            out.push_str("지금은 새 습관 목표를 설정하는 대화야.\n");
            out.push_str(&render_record(ctx.record));
            if ctx.next_step == DialogueStep::Summary {
                out.push_str("\n모든 정보가 모였어. 요약하고 확인을 받아.\n");
            } else {
                let _ = writeln!(
                    out,
                    "\n다음 질문({}): {}",
                    ctx.next_step,
                    ctx.next_step.fallback_question()
                );
            }
            out.push('\n');
            out.push_str(SUMMARY_RULES);
            out.push('\n');
        }
        ChatMode::Plan => {
            out.push_str(
                "지금은 정해진 습관을 하루 일과에 어떻게 넣을지 함께 계획하는 대화야.\n",
            );
            out.push_str(&render_record(ctx.record));
        }
        ChatMode::Report => {
            out.push_str(
                "지금은 오늘 또는 이번 주의 실천을 돌아보는 대화야. 잘한 점을 먼저 칭찬하고, \
                 다음에 바꿔 볼 한 가지를 함께 정해.\n",
            );
            out.push_str(&render_record(ctx.record));
        }
    }

    if !ctx.recent_context.is_empty() {
        out.push_str("\n최근 대화:\n");
        out.push_str(ctx.recent_context);
        out.push('\n');
    }

    out
}

fn render_record(record: &GoalRecord) -> String {
    let mut out = String::from("현재까지 파악한 정보:\n");
    for slot in GoalSlot::ALL {
        let _ = writeln!(
            out,
            "- {}: {}",
            slot.label(),
            record.value(slot).unwrap_or("(미정)")
        );
    }
    out
}
