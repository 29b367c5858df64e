//! The goal record that a coaching conversation fills in.

use serde::{Deserialize, Serialize};

/// How hard the user wants the routine to push them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intensity {
    #[serde(rename = "높음")]
    High,
    #[serde(rename = "보통")]
    Medium,
    #[serde(rename = "낮음")]
    Low,
}

impl Intensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::High => "높음",
            Intensity::Medium => "보통",
            Intensity::Low => "낮음",
        }
    }

    /// Parse one of the canonical labels (`높음`, `보통`, `낮음`), ignoring
    /// surrounding whitespace and trailing punctuation.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().trim_end_matches(['.', '!', '?', '~']) {
            "높음" | "높게" | "상" => Some(Intensity::High),
            "보통" | "중간" | "중" => Some(Intensity::Medium),
            "낮음" | "낮게" | "하" => Some(Intensity::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the five goal slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSlot {
    HabitName,
    GoalPeriod,
    AvailableTime,
    DifficultyReason,
    Intensity,
}

impl GoalSlot {
    pub const ALL: [GoalSlot; 5] = [
        GoalSlot::HabitName,
        GoalSlot::GoalPeriod,
        GoalSlot::AvailableTime,
        GoalSlot::DifficultyReason,
        GoalSlot::Intensity,
    ];

    /// The label used for this slot in the structured summary block.
    pub fn label(&self) -> &'static str {
        match self {
            GoalSlot::HabitName => "목표",
            GoalSlot::GoalPeriod => "기간",
            GoalSlot::AvailableTime => "시간",
            GoalSlot::DifficultyReason => "어려운 점",
            GoalSlot::Intensity => "강도",
        }
    }

    /// Map a summary-block label back to its slot. Inner whitespace is ignored,
    /// so `어려운점` and `어려운 점` both resolve.
    pub fn from_label(label: &str) -> Option<Self> {
        let compact: String = label.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "목표" => Some(GoalSlot::HabitName),
            "기간" => Some(GoalSlot::GoalPeriod),
            "시간" => Some(GoalSlot::AvailableTime),
            "어려운점" => Some(GoalSlot::DifficultyReason),
            "강도" => Some(GoalSlot::Intensity),
            _ => None,
        }
    }
}

impl std::fmt::Display for GoalSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The accumulating target of extraction.
///
/// Merges never mutate in place: both `merge_preferring_existing` and
/// `supersede_with` return a new record. `is_complete` can only be raised by
/// [`GoalRecord::settle_completion`], which requires the completion detector
/// to have fired in addition to every slot being filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub habit_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<Intensity>,
    #[serde(default, skip_deserializing)]
    pub(crate) is_complete: bool,
}

impl GoalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// The current value of a slot, if filled with non-blank text.
    pub fn value(&self, slot: GoalSlot) -> Option<&str> {
        let raw = match slot {
            GoalSlot::HabitName => self.habit_name.as_deref(),
            GoalSlot::GoalPeriod => self.goal_period.as_deref(),
            GoalSlot::AvailableTime => self.available_time.as_deref(),
            GoalSlot::DifficultyReason => self.difficulty_reason.as_deref(),
            GoalSlot::Intensity => self.intensity.as_ref().map(Intensity::as_str),
        };
        raw.filter(|v| !v.trim().is_empty())
    }

    pub fn is_filled(&self, slot: GoalSlot) -> bool {
        self.value(slot).is_some()
    }

    /// Set a slot from raw text. Blank values are ignored, and an intensity
    /// that is not one of the canonical labels leaves the slot untouched.
    ///
    /// Returns whether the slot was written.
    pub fn set(&mut self, slot: GoalSlot, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        match slot {
            GoalSlot::HabitName => self.habit_name = Some(value.to_string()),
            GoalSlot::GoalPeriod => self.goal_period = Some(value.to_string()),
            GoalSlot::AvailableTime => self.available_time = Some(value.to_string()),
            GoalSlot::DifficultyReason => self.difficulty_reason = Some(value.to_string()),
            GoalSlot::Intensity => match Intensity::from_label(value) {
                Some(intensity) => self.intensity = Some(intensity),
                None => return false,
            },
        }
        true
    }

    /// Builder form of [`GoalRecord::set`].
    pub fn with_slot(mut self, slot: GoalSlot, value: &str) -> Self {
        self.set(slot, value);
        self
    }

    pub fn has_all_fields(&self) -> bool {
        GoalSlot::ALL.iter().all(|slot| self.is_filled(*slot))
    }

    pub fn missing_slots(&self) -> Vec<GoalSlot> {
        GoalSlot::ALL
            .iter()
            .copied()
            .filter(|slot| !self.is_filled(*slot))
            .collect()
    }

    pub fn filled_count(&self) -> usize {
        GoalSlot::ALL.len() - self.missing_slots().len()
    }

    /// Record the completion detector's verdict for the latest AI turn.
    ///
    /// The record is complete only when the detector fired and all five
    /// slots are filled. Returns the new completion flag.
    pub fn settle_completion(&mut self, detector_fired: bool) -> bool {
        self.is_complete = detector_fired && self.has_all_fields();
        self.is_complete
    }

    /// Fill the slots that are empty here with values from `newer`.
    pub fn merge_preferring_existing(&self, newer: &GoalRecord) -> GoalRecord {
        let mut merged = self.clone();
        for slot in GoalSlot::ALL {
            if !merged.is_filled(slot)
                && let Some(value) = newer.value(slot)
            {
                merged.set(slot, value);
            }
        }
        merged
    }

    /// Overwrite slots with every value `newer` has filled.
    ///
    /// Used by the final-summary pass, whose structured block is authoritative.
    pub fn supersede_with(&self, newer: &GoalRecord) -> GoalRecord {
        let mut merged = self.clone();
        for slot in GoalSlot::ALL {
            if let Some(value) = newer.value(slot) {
                merged.set(slot, value);
            }
        }
        merged.is_complete = self.is_complete && merged.has_all_fields();
        merged
    }
}
