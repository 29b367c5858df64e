//! Regex entity extraction for the five goal slots.
//!
//! Every slot has an ordered table of [`SlotPattern`]s. Tables are evaluated
//! top to bottom and the first pattern that matches wins, so specific
//! patterns (named activities) sit above catch-alls (`~하고 싶어`, `~하기`).
//!
//! There are three passes with different input scopes:
//! - [`EntityExtractor::extract_turn`] reads the latest user utterance and only
//!   fills empty slots.
//! - [`EntityExtractor::extract_final_summary`] reads the structured summary
//!   block in an AI reply and overwrites whatever it names.
//! - [`EntityExtractor::extract_from_history`] mines every prior user utterance
//!   for slots that were stated out of order.
//!
//! [`EntityExtractor::extract`] combines the first two for a single text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::numerals::{hour_pattern, normalize_period, normalize_time, period_pattern};
use super::record::{GoalRecord, GoalSlot, Intensity};

/// Activities recognised by name, longest first within each family.
const ACTIVITIES: &[&str] = &[
    "코딩 연습",
    "코딩 공부",
    "영어 공부",
    "중국어 공부",
    "일본어 공부",
    "자격증 공부",
    "피아노 연습",
    "기타 연습",
    "그림 그리기",
    "일기 쓰기",
    "책 읽기",
    "물 마시기",
    "일찍 일어나기",
    "일찍 자기",
    "홈트레이닝",
    "스트레칭",
    "다이어트",
    "글쓰기",
    "달리기",
    "러닝",
    "조깅",
    "산책",
    "요가",
    "필라테스",
    "헬스",
    "수영",
    "명상",
    "독서",
    "운동",
    "코딩",
    "공부",
    "금연",
    "금주",
    "일기",
];

/// Self-descriptions that fit the `저는 ~이에요` shape but are not names.
const NOT_NAMES: &[&str] = &[
    "직장인", "회사원", "학생", "대학생", "대학원생", "고등학생", "중학생", "초등학생", "취준생",
    "수험생", "주부", "엄마", "아빠", "개발자", "디자이너", "공무원", "선생님", "교사", "간호사",
    "의사", "군인", "프리랜서", "자영업자", "백수", "초보", "초보자", "사람", "직장맘",
];

/// Leading words of the summary block labels, for streamed text.
const SUMMARY_LABELS: &[&str] = &["목표", "기간", "시간", "어려운 점", "어려운점", "강도"];

/// Frequency phrases that belong to the habit name when they lead it.
const FREQUENCY_PREFIX: &str =
    r"(?:매일\s*아침|매일\s*저녁|매일\s*밤|매일|매주|주말마다|평일마다|꾸준히|하루\s*한\s*번)";

/// Matches one line of the structured summary block, tolerating list bullets
/// and markdown bold around the label.
static SUMMARY_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:[-*•][ \t]*)?\**[ \t]*(목표|기간|시간|어려운[ \t]*점|강도)[ \t]*\**[ \t]*[:：][ \t]*(.+?)[ \t]*\**[ \t]*\r?$",
    )
    .expect("summary line pattern is valid")
});

static INTERJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:우와|와|오|음+|아|어|네|예|응|흠|좋아요|좋아)(?:[!.,~…]+\s*|\s+)")
        .expect("interjection pattern is valid")
});

static NAME_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[가-힣]{2,4}님(?:은|는|이|의|께서)?[,\s]*").expect("name reference pattern is valid")
});

static SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:저는|전|나는|난|제가|내가|저도|나도)\s+").expect("subject pattern is valid")
});

static TRAILING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\s.!?~…,'"“”]+$"#).expect("trailing punctuation pattern is valid")
});

static SHARED: LazyLock<EntityExtractor> = LazyLock::new(EntityExtractor::new);

/// Minimum number of distinct labels before a set of `label: value` lines is
/// treated as the summary block rather than incidental prose.
const MIN_SUMMARY_LABELS: usize = 2;

/// One entry in a slot's priority table.
#[derive(Debug, Clone)]
pub struct SlotPattern {
    /// Short identifier used in logs and tests.
    pub name: &'static str,
    pub regex: Regex,
    /// Capture group holding the value.
    pub group: usize,
    /// Appended to the captured value (e.g. `기` to turn `배우` into `배우기`).
    pub suffix: &'static str,
}

impl SlotPattern {
    fn new(name: &'static str, pattern: &str, group: usize) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("slot pattern is valid"),
            group,
            suffix: "",
        }
    }

    fn with_suffix(mut self, suffix: &'static str) -> Self {
        self.suffix = suffix;
        self
    }

    /// The captured value of this pattern in `text`, if any.
    pub fn find(&self, text: &str) -> Option<String> {
        let captured = self.regex.captures(text)?.get(self.group)?.as_str().trim();
        if captured.is_empty() {
            return None;
        }
        Some(format!("{}{}", captured, self.suffix))
    }
}

/// Compiled pattern tables for every slot.
pub struct EntityExtractor {
    habit: Vec<SlotPattern>,
    period: Vec<SlotPattern>,
    time: Vec<SlotPattern>,
    difficulty: Vec<SlotPattern>,
    intensity: Vec<(Intensity, Regex)>,
    name: Vec<SlotPattern>,
}

impl EntityExtractor {
    pub fn new() -> Self {
        let period = period_pattern();
        let hour = hour_pattern();
        let activities = ACTIVITIES.join("|");
        let day_part = r"(?:오전|오후|아침|저녁|밤|새벽|낮|점심)";

        let habit = vec![
            SlotPattern::new(
                "named_activity",
                &format!(r"((?:{FREQUENCY_PREFIX}\s*)?(?:{activities})(?:\s*하기)?)"),
                1,
            ),
            SlotPattern::new(
                "goal_statement",
                r"(?m)목표는\s*(.+?)\s*(?:이에요|예요|에요|입니다|이야|야)?\s*[.!?~]*\s*$",
                1,
            ),
            SlotPattern::new(
                "want_to",
                r"([가-힣A-Za-z0-9][가-힣A-Za-z0-9 ]*?(?:하|배우|읽|쓰|마시|만들|줄이|늘리|일어나|가|보|듣|그리|먹|끊|자))고\s*싶",
                1,
            )
            .with_suffix("기"),
            SlotPattern::new(
                "generic_hagi",
                r"([가-힣A-Za-z0-9]+(?:\s+[가-힣A-Za-z0-9]+)?\s*하기)",
                1,
            ),
        ];

        let period = vec![
            SlotPattern::new("labelled", &format!(r"기간\S*\s*({period})"), 1),
            SlotPattern::new(
                "duration",
                &format!(r"({period})\s*(?:동안|간|정도|만)"),
                1,
            ),
            SlotPattern::new("bare", &format!(r"({period})"), 1),
        ];

        let time = vec![
            SlotPattern::new(
                "range",
                &format!(
                    r"((?:{day_part}\s*)?{hour}\s*(?:부터|에서|~|-)\s*{hour})(?:\s*까지)?(?:[^간]|$)"
                ),
                1,
            ),
            SlotPattern::new(
                "day_part_hour",
                &format!(r"({day_part}\s*{hour})(?:[^간]|$)"),
                1,
            ),
            SlotPattern::new("hour", &format!(r"({hour})(?:[^간]|$)"), 1),
            SlotPattern::new(
                "window",
                r"(퇴근\s*(?:후|하고\s*나서|하고)|출근\s*(?:전|하기\s*전)|자기\s*전|잠들기\s*전|점심\s*시간|일어나자마자|일어나서|아침\s*일찍|저녁\s*먹고)",
                1,
            ),
        ];

        let difficulty = vec![
            SlotPattern::new("labelled", r"(?m)어려운\s*점은?\s*[:：]?\s*(.+?)\s*$", 1),
            SlotPattern::new(
                "struggle",
                r"([^.!?\n]*(?:어려|어렵|힘들|힘드|못\s*하|부족|안\s*돼|안\s*되|포기)[^.!?\n]*)",
                1,
            ),
            SlotPattern::new(
                "procrastination",
                r"([^.!?\n]*(?:귀찮|작심삼일|까먹|잊어버|미루|미뤄)[^.!?\n]*)",
                1,
            ),
        ];

        let intensity = vec![
            (
                Intensity::High,
                Regex::new(r"높게|높음|높은\s*강도|강하게|세게|빡세게|빡빡하게|하드하게")
                    .expect("intensity pattern is valid"),
            ),
            (
                Intensity::Medium,
                Regex::new(r"보통(?:으로|이요|이에요|요|\s*강도|$)|중간\s*(?:정도|강도|으로|이요|요|$)|적당(?:히|하게|한)")
                    .expect("intensity pattern is valid"),
            ),
            (
                Intensity::Low,
                Regex::new(r"낮게|낮음|낮은\s*강도|가볍게|약하게|살살|무리\s*없이|무리하지\s*않")
                    .expect("intensity pattern is valid"),
            ),
        ];

        let name = vec![
            SlotPattern::new(
                "name_is",
                r"이름은\s*([가-힣]{2,4}?)\s*(?:이에요|예요|에요|입니다|이야|야|이라고|라고|[.!?\s]|$)",
                1,
            ),
            SlotPattern::new(
                "i_am",
                r"(?:저는|전|나는|난)\s*([가-힣]{2,4}?)\s*(?:이에요|예요|입니다|이라고\s*해요|라고\s*해요|라고\s*합니다)",
                1,
            ),
            SlotPattern::new(
                "call_me",
                r"([가-힣]{2,4}?)(?:이라고|라고)\s*(?:불러|해요|합니다)",
                1,
            ),
        ];

        Self {
            habit,
            period,
            time,
            difficulty,
            intensity,
            name,
        }
    }

    /// A process-wide extractor, compiled on first use.
    pub fn shared() -> &'static EntityExtractor {
        &SHARED
    }

    fn table(&self, slot: GoalSlot) -> &[SlotPattern] {
        match slot {
            GoalSlot::HabitName => &self.habit,
            GoalSlot::GoalPeriod => &self.period,
            GoalSlot::AvailableTime => &self.time,
            GoalSlot::DifficultyReason => &self.difficulty,
            GoalSlot::Intensity => &[],
        }
    }

    /// The first pattern in `slot`'s table that matches, with its cleaned value.
    pub fn first_match(&self, slot: GoalSlot, text: &str) -> Option<(&'static str, String)> {
        if slot == GoalSlot::Intensity {
            return self
                .match_intensity(text)
                .map(|i| ("intensity", i.as_str().to_string()));
        }
        self.table(slot).iter().find_map(|pattern| {
            let raw = pattern.find(text)?;
            let value = shape_value(slot, &raw);
            (!value.is_empty()).then_some((pattern.name, value))
        })
    }

    /// The intensity named in `text`, by table order.
    pub fn match_intensity(&self, text: &str) -> Option<Intensity> {
        self.intensity
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(intensity, _)| *intensity)
    }

    /// Run every slot table over free text and return what was found.
    pub fn scan(&self, text: &str) -> GoalRecord {
        let mut found = GoalRecord::new();
        for slot in GoalSlot::ALL {
            if let Some((pattern, value)) = self.first_match(slot, text) {
                debug!(slot = %slot, pattern, value = %value, "Slot matched");
                found.set(slot, &value);
            }
        }
        found
    }

    /// Extract from a single text: free-text matches fill empty slots of
    /// `previous`, then a structured summary block (if present) overwrites
    /// every slot it names.
    pub fn extract(&self, text: &str, previous: &GoalRecord) -> GoalRecord {
        let prose = self.strip_summary_block(text);
        let merged = previous.merge_preferring_existing(&self.scan(&prose));
        match self.parse_summary_block(text) {
            Some(summary) => merged.supersede_with(&summary),
            None => merged,
        }
    }

    /// Incremental pass over the latest user utterance; never overwrites.
    pub fn extract_turn(&self, user_text: &str, previous: &GoalRecord) -> GoalRecord {
        previous.merge_preferring_existing(&self.scan(user_text))
    }

    /// Final-summary pass over an AI reply. The block's values win over
    /// anything extracted earlier; without a block the record is unchanged.
    pub fn extract_final_summary(&self, ai_text: &str, previous: &GoalRecord) -> GoalRecord {
        match self.parse_summary_block(ai_text) {
            Some(summary) => {
                debug!(
                    filled = summary.filled_count(),
                    "Applying structured summary block"
                );
                previous.supersede_with(&summary)
            }
            None => previous.clone(),
        }
    }

    /// History-mining pass over every prior user utterance. Fills empty slots
    /// only, covering answers given out of the expected order.
    pub fn extract_from_history(&self, user_history: &str, previous: &GoalRecord) -> GoalRecord {
        let mut merged = previous.clone();
        for line in user_history.lines() {
            merged = merged.merge_preferring_existing(&self.scan(line));
        }
        merged
    }

    /// Parse the `목표: / 기간: / 시간: / 어려운 점: / 강도:` block.
    ///
    /// Returns `None` unless at least two distinct labels are present. When a
    /// label repeats, its first occurrence is used.
    pub fn parse_summary_block(&self, text: &str) -> Option<GoalRecord> {
        let mut seen: HashSet<GoalSlot> = HashSet::new();
        let mut summary = GoalRecord::new();
        for caps in SUMMARY_LINE_RE.captures_iter(text) {
            let Some(slot) = GoalSlot::from_label(&caps[1]) else {
                continue;
            };
            if !seen.insert(slot) {
                continue;
            }
            let raw = caps[2].trim_matches('*').trim();
            match slot {
                GoalSlot::Intensity => {
                    if let Some(intensity) =
                        Intensity::from_label(raw).or_else(|| self.match_intensity(raw))
                    {
                        summary.intensity = Some(intensity);
                    }
                }
                _ => {
                    summary.set(slot, &shape_block_value(slot, raw));
                }
            }
        }
        (seen.len() >= MIN_SUMMARY_LABELS).then_some(summary)
    }

    /// Remove the summary block lines so the reply can be shown to the user.
    /// Text without a block is returned unchanged.
    pub fn strip_summary_block(&self, text: &str) -> String {
        let labels: HashSet<GoalSlot> = SUMMARY_LINE_RE
            .captures_iter(text)
            .filter_map(|caps| GoalSlot::from_label(&caps[1]))
            .collect();
        if labels.len() < MIN_SUMMARY_LABELS {
            return text.to_string();
        }
        let kept: Vec<&str> = text
            .lines()
            .filter(|line| !SUMMARY_LINE_RE.is_match(line))
            .collect();
        kept.join("\n").trim_end().to_string()
    }

    /// The user's name, when the utterance states it. Occupations and other
    /// self-descriptions (`저는 직장인이에요`) are not names.
    pub fn extract_user_name(&self, text: &str) -> Option<String> {
        self.name
            .iter()
            .filter_map(|pattern| pattern.find(text))
            .find(|name| !NOT_NAMES.contains(&name.as_str()))
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental filter over a streamed AI reply that holds back summary block
/// lines. A line is buffered until it either diverges from every label or
/// ends; a finished line is dropped when it is a `label: value` line.
#[derive(Debug, Default)]
pub struct SummaryStreamFilter {
    line: String,
    passing: bool,
}

impl SummaryStreamFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the text that is safe to display now.
    pub fn push(&mut self, fragment: &str) -> String {
        let mut shown = String::new();
        for ch in fragment.chars() {
            if self.passing {
                shown.push(ch);
                if ch == '\n' {
                    self.passing = false;
                }
                continue;
            }
            self.line.push(ch);
            if ch == '\n' {
                if !SUMMARY_LINE_RE.is_match(self.line.trim_end()) {
                    shown.push_str(&self.line);
                }
                self.line.clear();
            } else if !could_start_summary_line(&self.line) {
                shown.push_str(&self.line);
                self.line.clear();
                self.passing = true;
            }
        }
        shown
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(&mut self) -> String {
        self.passing = false;
        let rest = std::mem::take(&mut self.line);
        if SUMMARY_LINE_RE.is_match(rest.trim_end()) {
            String::new()
        } else {
            rest
        }
    }
}

fn could_start_summary_line(partial: &str) -> bool {
    let head = partial.trim_start_matches([' ', '\t', '-', '*', '•']);
    head.is_empty()
        || SUMMARY_LABELS
            .iter()
            .any(|label| label.starts_with(head) || head.starts_with(label))
}

/// Per-slot post-processing of a raw captured value.
fn shape_value(slot: GoalSlot, raw: &str) -> String {
    match slot {
        GoalSlot::GoalPeriod => normalize_period(raw),
        GoalSlot::AvailableTime => normalize_time(raw),
        GoalSlot::HabitName | GoalSlot::DifficultyReason => clean_phrase(raw),
        GoalSlot::Intensity => raw.trim().to_string(),
    }
}

/// Post-processing for a labelled summary value. The model wrote it
/// deliberately, so only periods and times are normalized.
fn shape_block_value(slot: GoalSlot, raw: &str) -> String {
    match slot {
        GoalSlot::GoalPeriod => normalize_period(raw),
        GoalSlot::AvailableTime => normalize_time(raw),
        _ => raw.trim().to_string(),
    }
}

/// Strip leading interjections, honorific name references and subject
/// pronouns, plus trailing punctuation.
pub fn clean_phrase(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    loop {
        let before = text.len();
        for re in [&*INTERJECTION_RE, &*NAME_REF_RE, &*SUBJECT_RE] {
            let stripped = re.replace(&text, "").trim_start().to_string();
            text = stripped;
        }
        if text.len() == before {
            break;
        }
    }
    TRAILING_RE.replace(&text, "").into_owned()
}
