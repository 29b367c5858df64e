//! Spoken Korean numerals to digit form for periods and clock times.
//!
//! Each normalizer makes a single left-to-right pass. Alternatives are listed
//! longest first so that `십이개월` is read as 12 rather than `십` + `이`.
//! The output of a pass never contains a spoken numeral, so normalizing an
//! already-normalized value leaves it unchanged.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Sino-Korean numerals used with 개월/주/년 (삼개월, 일년).
const SINO_NUMERALS: &[(&str, u32)] = &[
    ("십일", 11),
    ("십이", 12),
    ("십", 10),
    ("일", 1),
    ("이", 2),
    ("삼", 3),
    ("사", 4),
    ("오", 5),
    ("육", 6),
    ("칠", 7),
    ("팔", 8),
    ("구", 9),
];

/// Native Korean numerals used with 달 and clock hours (세 달, 일곱시).
const NATIVE_NUMERALS: &[(&str, u32)] = &[
    ("열한", 11),
    ("열두", 12),
    ("다섯", 5),
    ("여섯", 6),
    ("일곱", 7),
    ("여덟", 8),
    ("아홉", 9),
    ("열", 10),
    ("한", 1),
    ("두", 2),
    ("세", 3),
    ("네", 4),
];

fn alternation(table: &[(&str, u32)]) -> String {
    let mut keys: Vec<&str> = table.iter().map(|(k, _)| *k).collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.chars().count()));
    keys.join("|")
}

fn lookup(table: &[(&str, u32)], key: &str) -> Option<u32> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Pattern source for a spoken or digit period such as `삼개월`, `세 달`, `2주일`.
pub(crate) fn period_pattern() -> String {
    format!(
        r"(?:반년|(?:\d+)\s*(?:개월|달|주일|주|년)|(?:{sino})(?:개월|주일|주|년)|(?:{native})\s*(?:달|주일|주))",
        sino = alternation(SINO_NUMERALS),
        native = alternation(NATIVE_NUMERALS),
    )
}

/// Pattern source for a single clock hour such as `7시`, `일곱 시`, `세시 반`.
///
/// The one-syllable native numerals must touch `시` so that `네 시작할게요`
/// is not read as four o'clock.
pub(crate) fn hour_pattern() -> String {
    r"(?:\d{1,2}\s*시|(?:열한|열두|다섯|여섯|일곱|여덟|아홉|열)\s*시|(?:한|두|세|네)시)(?:\s*반|\s*\d{1,2}\s*분)?"
        .to_string()
}

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<half>반년)|(?P<digit>\d+)\s*(?P<dunit>개월|달|주일|주|년)|(?P<sino>{sino})(?P<sunit>개월|주일|주|년)|(?P<native>{native})\s*(?P<nunit>달|주일|주)",
        sino = alternation(SINO_NUMERALS),
        native = alternation(NATIVE_NUMERALS),
    ))
    .expect("period pattern is valid")
});

static HOUR_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<native>{native})\s*시",
        native = alternation(NATIVE_NUMERALS)
    ))
    .expect("hour word pattern is valid")
});

static DIGIT_HOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s+시").expect("digit hour pattern is valid"));

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<prefix>.*?)(?P<start>\d{1,2}시(?:\s*반|\s*\d{1,2}분)?)\s*(?:부터|에서|~|-)\s*(?P<end>\d{1,2}시(?:\s*반|\s*\d{1,2}분)?)",
    )
    .expect("range pattern is valid")
});

fn unit_for(unit: &str) -> &'static str {
    match unit {
        "개월" | "달" => "개월",
        "주일" | "주" => "주",
        _ => "년",
    }
}

/// Normalize a goal period to `<N>개월` / `<N>주` / `<N>년`.
///
/// Unrecognized text is returned trimmed but otherwise untouched.
pub fn normalize_period(value: &str) -> String {
    PERIOD_RE
        .replace_all(value.trim(), |caps: &Captures| {
            if caps.name("half").is_some() {
                return "6개월".to_string();
            }
            let (number, unit) = if let Some(digit) = caps.name("digit") {
                (digit.as_str().parse::<u32>().ok(), &caps["dunit"])
            } else if let Some(sino) = caps.name("sino") {
                (lookup(SINO_NUMERALS, sino.as_str()), &caps["sunit"])
            } else {
                (
                    caps.name("native")
                        .and_then(|m| lookup(NATIVE_NUMERALS, m.as_str())),
                    &caps["nunit"],
                )
            };
            match number {
                Some(n) => format!("{}{}", n, unit_for(unit)),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Normalize a time window: spoken hours become digits, and a range loses its
/// 부터/까지/에서/~ connectives to become `<prefix> <start>-<end>`.
pub fn normalize_time(value: &str) -> String {
    let digits = HOUR_WORD_RE.replace_all(value.trim(), |caps: &Captures| {
        match lookup(NATIVE_NUMERALS, &caps["native"]) {
            Some(n) => format!("{}시", n),
            None => caps[0].to_string(),
        }
    });
    let digits = DIGIT_HOUR_RE.replace_all(&digits, "${1}시");

    match RANGE_RE.captures(&digits) {
        Some(caps) => {
            let prefix = caps["prefix"].trim();
            let range = format!("{}-{}", &caps["start"], &caps["end"]);
            if prefix.is_empty() {
                range
            } else {
                format!("{} {}", prefix, range)
            }
        }
        None => digits
            .trim_end_matches("부터")
            .trim_end_matches("까지")
            .trim()
            .to_string(),
    }
}
