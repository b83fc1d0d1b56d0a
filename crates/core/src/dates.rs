//! Date expression resolution
//!
//! Heuristic, not a calendar grammar: absolute numeric dates first, then a
//! small table of relative keywords, otherwise no date at all.

use chrono::{Datelike, Days, Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Relative keywords understood by every caller (days from today)
pub const STANDARD_KEYWORDS: &[(&str, u64)] = &[
    ("明後日", 2),
    ("明日", 1),
    ("今日", 0),
    ("来週", 7),
    ("tomorrow", 1),
    ("today", 0),
];

/// Standard table plus the longer horizons used when adding tasks.
/// Keywords that contain another keyword come first.
pub const EXTENDED_KEYWORDS: &[(&str, u64)] = &[
    ("明後日", 2),
    ("明日", 1),
    ("今日", 0),
    ("再来週", 14),
    ("2週間後", 14),
    ("来週", 7),
    ("来月", 30),
    ("tomorrow", 1),
    ("today", 0),
];

#[derive(Clone, Copy)]
enum Order {
    Ymd,
    Mdy,
    /// Month and day only; year is the reference year
    Md,
}

static ABSOLUTE_PATTERNS: Lazy<Vec<(Regex, Order)>> = Lazy::new(|| {
    [
        (r"(\d{4})-(\d{1,2})-(\d{1,2})", Order::Ymd),
        (r"(\d{4})/(\d{1,2})/(\d{1,2})", Order::Ymd),
        (r"(\d{1,2})/(\d{1,2})/(\d{4})", Order::Mdy),
        (r"(\d{4})年(\d{1,2})月(\d{1,2})日", Order::Ymd),
        (r"(\d{1,2})月(\d{1,2})日", Order::Md),
    ]
    .into_iter()
    .map(|(p, order)| (Regex::new(p).expect("valid date regex"), order))
    .collect()
});

/// Resolves date phrases to calendar dates
#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    relative: &'static [(&'static str, u64)],
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::standard()
    }
}

impl DateResolver {
    pub fn standard() -> Self {
        Self {
            relative: STANDARD_KEYWORDS,
        }
    }

    pub fn extended() -> Self {
        Self {
            relative: EXTENDED_KEYWORDS,
        }
    }

    /// Resolve against today in the local time zone
    pub fn resolve(&self, text: &str) -> Option<NaiveDate> {
        self.resolve_on(text, Local::now().date_naive())
    }

    /// Resolve against a fixed reference day
    pub fn resolve_on(&self, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        if let Some(date) = resolve_absolute(text, today.year()) {
            return Some(date);
        }

        let lower = text.to_lowercase();
        self.relative
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
            .and_then(|(_, days)| today.checked_add_days(Days::new(*days)))
    }

    /// `text` with every absolute date and every keyword of this table removed
    pub fn strip(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, _) in ABSOLUTE_PATTERNS.iter() {
            out = re.replace_all(&out, "").into_owned();
        }
        for (keyword, _) in self.relative {
            out = out.replace(keyword, "");
        }
        out
    }
}

/// First absolute date in `text`; patterns that capture an impossible date
/// are skipped in favour of the next pattern
pub fn resolve_absolute(text: &str, current_year: i32) -> Option<NaiveDate> {
    ABSOLUTE_PATTERNS.iter().find_map(|(re, order)| {
        re.captures_iter(text)
            .find_map(|caps| date_from_captures(&caps, *order, current_year))
    })
}

fn date_from_captures(caps: &Captures, order: Order, current_year: i32) -> Option<NaiveDate> {
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (year, month, day) = match order {
        Order::Ymd => (num(1)? as i32, num(2)?, num(3)?),
        Order::Mdy => (num(3)? as i32, num(1)?, num(2)?),
        Order::Md => (current_year, num(1)?, num(2)?),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

// ============================================================================
// Tests
// ============================================================================
