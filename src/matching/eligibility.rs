//! Normalizes free-text eligibility fields into comparable values.

use std::sync::OnceLock;

use regex::Regex;

use crate::entities::study::Sex;

const DAYS_PER_YEAR: f64 = 365.25;
const MONTHS_PER_YEAR: f64 = 12.0;

fn age_pattern() -> &'static Regex {
    static AGE_RE: OnceLock<Regex> = OnceLock::new();
    AGE_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+)\s+(year|month|day)s?\s*$").expect("valid regex")
    })
}

/// Parses `"<integer> <Unit>"` (Year/Month/Day, singular or plural, any case)
/// into years. Anything else, including `"N/A"`, means no constraint.
pub fn parse_age(text: &str) -> Option<f64> {
    let caps = age_pattern().captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse::<u32>().ok()?.into();
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    match unit.as_str() {
        "year" => Some(value),
        "month" => Some(value / MONTHS_PER_YEAR),
        "day" => Some(value / DAYS_PER_YEAR),
        _ => None,
    }
}

/// Maps a sex/gender label onto [`Sex`]. Unknown labels are permissive.
pub fn normalize_sex(text: &str) -> Sex {
    match text.trim().to_ascii_lowercase().as_str() {
        "male" | "m" => Sex::Male,
        "female" | "f" => Sex::Female,
        _ => Sex::All,
    }
}
