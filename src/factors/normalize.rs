//! Field-level normalization for loosely formatted factor files

use super::UNBOUNDED_MILEAGE;
use regex::Regex;
use std::sync::LazyLock;

/// Maximal runs of ASCII digits (`\d` would also match non-ASCII digits)
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// Postcodes are exactly this many digits
const POSTCODE_LEN: usize = 5;

/// Which end of a mileage band a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MileageBound {
    From,
    To,
}

/// Strip surrounding whitespace and double quotes
pub fn clean_field(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim()
}

/// Parse a factor column value. Only finite numbers are accepted.
pub fn parse_factor(raw: &str) -> Option<f64> {
    clean_field(raw)
        .parse::<f64>()
        .ok()
        .filter(|factor| factor.is_finite())
}

/// Parse a mileage bound. `-1` in the upper bound means "no upper limit".
///
/// Integral decimal text such as `5000.0` is accepted as 5000.
pub fn parse_mileage(raw: &str, bound: MileageBound) -> Option<i64> {
    let text = clean_field(raw);
    if bound == MileageBound::To && text == "-1" {
        return Some(UNBOUNDED_MILEAGE);
    }
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }
    let value = text.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Pull the first run of exactly five digits out of a free-text field.
///
/// Longer or shorter digit runs never match, so `793001` yields nothing
/// rather than `79300`.
pub fn extract_postcode(field: &str) -> Option<String> {
    DIGIT_RUN
        .find_iter(field)
        .map(|run| run.as_str())
        .find(|run| run.len() == POSTCODE_LEN)
        .map(|run| format!("{:0>width$}", run, width = POSTCODE_LEN))
}
