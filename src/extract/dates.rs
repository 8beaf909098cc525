//! Release dates written the way press offices write them.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WEEKDAY_PREFIX: Regex = Regex::new(
        r"(?i)^(?:mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun)(?:day|nesday|sday|urday)?\.?,?\s+"
    )
    .expect("WEEKDAY_PREFIX to compile");
    static ref ORDINAL_SUFFIX: Regex =
        Regex::new(r"(?i)^(\d{1,2})(?:st|nd|rd|th)\b").expect("ORDINAL_SUFFIX to compile");
    static ref TRAILING_YEAR: Regex = Regex::new(r"\s\d{4}$").expect("TRAILING_YEAR to compile");
}

const FORMATS: [&str; 2] = ["%d %B %Y", "%d %b %Y"];

/// Parse "Sunday, 5 April 2020", "5 Apr 2020" or "5 April".
///
/// A missing year defaults to `default_year`. Returns `None` when nothing
/// date-like remains after cleanup.
pub fn parse_date(text: &str, default_year: i32) -> Option<NaiveDate> {
    parse_with_year(text, Some(default_year))
}

/// Parse a date that must carry its own year.
pub fn parse_full_date(text: &str) -> Option<NaiveDate> {
    parse_with_year(text, None)
}

fn parse_with_year(text: &str, default_year: Option<i32>) -> Option<NaiveDate> {
    // ---
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(',', "");
    let trimmed = collapsed.trim_end_matches('.');
    let without_weekday = WEEKDAY_PREFIX.replace(trimmed, "");
    let without_suffix = ORDINAL_SUFFIX.replace(&without_weekday, "$1");

    let candidate = if TRAILING_YEAR.is_match(&without_suffix) {
        without_suffix.to_string()
    } else {
        format!("{} {}", without_suffix, default_year?)
    };

    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&candidate, format).ok())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case("5 April 2020", Some(date(2020, 4, 5)))]
    #[case("05 Apr 2020", Some(date(2020, 4, 5)))]
    #[case("Sunday, 5 April 2020", Some(date(2020, 4, 5)))]
    #[case("Wednesday 1 July 2020", Some(date(2020, 7, 1)))]
    #[case("  12   March   2020. ", Some(date(2020, 3, 12)))]
    #[case("5 April", Some(date(2021, 4, 5)))]
    #[case("21st May", Some(date(2021, 5, 21)))]
    #[case("yesterday", None)]
    fn test_parse_date(#[case] input: &str, #[case] expected: Option<NaiveDate>) {
        // ---
        assert_eq!(parse_date(input, 2021), expected);
    }

    #[test]
    fn test_full_date_requires_year() {
        // ---
        assert_eq!(parse_full_date("1 May 2020"), Some(date(2020, 5, 1)));
        assert_eq!(parse_full_date("1 May"), None);
    }
}
