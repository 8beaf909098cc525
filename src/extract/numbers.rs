//! Numbers as they appear in press releases: digit groups ("1,234"),
//! English cardinals ("one hundred and eighteen"), ordinals ("fifth",
//! "twenty-first") and percentages ("12.5%").

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LEADING_DIGITS: Regex =
        Regex::new(r"^\d[\d,]*").expect("LEADING_DIGITS to compile");
}

const UNITS: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [(&str, i64); 8] = [
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
    ("eighty", 80),
    ("ninety", 90),
];

const SCALES: [(&str, i64); 3] = [("thousand", 1_000), ("million", 1_000_000), ("billion", 1_000_000_000)];

/// Ordinals that do not become their cardinal by dropping a suffix.
const IRREGULAR_ORDINALS: [(&str, &str); 7] = [
    ("first", "one"),
    ("second", "two"),
    ("third", "three"),
    ("fifth", "five"),
    ("eighth", "eight"),
    ("ninth", "nine"),
    ("twelfth", "twelve"),
];

/// Parse a count: a leading digit group (commas allowed) wins, otherwise
/// the whole text is read as English words.
pub fn parse_num(text: &str) -> Option<i64> {
    // ---
    let text = text.trim();
    if let Some(digits) = LEADING_DIGITS.find(text) {
        return digits.as_str().replace(',', "").parse().ok();
    }
    words_to_number(text)
}

/// Parse an ordinal such as "fifth", "twenty-first" or "5th".
pub fn parse_ordinal(text: &str) -> Option<i64> {
    // ---
    let text = text.trim().to_lowercase();
    if let Some(digits) = LEADING_DIGITS.find(&text) {
        return digits.as_str().replace(',', "").parse().ok();
    }

    let mut words: Vec<String> = text
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let last = words.pop()?;
    let cardinal = match IRREGULAR_ORDINALS.iter().find(|(ordinal, _)| *ordinal == last) {
        Some((_, cardinal)) => cardinal.to_string(),
        None if last.ends_with("ieth") => format!("{}y", &last[..last.len() - 4]),
        None => last.strip_suffix("th").unwrap_or(&last).to_string(),
    };
    words.push(cardinal);

    words_to_number(&words.join(" "))
}

/// Parse a percentage string into a ratio: "12.5%" becomes 0.125.
pub fn parse_perc(text: &str) -> Option<f64> {
    // ---
    let value: f64 = text.trim().trim_end_matches('%').trim().parse().ok()?;
    Some(value / 100.0)
}

/// Convert English number words to an integer.
///
/// Handles every teen directly, so "one hundred and eighteen" is 118.
/// Unknown words make the whole conversion fail.
pub fn words_to_number(text: &str) -> Option<i64> {
    // ---
    let lower = text.to_lowercase();
    let mut total = 0i64;
    let mut current = 0i64;
    let mut seen_number = false;

    for raw in lower.split(|c: char| c.is_whitespace() || c == '-') {
        let word = raw.trim_matches(|c: char| !c.is_ascii_alphabetic());
        if word.is_empty() || word == "and" {
            continue;
        }

        if let Some(unit) = UNITS.iter().position(|u| *u == word) {
            current = current.checked_add(unit as i64)?;
        } else if let Some((_, tens)) = TENS.iter().find(|(t, _)| *t == word) {
            current = current.checked_add(*tens)?;
        } else if word == "hundred" {
            current = current.max(1).checked_mul(100)?;
        } else if let Some((_, scale)) = SCALES.iter().find(|(s, _)| *s == word) {
            total = total.checked_add(current.max(1).checked_mul(*scale)?)?;
            current = 0;
        } else {
            return None;
        }
        seen_number = true;
    }

    if seen_number {
        total.checked_add(current)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1,234", Some(1234))]
    #[case("  42 ", Some(42))]
    #[case("2,580.", Some(2580))]
    #[case("twelve", Some(12))]
    #[case("Nineteen", Some(19))]
    #[case("twenty-one", Some(21))]
    #[case("one hundred and eighteen", Some(118))]
    #[case("three thousand four hundred", Some(3400))]
    #[case("several", None)]
    #[case("", None)]
    #[case("hundred hundred hundred hundred hundred hundred hundred hundred hundred hundred hundred hundred", None)]
    #[case("ten hundred hundred hundred hundred billion", None)]
    fn test_parse_num(#[case] input: &str, #[case] expected: Option<i64>) {
        // ---
        assert_eq!(parse_num(input), expected);
    }

    #[rstest]
    #[case("fifth", Some(5))]
    #[case("first", Some(1))]
    #[case("third", Some(3))]
    #[case("eleventh", Some(11))]
    #[case("twentieth", Some(20))]
    #[case("twenty-first", Some(21))]
    #[case("twelfth", Some(12))]
    #[case("7th", Some(7))]
    fn test_parse_ordinal(#[case] input: &str, #[case] expected: Option<i64>) {
        // ---
        assert_eq!(parse_ordinal(input), expected);
    }

    #[test]
    fn test_parse_perc() {
        // ---
        assert_eq!(parse_perc("12.5%"), Some(0.125));
        assert_eq!(parse_perc("0%"), Some(0.0));
        assert_eq!(parse_perc("n/a"), None);
    }
}
