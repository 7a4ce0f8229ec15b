//! Field normalizer — pure string cleanup applied to extracted resume data.
//!
//! Everything here is deterministic and I/O-free; the extractor and the
//! ingestion pipeline both lean on these contracts.

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Exact brand spellings that plain title-casing would destroy.
const EXACT_BRAND_NAMES: &[(&str, &str)] = &[
    ("nvidia", "NVIDIA"),
    ("pwc", "PwC"),
    ("ibm", "IBM"),
    ("aws", "AWS"),
    ("hp", "HP"),
    ("ge", "GE"),
    ("nasa", "NASA"),
    ("gt", "GT"),
    ("llc", "LLC"),
    ("inc", "Inc"),
    ("corp", "Corp"),
    ("github", "GitHub"),
    ("vmware", "VMware"),
];

/// Articles, prepositions and conjunctions kept lowercase mid-phrase.
const COMMON_LOWERCASE: &[&str] = &[
    "of", "the", "and", "a", "an", "in", "on", "at", "by", "for", "with", "to",
];

static DEGREE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:bachelor(?:['’]s)?|master(?:['’]s)?|doctor(?:ate|al)?|associates?|ph\.?d\.?|b\.?s\.?|b\.?a\.?|m\.?s\.?|m\.?a\.?|a\.?s\.?|a\.?a\.?)\b[^\w]*(?:(?:of|in)\b\s*)?(?:(?:science|arts|engineering|philosophy)\b\s*)?(?:(?:in|of|degree(?:\s+in)?|on|with\s+a\s+focus\s+in|with\s+concentration\s+in|with\s+specialization\s+in)\b\s*)?",
    )
    .unwrap()
});

static PAREN_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)$").unwrap());

static MINOR_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*-\s*(?:minor|concentration|specialization|focus|honors|track|emphasis).*$")
        .unwrap()
});

static WITH_MINOR_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+with\s+(?:minor|concentration|specialization|focus|honors|track|emphasis).*$")
        .unwrap()
});

static LABEL_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:degree|education)\s*:\s*").unwrap());

static PRESENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)present|current").unwrap());

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19[5-9][0-9]|20[0-2][0-9]|2030)\b").unwrap());

/// Title-cases a phrase while preserving canonical brand spellings
/// ("ibm research" -> "IBM Research") and keeping small words lowercase
/// after the first token ("bank of america" -> "Bank of America").
pub fn title_case(text: &str) -> String {
    text.split(' ')
        .enumerate()
        .map(|(index, word)| {
            let lower = word.to_lowercase();
            if let Some((_, canonical)) = EXACT_BRAND_NAMES.iter().find(|(k, _)| *k == lower) {
                return canonical.to_string();
            }
            if index > 0 && COMMON_LOWERCASE.contains(&lower.as_str()) {
                return lower;
            }
            capitalize(word)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips degree classifications and trailing qualifiers from a major:
/// "Bachelor of Science in Computer Science" -> "Computer Science",
/// "Mechanical Engineering (Robotics)" -> "Mechanical Engineering".
pub fn clean_major(major: &str) -> String {
    let cleaned = DEGREE_PREFIX_RE.replace(major, "");
    let cleaned = PAREN_SUFFIX_RE.replace(&cleaned, "");
    let cleaned = MINOR_SUFFIX_RE.replace(&cleaned, "");
    let cleaned = WITH_MINOR_SUFFIX_RE.replace(&cleaned, "");
    let cleaned = LABEL_PREFIX_RE.replace(&cleaned, "");
    cleaned.trim().to_string()
}

/// Returns the latest 4-digit year in [1950, 2030] found in `text`, as a
/// string. "Present"/"Current" count as the current calendar year. Empty
/// string when nothing qualifies.
pub fn extract_latest_year(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let current_year = Utc::now().year().to_string();
    let replaced = PRESENT_RE.replace(text, current_year.as_str());

    YEAR_RE
        .find_iter(&replaced)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
        .max()
        .map(|y| y.to_string())
        .unwrap_or_default()
}

/// First letter of each word uppercased, rest lowercased.
pub fn format_name(name: &str) -> String {
    name.split(' ')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A graduation year is usable only as a bare 4-digit year in [1950, 2030].
pub fn is_valid_graduation_year(year: &str) -> bool {
    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    year.parse::<i32>()
        .map(|y| (1950..=2030).contains(&y))
        .unwrap_or(false)
}

/// Splits a comma-joined field ("Google, IBM , ,NASA") into trimmed,
/// non-empty entries.
pub fn split_csv(text: &str) -> Vec<String> {
    text.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Utc};

    #[test]
    fn test_title_case_brand_spelling() {
        assert_eq!(title_case("ibm research"), "IBM Research");
        assert_eq!(title_case("pwc consulting"), "PwC Consulting");
        assert_eq!(title_case("GITHUB"), "GitHub");
        assert_eq!(title_case("nvidia"), "NVIDIA");
    }

    #[test]
    fn test_title_case_small_words_stay_lowercase() {
        assert_eq!(title_case("bank of america"), "Bank of America");
        assert_eq!(title_case("partners in health"), "Partners in Health");
    }

    #[test]
    fn test_title_case_small_word_first_is_capitalized() {
        assert_eq!(title_case("the home depot"), "The Home Depot");
    }

    #[test]
    fn test_title_case_default_casing() {
        assert_eq!(title_case("sOLAR rACING tEAM"), "Solar Racing Team");
    }

    #[test]
    fn test_title_case_empty() {
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_clean_major_bachelor_of_science() {
        assert_eq!(
            clean_major("Bachelor of Science in Computer Science"),
            "Computer Science"
        );
    }

    #[test]
    fn test_clean_major_abbreviated_degree() {
        assert_eq!(clean_major("B.S. in Computer Engineering"), "Computer Engineering");
        assert_eq!(clean_major("BS in Mathematics"), "Mathematics");
        assert_eq!(clean_major("MS in Analytics"), "Analytics");
    }

    #[test]
    fn test_clean_major_possessive_degree() {
        assert_eq!(clean_major("Master's in Data Science"), "Data Science");
    }

    #[test]
    fn test_clean_major_phd() {
        assert_eq!(clean_major("PhD in Physics"), "Physics");
    }

    #[test]
    fn test_clean_major_trailing_parenthetical() {
        assert_eq!(
            clean_major("Mechanical Engineering (Robotics Track)"),
            "Mechanical Engineering"
        );
    }

    #[test]
    fn test_clean_major_minor_clause() {
        assert_eq!(
            clean_major("Computer Science - Minor in Economics"),
            "Computer Science"
        );
        assert_eq!(
            clean_major("Industrial Engineering with concentration in Supply Chain"),
            "Industrial Engineering"
        );
    }

    #[test]
    fn test_clean_major_label_prefix() {
        assert_eq!(clean_major("Degree: Aerospace Engineering"), "Aerospace Engineering");
    }

    #[test]
    fn test_clean_major_untouched_when_already_clean() {
        assert_eq!(clean_major("Business Administration"), "Business Administration");
        assert_eq!(clean_major("Mathematics"), "Mathematics");
    }

    #[test]
    fn test_extract_latest_year_range() {
        assert_eq!(extract_latest_year("2020-2024"), "2024");
    }

    #[test]
    fn test_extract_latest_year_present_becomes_current_year() {
        let expected = Utc::now().year().to_string();
        assert_eq!(extract_latest_year("expected Present"), expected);
        assert_eq!(extract_latest_year("2019 - current"), expected);
    }

    #[test]
    fn test_extract_latest_year_no_digits() {
        assert_eq!(extract_latest_year("no digits here"), "");
    }

    #[test]
    fn test_extract_latest_year_ignores_out_of_range() {
        assert_eq!(extract_latest_year("1776 and 2031 and 2049"), "");
        assert_eq!(extract_latest_year("1949 1950"), "1950");
    }

    #[test]
    fn test_extract_latest_year_ignores_longer_numbers() {
        assert_eq!(extract_latest_year("id 120233 badge"), "");
    }

    #[test]
    fn test_extract_latest_year_empty() {
        assert_eq!(extract_latest_year(""), "");
    }

    #[test]
    fn test_format_name() {
        assert_eq!(format_name("jOHN dOE"), "John Doe");
        assert_eq!(format_name("alice"), "Alice");
        assert_eq!(format_name(""), "");
    }

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv("Google, IBM , ,NASA"), vec!["Google", "IBM", "NASA"]);
        assert!(split_csv("").is_empty());
        assert!(split_csv(" , ,").is_empty());
    }

    #[test]
    fn test_is_valid_graduation_year() {
        assert!(is_valid_graduation_year("2026"));
        assert!(is_valid_graduation_year("1950"));
        assert!(is_valid_graduation_year("2030"));
        assert!(!is_valid_graduation_year("2031"));
        assert!(!is_valid_graduation_year("1949"));
        assert!(!is_valid_graduation_year("26"));
        assert!(!is_valid_graduation_year("20 26"));
        assert!(!is_valid_graduation_year("Unspecified"));
        assert!(!is_valid_graduation_year(""));
    }
}
