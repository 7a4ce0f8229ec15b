//! Structured-data extractor — turns raw resume text into `ExtractedFields`
//! via the LLM, tolerating malformed responses and service outages.
//!
//! This module never fails: every path ends in a usable record, worst case
//! the sentinel fallback plus a warning the caller can surface.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::llm_client::{strip_json_fences, LlmClient};
use crate::resumes::normalize::{
    clean_major, extract_latest_year, format_name, is_valid_graduation_year, title_case,
};
use crate::resumes::prompts::{RESUME_PARSE_PROMPT, RESUME_PARSE_SYSTEM};

/// Sentinel for fields the extractor could not determine.
pub const UNSPECIFIED: &str = "Unspecified";

/// Upstream context limit; longer resumes are cut off.
const MAX_PROMPT_CHARS: usize = 25_000;

/// The extractor's output contract: always fully populated, possibly with
/// sentinel or empty values, never partially absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub name: String,
    pub major: String,
    pub graduation_year: String,
    pub companies: Vec<String>,
    pub keywords: Vec<String>,
}

impl ExtractedFields {
    /// Record used when extraction is irrecoverable.
    pub fn fallback() -> Self {
        Self {
            name: String::new(),
            major: UNSPECIFIED.to_string(),
            graduation_year: UNSPECIFIED.to_string(),
            companies: Vec::new(),
            keywords: Vec::new(),
        }
    }
}

/// Extraction result: the fields plus a non-fatal warning when the service
/// degraded to the fallback record.
#[derive(Debug)]
pub struct Extraction {
    pub fields: ExtractedFields,
    pub warning: Option<String>,
}

/// Sends resume text through the LLM and returns best-effort structured
/// fields. Service failures (after the client's bounded retries) degrade to
/// `ExtractedFields::fallback()` with a warning — they never propagate.
pub async fn extract_fields(llm: &LlmClient, raw_text: &str) -> Extraction {
    let truncated = truncate_chars(raw_text, MAX_PROMPT_CHARS);
    let prompt = RESUME_PARSE_PROMPT.replace("{resume_text}", truncated);

    let response = match llm.call(&prompt, RESUME_PARSE_SYSTEM).await {
        Ok(r) => r,
        Err(e) => {
            warn!("AI extraction failed after retries: {e}");
            return Extraction {
                fields: ExtractedFields::fallback(),
                warning: Some(format!("AI extraction failed: {e}")),
            };
        }
    };

    let Some(text) = response.text() else {
        warn!("AI extraction returned no text content");
        return Extraction {
            fields: ExtractedFields::fallback(),
            warning: Some("AI extraction returned no text content".to_string()),
        };
    };

    Extraction {
        fields: normalize_fields(parse_response_text(text)),
        warning: None,
    }
}

/// Raw field values as pulled from the response, before normalization.
#[derive(Debug, Default, PartialEq)]
struct RawFields {
    name: String,
    major: String,
    graduation_year: String,
    companies: Vec<String>,
    keywords: Vec<String>,
}

/// Parses the model's response: fence stripping, then a JSON repair pass,
/// then targeted regexes over the raw text if JSON is beyond saving.
fn parse_response_text(text: &str) -> RawFields {
    let repaired = repair_json(strip_json_fences(text));
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => fields_from_value(&value),
        Err(e) => {
            warn!("LLM response was not parseable JSON ({e}), falling back to regex extraction");
            regex_fallback(text)
        }
    }
}

static UNQUOTED_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());

static SINGLE_QUOTED_VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s*'([^']*)'").unwrap());

/// Best-effort repair of common LLM JSON malformations: unquoted keys,
/// single-quoted values, missing outer braces.
fn repair_json(text: &str) -> String {
    let repaired = UNQUOTED_KEY_RE.replace_all(text.trim(), "$1\"$2\":");
    let repaired = SINGLE_QUOTED_VALUE_RE.replace_all(&repaired, ": \"$1\"");

    let mut repaired = repaired.into_owned();
    if !repaired.starts_with('{') {
        repaired.insert(0, '{');
    }
    if !repaired.ends_with('}') {
        repaired.push('}');
    }
    repaired
}

/// Tolerant field plucking: wrong-typed values count as absent, lists keep
/// only their string entries.
fn fields_from_value(value: &Value) -> RawFields {
    RawFields {
        name: string_field(value, "name"),
        major: string_field(value, "major"),
        graduation_year: string_field(value, "graduationYear"),
        companies: string_list_field(value, "companies"),
        keywords: string_list_field(value, "keywords"),
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list_field(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

static NAME_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""name"\s*:\s*"([^"]+)""#).unwrap());
static MAJOR_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""major"\s*:\s*"([^"]+)""#).unwrap());
static YEAR_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""graduationYear"\s*:\s*"([^"]+)""#).unwrap());
static COMPANIES_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"companies"\s*:\s*\[(.*?)\]"#).unwrap());
static KEYWORDS_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"keywords"\s*:\s*\[(.*?)\]"#).unwrap());

/// Last-resort extraction over the raw response text.
fn regex_fallback(text: &str) -> RawFields {
    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    RawFields {
        name: capture(&NAME_FIELD_RE),
        major: capture(&MAJOR_FIELD_RE),
        graduation_year: capture(&YEAR_FIELD_RE)
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect(),
        companies: capture_list(&COMPANIES_FIELD_RE, text),
        keywords: capture_list(&KEYWORDS_FIELD_RE, text),
    }
}

fn capture_list(re: &Regex, text: &str) -> Vec<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|item| item.trim().trim_matches('"').to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Runs every raw field through the normalizer; years outside [1950, 2030]
/// become empty so the pipeline's defaulting logic takes over.
fn normalize_fields(raw: RawFields) -> ExtractedFields {
    let year = extract_latest_year(&raw.graduation_year);
    let graduation_year = if is_valid_graduation_year(&year) {
        year
    } else {
        String::new()
    };

    ExtractedFields {
        name: format_name(&raw.name),
        major: clean_major(&raw.major),
        graduation_year,
        companies: raw
            .companies
            .iter()
            .map(|c| title_case(c.trim()))
            .filter(|c| !c.is_empty())
            .collect(),
        keywords: raw
            .keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
    }
}

/// Cuts `s` to at most `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let response = r#"{"name": "jane doe", "major": "Computer Science", "graduationYear": "2026", "companies": ["IBM"], "keywords": ["Rust"]}"#;
        let raw = parse_response_text(response);
        assert_eq!(raw.name, "jane doe");
        assert_eq!(raw.major, "Computer Science");
        assert_eq!(raw.graduation_year, "2026");
        assert_eq!(raw.companies, vec!["IBM"]);
        assert_eq!(raw.keywords, vec!["Rust"]);
    }

    #[test]
    fn test_parse_fenced_json() {
        let response = "```json\n{\"name\": \"Jane Doe\", \"major\": \"Math\", \"graduationYear\": \"2025\", \"companies\": [], \"keywords\": []}\n```";
        let raw = parse_response_text(response);
        assert_eq!(raw.name, "Jane Doe");
        assert_eq!(raw.graduation_year, "2025");
    }

    #[test]
    fn test_repair_unquoted_keys() {
        let repaired = repair_json(r#"{name: "Jane", major: "Math"}"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["name"], "Jane");
        assert_eq!(value["major"], "Math");
    }

    #[test]
    fn test_repair_single_quoted_values() {
        let repaired = repair_json(r#"{"name": 'Jane Doe'}"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["name"], "Jane Doe");
    }

    #[test]
    fn test_repair_missing_braces() {
        let repaired = repair_json(r#""name": "Jane""#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["name"], "Jane");
    }

    #[test]
    fn test_wrong_typed_list_becomes_empty() {
        let response = r#"{"name": "Jane", "major": "Math", "graduationYear": "2026", "companies": "IBM", "keywords": 42}"#;
        let raw = parse_response_text(response);
        assert!(raw.companies.is_empty());
        assert!(raw.keywords.is_empty());
    }

    #[test]
    fn test_regex_fallback_on_broken_json() {
        let response = r#"Sure! Here is the data you asked for:
"name": "John Smith" and also "major": "Physics", with "graduationYear": "2024!"
"companies": ["Acme Corp", "NASA"]
"keywords": ["C++", "MATLAB"] trailing garbage {{{"#;
        let raw = parse_response_text(response);
        assert_eq!(raw.name, "John Smith");
        assert_eq!(raw.major, "Physics");
        assert_eq!(raw.graduation_year, "2024");
        assert_eq!(raw.companies, vec!["Acme Corp", "NASA"]);
        assert_eq!(raw.keywords, vec!["C++", "MATLAB"]);
    }

    #[test]
    fn test_regex_fallback_nothing_found() {
        let raw = parse_response_text("I'm sorry, I cannot help with that.");
        assert_eq!(raw, RawFields::default());
    }

    #[test]
    fn test_normalize_fields_applies_cleanup() {
        let raw = RawFields {
            name: "jane doe".to_string(),
            major: "Bachelor of Science in Computer Science".to_string(),
            graduation_year: "2022-2026".to_string(),
            companies: vec!["ibm research".to_string(), "  ".to_string()],
            keywords: vec![" Rust ".to_string()],
        };
        let fields = normalize_fields(raw);
        assert_eq!(fields.name, "Jane Doe");
        assert_eq!(fields.major, "Computer Science");
        assert_eq!(fields.graduation_year, "2026");
        assert_eq!(fields.companies, vec!["IBM Research"]);
        assert_eq!(fields.keywords, vec!["Rust"]);
    }

    #[test]
    fn test_normalize_fields_invalid_year_becomes_empty() {
        let raw = RawFields {
            graduation_year: "long ago".to_string(),
            ..RawFields::default()
        };
        assert_eq!(normalize_fields(raw).graduation_year, "");
    }

    #[test]
    fn test_fallback_record_shape() {
        let fields = ExtractedFields::fallback();
        assert_eq!(fields.name, "");
        assert_eq!(fields.major, UNSPECIFIED);
        assert_eq!(fields.graduation_year, UNSPECIFIED);
        assert!(fields.companies.is_empty());
        assert!(fields.keywords.is_empty());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multi-byte chars must not be split.
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
