use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReasoningLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningLevel::Low => "low",
            ReasoningLevel::Medium => "medium",
            ReasoningLevel::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(ReasoningLevel::Low),
            "medium" => Some(ReasoningLevel::Medium),
            "high" => Some(ReasoningLevel::High),
            _ => None,
        }
    }
}

/// Typed view over the persisted `(key, value)` settings bag.
///
/// Reads are tolerant: malformed or unknown stored values fall back to the
/// defaults below. Writes go through [`AppSettings::validate`], which rejects
/// unknown enum members and out-of-range numbers before they reach the store.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub default_timezone: String,
    pub default_send_times: Vec<String>,
    pub primary_model: String,
    pub secondary_model: Option<String>,
    pub reasoning_level: ReasoningLevel,
    pub default_recipients: Vec<String>,
    pub from_address: Option<String>,
    pub per_source_cap: usize,
    pub max_articles_for_ai: usize,
    pub max_concurrency: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
            default_send_times: vec!["06:30".to_string(), "17:30".to_string()],
            primary_model: "gpt-5-mini".to_string(),
            secondary_model: Some("gemini-2.5-flash".to_string()),
            reasoning_level: ReasoningLevel::Medium,
            default_recipients: Vec::new(),
            from_address: None,
            per_source_cap: 10,
            max_articles_for_ai: 25,
            max_concurrency: 6,
        }
    }
}

impl AppSettings {
    pub fn from_bag(bag: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            default_timezone: bag
                .get("default_timezone")
                .filter(|v| v.parse::<chrono_tz::Tz>().is_ok())
                .cloned()
                .unwrap_or(defaults.default_timezone),
            default_send_times: bag
                .get("default_send_times")
                .map(|v| parse_send_times(v))
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.default_send_times),
            primary_model: bag
                .get("primary_model")
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or(defaults.primary_model),
            secondary_model: bag
                .get("secondary_model")
                .filter(|v| !v.is_empty())
                .cloned()
                .or(defaults.secondary_model),
            reasoning_level: bag
                .get("reasoning_level")
                .and_then(|v| ReasoningLevel::parse(v))
                .unwrap_or(defaults.reasoning_level),
            default_recipients: bag
                .get("default_recipients")
                .map(|v| parse_recipient_list(v))
                .unwrap_or(defaults.default_recipients),
            from_address: bag.get("from_address").filter(|v| !v.is_empty()).cloned(),
            per_source_cap: parse_bounded(bag.get("per_source_cap"), 1, 100, defaults.per_source_cap),
            max_articles_for_ai: parse_bounded(
                bag.get("max_articles_for_ai"),
                1,
                200,
                defaults.max_articles_for_ai,
            ),
            max_concurrency: parse_bounded(bag.get("max_concurrency"), 1, 32, defaults.max_concurrency),
        }
    }

    /// Write-time validation for a single key. Keys the engine does not know
    /// pass through unchanged (they are simply ignored on read).
    pub fn validate(key: &str, value: &str) -> Result<()> {
        let reject = |reason: &str| {
            Err(AppError::InvalidSetting {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };
        match key {
            "default_timezone" => {
                if value.parse::<chrono_tz::Tz>().is_err() {
                    return reject("not an IANA timezone");
                }
            }
            "default_send_times" => {
                if parse_send_times(value).is_empty() {
                    return reject("expected one or more HH:MM entries");
                }
            }
            "reasoning_level" => {
                if ReasoningLevel::parse(value).is_none() {
                    return reject("must be low, medium, or high");
                }
            }
            "per_source_cap" => {
                if !in_range(value, 1, 100) {
                    return reject("must be an integer in 1..=100");
                }
            }
            "max_articles_for_ai" | "max_articles_considered" => {
                if !in_range(value, 1, 200) {
                    return reject("must be an integer in 1..=200");
                }
            }
            "max_concurrency" => {
                if !in_range(value, 1, 32) {
                    return reject("must be an integer in 1..=32");
                }
            }
            "primary_model" => {
                if value.trim().is_empty() {
                    return reject("model id cannot be empty");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn in_range(value: &str, min: usize, max: usize) -> bool {
    value.trim().parse::<usize>().map(|n| n >= min && n <= max).unwrap_or(false)
}

fn parse_bounded(value: Option<&String>, min: usize, max: usize, default: usize) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n >= min && *n <= max)
        .unwrap_or(default)
}

/// Accepts a JSON-stringified array or a comma/newline separated list.
fn parse_send_times(value: &str) -> Vec<String> {
    split_list(value).into_iter().filter(|t| is_valid_time(t)).collect()
}

fn is_valid_time(value: &str) -> bool {
    let Some((hour, minute)) = value.split_once(':') else {
        return false;
    };
    let (Ok(h), Ok(m)) = (hour.parse::<u8>(), minute.parse::<u8>()) else {
        return false;
    };
    hour.len() == 2 && minute.len() == 2 && h < 24 && m < 60
}

/// Normalize recipient input into a deduplicated list. Accepts a JSON array
/// or comma/newline separated addresses, matching what the admin UI stores.
pub fn parse_recipient_list(value: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    split_list(value)
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(parsed) = serde_json::from_str::<Vec<String>>(trimmed) {
            return parsed
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    trimmed
        .split(|c| c == ',' || c == '\n')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_bag_is_empty() {
        let settings = AppSettings::from_bag(&HashMap::new());
        assert_eq!(settings.per_source_cap, 10);
        assert_eq!(settings.max_articles_for_ai, 25);
        assert_eq!(settings.default_send_times, vec!["06:30", "17:30"]);
    }

    #[test]
    fn reads_are_tolerant_of_garbage() {
        let mut bag = HashMap::new();
        bag.insert("per_source_cap".to_string(), "not-a-number".to_string());
        bag.insert("reasoning_level".to_string(), "ultra".to_string());
        bag.insert("default_timezone".to_string(), "Mars/Olympus".to_string());
        let settings = AppSettings::from_bag(&bag);
        assert_eq!(settings.per_source_cap, 10);
        assert_eq!(settings.reasoning_level, ReasoningLevel::Medium);
        assert_eq!(settings.default_timezone, "UTC");
    }

    #[test]
    fn writes_are_validated() {
        assert!(AppSettings::validate("reasoning_level", "high").is_ok());
        assert!(AppSettings::validate("reasoning_level", "ultra").is_err());
        assert!(AppSettings::validate("per_source_cap", "10").is_ok());
        assert!(AppSettings::validate("per_source_cap", "0").is_err());
        assert!(AppSettings::validate("default_send_times", "06:30,17:30").is_ok());
        assert!(AppSettings::validate("default_send_times", "25:99").is_err());
        assert!(AppSettings::validate("default_timezone", "America/Chicago").is_ok());
        assert!(AppSettings::validate("default_timezone", "Nowhere").is_err());
        // Unknown keys are stored verbatim and ignored on read.
        assert!(AppSettings::validate("ui_theme", "dark").is_ok());
    }

    #[test]
    fn recipient_coercion_handles_json_and_csv() {
        assert_eq!(
            parse_recipient_list(r#"["a@x.com", "b@x.com"]"#),
            vec!["a@x.com", "b@x.com"]
        );
        assert_eq!(
            parse_recipient_list("a@x.com, b@x.com\nc@x.com, a@x.com"),
            vec!["a@x.com", "b@x.com", "c@x.com"]
        );
        assert!(parse_recipient_list("  ").is_empty());
    }

    #[test]
    fn send_time_parsing_rejects_malformed_entries() {
        assert_eq!(parse_send_times("06:30,7:30,23:59,24:00"), vec!["06:30", "23:59"]);
    }
}
