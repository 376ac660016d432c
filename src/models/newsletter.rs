use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Newsletter {
    pub id: i64,
    pub slug: String,
    pub name: String,
    /// IANA timezone identifier, e.g. `America/New_York`.
    pub timezone: String,
    /// Times of day (`HH:MM`, 24h) at which this newsletter fires.
    pub schedule_times: Vec<String>,
    pub active: bool,
    pub include_watchlist: bool,
    pub newsletter_type: NewsletterType,
    pub verbosity: Verbosity,
    pub custom_prompt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub newsletter_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub enabled: bool,
    pub order_index: i64,
}

impl Feed {
    /// Display name for logs and statuses: title when present, host otherwise.
    pub fn label(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            url::Url::parse(&self.url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .unwrap_or_else(|| self.url.clone())
        })
    }
}

/// Insert payload for a newsletter (admin create path, seeding, tests).
#[derive(Debug, Clone)]
pub struct NewNewsletter {
    pub slug: String,
    pub name: String,
    pub timezone: String,
    pub schedule_times: Vec<String>,
    pub include_watchlist: bool,
    pub newsletter_type: NewsletterType,
    pub verbosity: Verbosity,
    pub custom_prompt: String,
}

/// Insert payload for a feed.
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub newsletter_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub order_index: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewsletterType {
    GeneralBusiness,
    Markets,
    Technology,
}

impl NewsletterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewsletterType::GeneralBusiness => "general_business",
            NewsletterType::Markets => "markets",
            NewsletterType::Technology => "technology",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "general_business" => Some(NewsletterType::GeneralBusiness),
            "markets" => Some(NewsletterType::Markets),
            "technology" => Some(NewsletterType::Technology),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    Low,
    #[default]
    Medium,
    High,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Low => "low",
            Verbosity::Medium => "medium",
            Verbosity::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Verbosity::Low),
            "medium" => Some(Verbosity::Medium),
            "high" => Some(Verbosity::High),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_and_verbosity_round_trip() {
        for t in [
            NewsletterType::GeneralBusiness,
            NewsletterType::Markets,
            NewsletterType::Technology,
        ] {
            assert_eq!(NewsletterType::parse(t.as_str()), Some(t));
        }
        for v in [Verbosity::Low, Verbosity::Medium, Verbosity::High] {
            assert_eq!(Verbosity::parse(v.as_str()), Some(v));
        }
        assert_eq!(NewsletterType::parse("sports"), None);
        assert_eq!(Verbosity::parse("extreme"), None);
    }

    #[test]
    fn feed_label_falls_back_to_host() {
        let feed = Feed {
            id: 1,
            newsletter_id: 1,
            url: "https://news.example.com/rss".to_string(),
            title: None,
            category: None,
            enabled: true,
            order_index: 0,
        };
        assert_eq!(feed.label(), "news.example.com");
    }
}
