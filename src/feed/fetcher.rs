use std::time::Duration;

use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::feed::parser::normalize_feed;
use crate::models::{Feed, NormalizedItem};

const ACCEPT_HEADER: &str = "application/rss+xml, application/atom+xml, application/xml;q=0.9";

/// Outcome of fetching a single feed. One failing feed never fails another;
/// the aggregate fetch always returns an entry per input feed.
#[derive(Debug)]
pub struct FeedFetch {
    pub feed: Feed,
    pub outcome: std::result::Result<Vec<NormalizedItem>, FetchError>,
}

#[derive(Debug)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

/// Transport trouble and malformed documents are reported separately; the
/// run log names them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Unreachable,
    ParseInvalid,
}

pub struct FeedFetcher {
    client: Client,
    max_in_flight: usize,
}

impl FeedFetcher {
    pub fn new(timeout: Duration, max_in_flight: usize) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("briefcast/1.0 (+https://github.com/briefcast)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub async fn fetch_feed(&self, url: &str) -> std::result::Result<Vec<NormalizedItem>, FetchError> {
        let unreachable = |message: String| FetchError {
            kind: FetchErrorKind::Unreachable,
            message,
        };

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| unreachable(e.to_string()))?;
        let feed = parser::parse(&bytes[..]).map_err(|e| FetchError {
            kind: FetchErrorKind::ParseInvalid,
            message: e.to_string(),
        })?;
        Ok(normalize_feed(feed))
    }

    /// Fetch every enabled feed with bounded concurrency, all-settled: the
    /// result vector carries a per-feed outcome rather than a combined error.
    pub async fn fetch_all(&self, feeds: Vec<Feed>) -> Vec<FeedFetch> {
        stream::iter(feeds)
            .map(|feed| async move {
                match self.fetch_feed(&feed.url).await {
                    Ok(items) => {
                        tracing::debug!("Fetched {} items from {}", items.len(), feed.label());
                        FeedFetch {
                            feed,
                            outcome: Ok(items),
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Failed to fetch {}: {}", feed.url, e.message);
                        FeedFetch {
                            feed,
                            outcome: Err(e),
                        }
                    }
                }
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(id: i64, url: &str) -> Feed {
        Feed {
            id,
            newsletter_id: 1,
            url: url.to_string(),
            title: None,
            category: None,
            enabled: true,
            order_index: id,
        }
    }

    #[tokio::test]
    async fn unreachable_feeds_settle_as_errors() {
        // Reserved TEST-NET-1 address: connection fails fast, nothing listens.
        let fetcher = FeedFetcher::new(Duration::from_millis(500), 2);
        let results = fetcher
            .fetch_all(vec![
                feed(1, "http://192.0.2.1/feed.xml"),
                feed(2, "http://192.0.2.2/feed.xml"),
            ])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(&r.outcome, Err(e) if e.kind == FetchErrorKind::Unreachable)));
    }
}
