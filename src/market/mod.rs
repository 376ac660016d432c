use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::error::Result;
use crate::models::Quote;

const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Per-symbol lookup result. Failures are data, not errors: market trouble
/// never fails a run.
#[derive(Debug)]
pub enum QuoteOutcome {
    Quote(Quote),
    Skipped { symbol: String, reason: String },
}

/// Vendor quote payload. Field names vary by vendor; the aliases cover the
/// short Finnhub form and the spelled-out form.
#[derive(Debug, Deserialize)]
struct QuotePayload {
    #[serde(alias = "c")]
    price: Option<f64>,
    #[serde(alias = "d")]
    change: Option<f64>,
    #[serde(alias = "dp")]
    change_percent: Option<f64>,
}

pub struct MarketDataClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("briefcast/1.0")
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch quotes one symbol at a time. Sequential on purpose: quote
    /// vendors rate-limit aggressively and the watchlist is small.
    pub async fn fetch_quotes(&self, symbols: &[String]) -> Vec<QuoteOutcome> {
        if self.api_key.is_none() {
            tracing::warn!("market data API key not configured; skipping quotes");
            return symbols
                .iter()
                .map(|s| QuoteOutcome::Skipped {
                    symbol: s.clone(),
                    reason: "api key not configured".to_string(),
                })
                .collect();
        }

        let mut outcomes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.fetch_one(symbol).await {
                Ok(quote) => outcomes.push(QuoteOutcome::Quote(quote)),
                Err(e) => {
                    tracing::warn!("quote lookup failed for {symbol}: {e}");
                    outcomes.push(QuoteOutcome::Skipped {
                        symbol: symbol.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcomes
    }

    async fn fetch_one(&self, symbol: &str) -> Result<Quote> {
        let token = self.api_key.as_deref().unwrap_or_default();
        let response = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&[("symbol", symbol), ("token", token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("HTTP {}", response.status()).into());
        }

        let payload: QuotePayload = response.json().await?;
        coerce_quote(symbol, payload)
    }
}

/// Coerce a vendor payload into a quote; missing or non-finite numbers skip
/// the symbol.
fn coerce_quote(symbol: &str, payload: QuotePayload) -> Result<Quote> {
    let price = payload.price.filter(|v| v.is_finite());
    let change = payload.change.filter(|v| v.is_finite());
    let change_percent = payload.change_percent.filter(|v| v.is_finite());
    match (price, change, change_percent) {
        (Some(price), Some(change_amount), Some(change_percent)) => Ok(Quote {
            symbol: symbol.to_uppercase(),
            price,
            change_amount,
            change_percent,
            captured_at: Utc::now(),
        }),
        _ => Err(anyhow::anyhow!("incomplete quote data").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> QuotePayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn maps_short_vendor_field_names() {
        let quote = coerce_quote("aapl", payload(r#"{"c": 212.4, "d": -1.2, "dp": -0.56}"#)).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, 212.4);
        assert_eq!(quote.change_amount, -1.2);
        assert_eq!(quote.change_percent, -0.56);
    }

    #[test]
    fn maps_spelled_out_field_names() {
        let quote = coerce_quote(
            "msft",
            payload(r#"{"price": 410.0, "change": 2.5, "change_percent": 0.61}"#),
        )
        .unwrap();
        assert_eq!(quote.symbol, "MSFT");
        assert_eq!(quote.price, 410.0);
    }

    #[test]
    fn missing_or_non_finite_fields_skip_the_symbol() {
        assert!(coerce_quote("x", payload(r#"{"c": 1.0, "d": 0.1}"#)).is_err());
        assert!(coerce_quote("x", payload(r#"{}"#)).is_err());
        assert!(coerce_quote("x", payload(r#"{"c": null, "d": 0.1, "dp": 0.2}"#)).is_err());
    }

    #[tokio::test]
    async fn missing_api_key_skips_every_symbol() {
        let client = MarketDataClient::new(None);
        let outcomes = client.fetch_quotes(&["AAPL".to_string(), "MSFT".to_string()]).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o, QuoteOutcome::Skipped { .. })));
    }
}
