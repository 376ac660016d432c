use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::ai::provider::{
    build_request, parse_response, provider_for_model, status_is_retryable, AiUsage,
    ProviderAttempt, ProviderId,
};
use crate::config::Config;
use crate::models::{AppSettings, RankedItem};
use crate::pipeline::{CancelFlag, RunRecorder};

const MAX_TRIES_PER_PROVIDER: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const MAX_OUTPUT_TOKENS: u32 = 8000;
const ERROR_SNIPPET_MAX: usize = 500;
const HEADLINES_MAX_ITEMS: usize = 12;

/// Provider label recorded when the cascade is exhausted and the digest falls
/// back to the deterministic headlines document.
pub const HEADLINES_LABEL: &str = "headlines-only";

#[derive(Debug, Clone)]
pub struct AiOutcome {
    pub text: String,
    pub provider_label: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

#[derive(Debug)]
struct ProviderFailure {
    status: Option<u16>,
    message: String,
}

/// The ordered list of provider attempts for a run.
pub struct Cascade {
    client: Client,
    attempts: Vec<(ProviderAttempt, String)>,
}

impl Cascade {
    /// Build the pipeline from the configured primary/secondary models,
    /// skipping models without a catalog entry or a credential.
    pub fn from_settings(settings: &AppSettings, config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        let mut models = vec![settings.primary_model.clone()];
        if let Some(secondary) = &settings.secondary_model {
            if secondary != &settings.primary_model {
                models.push(secondary.clone());
            }
        }

        let mut attempts = Vec::new();
        for model in models {
            let Some(provider) = provider_for_model(&model) else {
                tracing::warn!("unknown model '{model}' in cascade; skipping");
                continue;
            };
            let Some(api_key) = provider.api_key(config) else {
                tracing::warn!(
                    "no credential for provider '{}'; skipping model '{model}'",
                    provider.as_str()
                );
                continue;
            };
            attempts.push((
                ProviderAttempt {
                    provider,
                    model,
                    reasoning_effort: (provider == ProviderId::OpenAi)
                        .then_some(settings.reasoning_level),
                    max_output_tokens: MAX_OUTPUT_TOKENS,
                },
                api_key.to_string(),
            ));
        }

        Self { client, attempts }
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Walk the cascade until a provider produces text. Returns `None` when
    /// every provider failed (the caller synthesizes the headlines fallback).
    pub async fn generate(
        &self,
        system: &str,
        prompt: &str,
        recorder: &RunRecorder,
        cancel: &CancelFlag,
    ) -> Option<AiOutcome> {
        for (attempt, api_key) in &self.attempts {
            if cancel.is_cancelled() {
                recorder.warn("ai.skipped: run cancelled", None);
                return None;
            }
            match self.call_provider(attempt, api_key, system, prompt).await {
                Ok((text, usage)) => {
                    recorder.info(
                        "ai.result",
                        Some(json!({
                            "provider_id": attempt.provider.as_str(),
                            "model_id": attempt.model,
                            "tokens_in": usage.tokens_in,
                            "tokens_out": usage.tokens_out,
                        })),
                    );
                    return Some(AiOutcome {
                        text,
                        provider_label: attempt.label(),
                        tokens_in: usage.tokens_in,
                        tokens_out: usage.tokens_out,
                    });
                }
                Err(failure) => {
                    recorder.warn(
                        "ai.failed",
                        Some(json!({
                            "provider_id": attempt.provider.as_str(),
                            "model_id": attempt.model,
                            "status": failure.status,
                            "error_snippet": failure.message,
                        })),
                    );
                }
            }
        }
        None
    }

    /// One provider with retries: up to three tries, exponential backoff,
    /// retrying only network errors and HTTP 429/5xx.
    async fn call_provider(
        &self,
        attempt: &ProviderAttempt,
        api_key: &str,
        system: &str,
        prompt: &str,
    ) -> std::result::Result<(String, AiUsage), ProviderFailure> {
        let mut last_failure = ProviderFailure {
            status: None,
            message: "no attempt made".to_string(),
        };

        for try_index in 0..MAX_TRIES_PER_PROVIDER {
            if try_index > 0 {
                let backoff = BACKOFF_BASE_MS * 2u64.pow(try_index - 1);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let request = build_request(attempt, api_key, system, prompt);
            let mut builder = self.client.post(&request.url).json(&request.body);
            for (name, value) in &request.headers {
                builder = builder.header(*name, value.as_str());
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    // Network-level trouble: eligible for another try.
                    last_failure = ProviderFailure {
                        status: None,
                        message: snippet(&e.to_string()),
                    };
                    continue;
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                let failure = ProviderFailure {
                    status: Some(status),
                    message: snippet(&body),
                };
                if status_is_retryable(status) {
                    last_failure = failure;
                    continue;
                }
                return Err(failure);
            }

            let body: serde_json::Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    return Err(ProviderFailure {
                        status: Some(status),
                        message: snippet(&e.to_string()),
                    });
                }
            };
            return parse_response(attempt, &body).map_err(|e| ProviderFailure {
                status: Some(status),
                message: snippet(&e.to_string()),
            });
        }

        Err(last_failure)
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= ERROR_SNIPPET_MAX {
        return text.to_string();
    }
    text.chars().take(ERROR_SNIPPET_MAX).collect()
}

/// Deterministic digest body used when every provider failed: a fixed
/// headlines list, at most twelve items.
pub fn headlines_fallback(items: &[RankedItem]) -> String {
    let mut lines = vec!["### Headlines".to_string(), String::new()];
    if items.is_empty() {
        lines.push("- No fresh articles were selected for this run.".to_string());
    }
    for ranked in items.iter().take(HEADLINES_MAX_ITEMS) {
        lines.push(format!(
            "- **{}** — [{}]({})",
            ranked.item.title, ranked.item.source, ranked.item.canonical_url
        ));
    }
    lines.join("\n")
}
