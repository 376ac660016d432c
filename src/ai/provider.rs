use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::ReasoningLevel;

/// Model-id prefixes routed through the "responses" request shape instead of
/// chat completions.
pub const RESPONSES_MODEL_PREFIXES: [&str; 3] = ["gpt-5", "o3", "o4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderId {
    OpenAi,
    Gemini,
    Anthropic,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Gemini => "gemini",
            ProviderId::Anthropic => "anthropic",
        }
    }

    pub fn api_key<'a>(&self, config: &'a Config) -> Option<&'a str> {
        match self {
            ProviderId::OpenAi => config.openai_api_key.as_deref(),
            ProviderId::Gemini => config.gemini_api_key.as_deref(),
            ProviderId::Anthropic => config.anthropic_api_key.as_deref(),
        }
    }
}

/// Catalog lookup: which provider serves a model id.
pub fn provider_for_model(model: &str) -> Option<ProviderId> {
    if model.starts_with("gpt-") || model.starts_with("o3") || model.starts_with("o4") {
        Some(ProviderId::OpenAi)
    } else if model.starts_with("gemini") {
        Some(ProviderId::Gemini)
    } else if model.starts_with("claude") {
        Some(ProviderId::Anthropic)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    Chat,
    Responses,
}

pub fn request_shape(model: &str) -> RequestShape {
    if RESPONSES_MODEL_PREFIXES.iter().any(|p| model.starts_with(p)) {
        RequestShape::Responses
    } else {
        RequestShape::Chat
    }
}

/// One step of the cascade: a provider, a model, and its request knobs.
#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: ProviderId,
    pub model: String,
    pub reasoning_effort: Option<ReasoningLevel>,
    pub max_output_tokens: u32,
}

impl ProviderAttempt {
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider.as_str(), self.model)
    }
}

/// A fully shaped HTTP request, ready for the cascade executor.
#[derive(Debug)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

/// Token counts as reported by the provider; zero when unreported.
#[derive(Debug, Clone, Copy, Default)]
pub struct AiUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Shape the prompt into the provider's wire format.
pub fn build_request(
    attempt: &ProviderAttempt,
    api_key: &str,
    system: &str,
    prompt: &str,
) -> PreparedRequest {
    match attempt.provider {
        ProviderId::OpenAi => match request_shape(&attempt.model) {
            RequestShape::Responses => {
                let mut body = json!({
                    "model": attempt.model,
                    "instructions": system,
                    "input": prompt,
                    "max_output_tokens": attempt.max_output_tokens,
                });
                if let Some(effort) = attempt.reasoning_effort {
                    body["reasoning"] = json!({ "effort": effort.as_str() });
                }
                PreparedRequest {
                    url: "https://api.openai.com/v1/responses".to_string(),
                    headers: vec![("authorization", format!("Bearer {api_key}"))],
                    body,
                }
            }
            RequestShape::Chat => PreparedRequest {
                url: "https://api.openai.com/v1/chat/completions".to_string(),
                headers: vec![("authorization", format!("Bearer {api_key}"))],
                body: json!({
                    "model": attempt.model,
                    "messages": [
                        { "role": "system", "content": system },
                        { "role": "user", "content": prompt },
                    ],
                    "max_tokens": attempt.max_output_tokens,
                    "temperature": 0.7,
                }),
            },
        },
        ProviderId::Gemini => PreparedRequest {
            url: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
                attempt.model, api_key
            ),
            headers: Vec::new(),
            body: json!({
                "contents": [ { "parts": [ { "text": format!("{system}\n\n{prompt}") } ] } ],
                "generationConfig": {
                    "temperature": 0.7,
                    "maxOutputTokens": attempt.max_output_tokens,
                },
            }),
        },
        ProviderId::Anthropic => PreparedRequest {
            url: "https://api.anthropic.com/v1/messages".to_string(),
            headers: vec![
                ("x-api-key", api_key.to_string()),
                ("anthropic-version", "2023-06-01".to_string()),
            ],
            body: json!({
                "model": attempt.model,
                "system": system,
                "messages": [ { "role": "user", "content": prompt } ],
                "max_tokens": attempt.max_output_tokens,
                "temperature": 0.7,
            }),
        },
    }
}

/// Extract the output text and token usage from a provider response body.
/// Empty or whitespace-only output is a failure.
pub fn parse_response(attempt: &ProviderAttempt, body: &Value) -> Result<(String, AiUsage)> {
    let (text, usage) = match attempt.provider {
        ProviderId::OpenAi => match request_shape(&attempt.model) {
            RequestShape::Responses => (extract_responses_text(body), responses_usage(body)),
            RequestShape::Chat => (
                body.pointer("/choices/0/message/content")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_default(),
                chat_usage(body),
            ),
        },
        ProviderId::Gemini => {
            let text = body
                .pointer("/candidates/0/content/parts")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            let usage = AiUsage {
                tokens_in: u64_at(body, "/usageMetadata/promptTokenCount"),
                tokens_out: u64_at(body, "/usageMetadata/candidatesTokenCount"),
            };
            (text, usage)
        }
        ProviderId::Anthropic => {
            let text = body
                .get("content")
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            let usage = AiUsage {
                tokens_in: u64_at(body, "/usage/input_tokens"),
                tokens_out: u64_at(body, "/usage/output_tokens"),
            };
            (text, usage)
        }
    };

    if text.trim().is_empty() {
        return Err(AppError::Provider(format!("{}: empty output", attempt.label())));
    }
    Ok((text, usage))
}

/// `output_text` when non-empty, else the concatenation of every
/// `output[*].content[*].text` block.
fn extract_responses_text(body: &Value) -> String {
    if let Some(text) = body.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.to_string();
        }
    }
    body.get("output")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .flatten()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn chat_usage(body: &Value) -> AiUsage {
    AiUsage {
        tokens_in: u64_at(body, "/usage/prompt_tokens"),
        tokens_out: u64_at(body, "/usage/completion_tokens"),
    }
}

fn responses_usage(body: &Value) -> AiUsage {
    AiUsage {
        tokens_in: u64_at(body, "/usage/input_tokens"),
        tokens_out: u64_at(body, "/usage/output_tokens"),
    }
}

fn u64_at(body: &Value, pointer: &str) -> u64 {
    body.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// Retry policy: 429 and 5xx are retryable, other 4xx fail the provider
/// immediately. Network errors are classified retryable by the executor.
pub fn status_is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(provider: ProviderId, model: &str) -> ProviderAttempt {
        ProviderAttempt {
            provider,
            model: model.to_string(),
            reasoning_effort: Some(ReasoningLevel::Medium),
            max_output_tokens: 8000,
        }
    }

    #[test]
    fn model_prefixes_pick_the_request_shape() {
        assert_eq!(request_shape("gpt-5-mini"), RequestShape::Responses);
        assert_eq!(request_shape("o3-pro"), RequestShape::Responses);
        assert_eq!(request_shape("o4-mini"), RequestShape::Responses);
        assert_eq!(request_shape("gpt-4o"), RequestShape::Chat);
        assert_eq!(request_shape("claude-sonnet-4"), RequestShape::Chat);
    }

    #[test]
    fn catalog_maps_models_to_providers() {
        assert_eq!(provider_for_model("gpt-5-mini"), Some(ProviderId::OpenAi));
        assert_eq!(provider_for_model("gemini-2.5-flash"), Some(ProviderId::Gemini));
        assert_eq!(provider_for_model("claude-sonnet-4"), Some(ProviderId::Anthropic));
        assert_eq!(provider_for_model("llama-3"), None);
    }

    #[test]
    fn responses_shape_carries_reasoning_effort() {
        let req = build_request(&attempt(ProviderId::OpenAi, "gpt-5-mini"), "k", "sys", "hi");
        assert!(req.url.ends_with("/responses"));
        assert_eq!(req.body["reasoning"]["effort"], "medium");
        assert_eq!(req.body["instructions"], "sys");
    }

    #[test]
    fn chat_shape_uses_role_tagged_messages() {
        let req = build_request(&attempt(ProviderId::OpenAi, "gpt-4o"), "k", "sys", "hi");
        assert!(req.url.ends_with("/chat/completions"));
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert_eq!(req.body["messages"][1]["content"], "hi");
        assert_eq!(req.body["temperature"], 0.7);
    }

    #[test]
    fn parse_chat_response_extracts_text_and_usage() {
        let body = serde_json::json!({
            "choices": [ { "message": { "content": "A fine briefing" } } ],
            "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
        });
        let (text, usage) = parse_response(&attempt(ProviderId::OpenAi, "gpt-4o"), &body).unwrap();
        assert_eq!(text, "A fine briefing");
        assert_eq!(usage.tokens_in, 100);
        assert_eq!(usage.tokens_out, 50);
    }

    #[test]
    fn parse_responses_walks_output_blocks_when_output_text_is_empty() {
        let body = serde_json::json!({
            "output_text": "",
            "output": [
                { "content": [ { "type": "output_text", "text": "part one " } ] },
                { "content": [ { "type": "output_text", "text": "part two" } ] }
            ],
            "usage": { "input_tokens": 7, "output_tokens": 3 }
        });
        let (text, usage) =
            parse_response(&attempt(ProviderId::OpenAi, "gpt-5-mini"), &body).unwrap();
        assert_eq!(text, "part one part two");
        assert_eq!(usage.tokens_in, 7);
    }

    #[test]
    fn whitespace_only_output_is_a_failure() {
        let body = serde_json::json!({
            "choices": [ { "message": { "content": "   \n" } } ]
        });
        assert!(parse_response(&attempt(ProviderId::OpenAi, "gpt-4o"), &body).is_err());
    }

    #[test]
    fn gemini_and_anthropic_responses_parse() {
        let gemini = serde_json::json!({
            "candidates": [ { "content": { "parts": [ { "text": "gemini says" } ] } } ],
            "usageMetadata": { "promptTokenCount": 11, "candidatesTokenCount": 5 }
        });
        let (text, usage) =
            parse_response(&attempt(ProviderId::Gemini, "gemini-2.5-flash"), &gemini).unwrap();
        assert_eq!(text, "gemini says");
        assert_eq!(usage.tokens_in, 11);

        let anthropic = serde_json::json!({
            "content": [ { "type": "text", "text": "claude says" } ],
            "usage": { "input_tokens": 9, "output_tokens": 4 }
        });
        let (text, usage) =
            parse_response(&attempt(ProviderId::Anthropic, "claude-sonnet-4"), &anthropic).unwrap();
        assert_eq!(text, "claude says");
        assert_eq!(usage.tokens_out, 4);
    }

    #[test]
    fn retry_classification() {
        assert!(status_is_retryable(429));
        assert!(status_is_retryable(500));
        assert!(status_is_retryable(503));
        assert!(!status_is_retryable(400));
        assert!(!status_is_retryable(401));
        assert!(!status_is_retryable(404));
    }
}
