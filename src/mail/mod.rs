use std::time::Duration;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;

use crate::config::{Config, SmtpConfig};
use crate::error::{AppError, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// One rendered email, transport-agnostic.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

enum Backend {
    /// Single JSON POST with bearer auth (Resend-style email API).
    HttpApi {
        client: reqwest::Client,
        api_url: String,
        api_key: String,
    },
    Smtp {
        transport: AsyncSmtpTransport<Tokio1Executor>,
    },
}

/// Delivery behind one capability interface; the pipeline neither knows nor
/// cares which transport is wired up.
pub struct Mailer {
    backend: Backend,
}

impl Mailer {
    /// Prefer the HTTP API when a key is present, fall back to SMTP when a
    /// host is configured, and return `None` when neither is available (the
    /// run then records the digest without sending).
    pub fn from_config(config: &Config) -> Option<Self> {
        if let Some(api_key) = &config.email_api_key {
            let client = reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client");
            return Some(Self {
                backend: Backend::HttpApi {
                    client,
                    api_url: config.email_api_url.clone(),
                    api_key: api_key.clone(),
                },
            });
        }
        if let Some(smtp) = &config.smtp {
            match build_smtp_transport(smtp) {
                Ok(transport) => return Some(Self { backend: Backend::Smtp { transport } }),
                Err(e) => {
                    tracing::warn!("SMTP transport unavailable: {e}");
                    return None;
                }
            }
        }
        None
    }

    pub async fn send(&self, message: &EmailMessage) -> Result<()> {
        if message.to.is_empty() {
            return Err(AppError::Mail("no recipients configured".to_string()));
        }
        match &self.backend {
            Backend::HttpApi { client, api_url, api_key } => {
                let response = client
                    .post(api_url)
                    .bearer_auth(api_key)
                    .json(message)
                    .send()
                    .await
                    .map_err(|e| AppError::Mail(e.to_string()))?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AppError::Mail(format!("email API returned {status}: {body}")));
                }
                Ok(())
            }
            Backend::Smtp { transport } => {
                let email = build_smtp_message(message)?;
                tokio::time::timeout(SEND_TIMEOUT, transport.send(email))
                    .await
                    .map_err(|_| AppError::Mail("SMTP send timed out".to_string()))?
                    .map_err(|e| AppError::Mail(e.to_string()))?;
                Ok(())
            }
        }
    }
}

fn build_smtp_transport(smtp: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let mut builder = if smtp.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| AppError::Mail(e.to_string()))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
    };
    builder = builder.port(smtp.port);
    if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }
    Ok(builder.build())
}

fn build_smtp_message(message: &EmailMessage) -> Result<Message> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| AppError::Mail(format!("invalid from address: {e}")))?;
    let mut builder = Message::builder().from(from).subject(message.subject.clone());
    for recipient in &message.to {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| AppError::Mail(format!("invalid recipient '{recipient}': {e}")))?;
        builder = builder.to(to);
    }
    builder
        .multipart(MultiPart::alternative_plain_html(
            message.text.clone(),
            message.html.clone(),
        ))
        .map_err(|e| AppError::Mail(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: Vec<&str>) -> EmailMessage {
        EmailMessage {
            from: "Briefcast <digest@example.com>".to_string(),
            to: to.into_iter().map(String::from).collect(),
            subject: "Daily Brief — Monday, Aug 3".to_string(),
            html: "<p>hello</p>".to_string(),
            text: "hello".to_string(),
        }
    }

    #[test]
    fn smtp_message_builds_with_alternative_parts() {
        let email = build_smtp_message(&message(vec!["a@example.com", "b@example.com"])).unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("a@example.com"));
        assert!(formatted.contains("b@example.com"));
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        assert!(build_smtp_message(&message(vec!["not-an-address"])).is_err());
        let mut bad_from = message(vec!["a@example.com"]);
        bad_from.from = "???".to_string();
        assert!(build_smtp_message(&bad_from).is_err());
    }

    #[tokio::test]
    async fn empty_recipient_list_fails_before_any_io() {
        let mailer = Mailer {
            backend: Backend::HttpApi {
                client: reqwest::Client::new(),
                api_url: "https://api.example.invalid/emails".to_string(),
                api_key: "key".to_string(),
            },
        };
        let result = mailer.send(&message(vec![])).await;
        assert!(matches!(result, Err(AppError::Mail(_))));
    }

    #[test]
    fn message_serializes_to_the_api_payload_shape() {
        let value = serde_json::to_value(message(vec!["a@example.com"])).unwrap();
        assert!(value.get("from").is_some());
        assert!(value.get("to").unwrap().is_array());
        assert!(value.get("subject").is_some());
        assert!(value.get("html").is_some());
        assert!(value.get("text").is_some());
    }
}
