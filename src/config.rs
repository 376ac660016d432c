use std::path::PathBuf;

use crate::error::Result;

/// Process-level configuration sourced from the environment.
///
/// Everything that can change at runtime (schedules, models, recipients,
/// selection limits) lives in the settings table instead; this struct only
/// carries secrets and machine-local paths.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: String,

    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub market_api_key: Option<String>,

    pub email_api_key: Option<String>,
    pub email_api_url: String,
    pub from_email: String,
    pub from_name: String,
    pub smtp: Option<SmtpConfig>,

    pub dev_mode: bool,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("briefcast")
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(name: &str) -> bool {
    matches!(
        std::env::var(name).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir = env_opt("DATA_DIR").map(PathBuf::from).unwrap_or_else(default_data_dir);
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("briefcast.db").to_string_lossy().to_string();

        let smtp = env_opt("SMTP_HOST").map(|host| SmtpConfig {
            host,
            port: env_opt("SMTP_PORT").and_then(|p| p.parse().ok()).unwrap_or(587),
            username: env_opt("SMTP_USERNAME"),
            password: env_opt("SMTP_PASSWORD"),
            use_tls: env_opt("SMTP_TLS").map(|v| parse_bool(&v)).unwrap_or(true),
        });

        Ok(Self {
            data_dir,
            db_path,
            openai_api_key: env_opt("OPENAI_API_KEY"),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            market_api_key: env_opt("FINNHUB_API_KEY"),
            email_api_key: env_opt("EMAIL_API_KEY"),
            email_api_url: env_opt("EMAIL_API_URL")
                .unwrap_or_else(|| "https://api.resend.com/emails".to_string()),
            from_email: env_opt("FROM_EMAIL").unwrap_or_else(|| "digest@example.com".to_string()),
            from_name: env_opt("FROM_NAME").unwrap_or_else(|| "Briefcast".to_string()),
            smtp,
            dev_mode: env_bool("DEV_MODE"),
        })
    }

    /// Sender in `Name <address>` form, honoring the settings override when set.
    pub fn sender(&self, from_override: Option<&str>) -> String {
        let address = from_override.unwrap_or(&self.from_email);
        format!("{} <{}>", self.from_name, address)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
