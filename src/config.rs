use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

const DEFAULT_API_BASE: &str = "https://connect.mailerlite.com/api";
const DEFAULT_PORT: u16 = 8000;

/// Runtime configuration, read from the environment once at startup and
/// passed around by reference afterwards.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// MailerLite API key, sent as a bearer token on every outbound call.
    pub mailerlite_api_key: SecretString,
    /// MailerLite group holding subscribers with a running subscription.
    pub active_group_id: Option<String>,
    /// MailerLite group subscribers are moved to when their subscription
    /// stops.
    pub cancelled_group_id: Option<String>,
    /// Shared secret expected in the `Authorization` header of incoming
    /// webhooks. No check is performed when unset.
    pub webhook_secret: Option<String>,
    /// Base URL of the MailerLite API.
    pub api_base: Url,
    pub host: String,
    pub port: u16,
}

impl RelayConfig {
    /// Builds the configuration from environment variables. Optional group
    /// ids and the webhook secret are treated as unset when empty, so an
    /// empty assignment in a `.env` file doesn't half-enable group handling.
    pub fn from_env() -> anyhow::Result<Self> {
        let mailerlite_api_key =
            std::env::var("MAILERLITE_API_KEY").context("MAILERLITE_API_KEY must be set")?;

        let port = match std::env::var("PORT") {
            Ok(port) => port.parse().context("PORT isn't a valid port number")?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            mailerlite_api_key: SecretString::new(mailerlite_api_key),
            active_group_id: env_opt("MAILERLITE_ACTIVE_GROUP_ID"),
            cancelled_group_id: env_opt("MAILERLITE_CANCELLED_GROUP_ID"),
            webhook_secret: env_opt("MEMBERPRESS_WEBHOOK_SECRET"),
            api_base: Url::parse(DEFAULT_API_BASE).context("invalid MailerLite base URL")?,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_owned()),
            port,
        })
    }

    pub fn mailerlite_configured(&self) -> bool {
        !self.mailerlite_api_key.expose_secret().is_empty()
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}
