use std::env;
use std::time::Duration;

pub const DEFAULT_LEMON_API_BASE_URL: &str = "https://api.lemonsqueezy.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub lemonsqueezy: LemonSqueezyConfig,
    /// Shared secret for the `X-Signature` webhook HMAC
    pub webhook_secret: String,
    /// Instance name reported to the provider when a key is activated
    pub activation_instance_name: String,
}

/// Connection settings for the LemonSqueezy License API.
#[derive(Debug, Clone)]
pub struct LemonSqueezyConfig {
    pub api_key: String,
    pub api_base_url: String,
    /// Per-request timeout for outbound calls
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let timeout_secs: u64 = env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "smartdraft.db".to_string()),
            lemonsqueezy: LemonSqueezyConfig {
                api_key: env::var("LEMON_API_KEY").unwrap_or_default(),
                api_base_url: env::var("LEMON_API_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_LEMON_API_BASE_URL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
            webhook_secret: env::var("LEMON_WEBHOOK_SECRET").unwrap_or_default(),
            activation_instance_name: env::var("LEMON_INSTANCE_NAME")
                .unwrap_or_else(|_| "smartdraft".to_string()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
