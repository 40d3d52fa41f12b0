use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::generation::ProviderSettings;

pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
pub const DEFAULT_REPLICATE_MODEL_VERSION: &str =
    "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_id: Option<i64>,
    pub database_url: String,
    pub free_generations: i64,
    pub demo_topup_amount: i64,
    pub rate_limit_seconds: u64,
    pub replicate_api_token: String,
    pub replicate_base_url: String,
    pub replicate_model_version: String,
    pub replicate_timeout_seconds: u64,
    pub health_addr: SocketAddr,
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::load);

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn log_level_or_default(value: Option<String>) -> String {
    value
        .map(|level| level.trim().to_lowercase())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Read on its own so logging can start before `CONFIG` reports bad values.
pub fn log_level_from_env() -> String {
    log_level_or_default(env::var("LOG_LEVEL").ok())
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_optional_i64(name: &str) -> Option<i64> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<i64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid {name} value: {trimmed}");
            None
        }
    }
}

fn env_socket_addr(name: &str, default: &str) -> SocketAddr {
    let value = env_string(name, default);
    value.trim().parse::<SocketAddr>().unwrap_or_else(|_| {
        warn!("Ignoring invalid {name} value: {value}");
        default
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)))
    })
}

/// Accepts the SQLAlchemy-style and bare-path spellings used by older deployments.
pub fn normalize_database_url(value: String) -> String {
    let trimmed = value.trim();
    if let Some(rest) = trimmed.strip_prefix("sqlite+aiosqlite://") {
        return format!("sqlite://{rest}");
    }
    if !trimmed.starts_with("sqlite:") {
        return format!("sqlite://{trimmed}");
    }
    trimmed.to_string()
}

impl Config {
    pub fn load() -> Self {
        let free_generations = env_i64("FREE_GENERATIONS", 3).max(0);
        let demo_topup_amount = env_i64("DEMO_TOPUP_AMOUNT", 10).max(1);

        Config {
            bot_token: env_string("BOT_TOKEN", "").trim().to_string(),
            admin_id: env_optional_i64("ADMIN_ID"),
            database_url: normalize_database_url(env_string("DATABASE_URL", "sqlite://users.db")),
            free_generations,
            demo_topup_amount,
            rate_limit_seconds: env_u64("RATE_LIMIT_SECONDS", 5),
            replicate_api_token: env_string("REPLICATE_API_TOKEN", "").trim().to_string(),
            replicate_base_url: env_string("REPLICATE_API_BASE_URL", DEFAULT_REPLICATE_BASE_URL),
            replicate_model_version: env_string(
                "REPLICATE_MODEL_VERSION",
                DEFAULT_REPLICATE_MODEL_VERSION,
            ),
            replicate_timeout_seconds: env_u64("REPLICATE_TIMEOUT_SECONDS", 120).max(1),
            health_addr: env_socket_addr("HEALTH_ADDR", "0.0.0.0:8080"),
        }
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            api_token: self.replicate_api_token.clone(),
            base_url: self.replicate_base_url.clone(),
            model_version: self.replicate_model_version.clone(),
            timeout: Duration::from_secs(self.replicate_timeout_seconds),
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_id == Some(user_id)
    }
}
