use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use motorchat_gateway::GatewayConfig;

/// Server settings, read from `MOTORCHAT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = GatewayConfig::default();
        Ok(Self {
            host: std::env::var("MOTORCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("MOTORCHAT_PORT", 3000)?,
            db_path: std::env::var("MOTORCHAT_DB_PATH")
                .unwrap_or_else(|_| "motorchat.db".into())
                .into(),
            jwt_secret: std::env::var("MOTORCHAT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into()),
            gateway: GatewayConfig {
                typing_ttl: Duration::from_secs(env_or(
                    "MOTORCHAT_TYPING_TTL_SECS",
                    defaults.typing_ttl.as_secs(),
                )?),
                heartbeat_interval: Duration::from_secs(env_or(
                    "MOTORCHAT_HEARTBEAT_SECS",
                    defaults.heartbeat_interval.as_secs(),
                )?),
                outbound_capacity: env_or("MOTORCHAT_OUTBOUND_CAPACITY", defaults.outbound_capacity)?,
                presence_retention: Duration::from_secs(env_or(
                    "MOTORCHAT_PRESENCE_RETENTION_SECS",
                    defaults.presence_retention.as_secs(),
                )?),
            },
        })
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
