use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use huddle_gateway::GatewayConfig;

/// Secrets that ship in sample env files and must never sign real tokens.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "changeme",
    "change-me",
    "secret",
    "your-secret-here",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub heartbeat_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let jwt_secret = get("HUDDLE_JWT_SECRET").context("HUDDLE_JWT_SECRET is required")?;
        if PLACEHOLDER_SECRETS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&jwt_secret))
        {
            bail!("HUDDLE_JWT_SECRET is a placeholder value, set a real secret");
        }

        let port = match get("HUDDLE_PORT") {
            Some(p) => p.parse().with_context(|| format!("invalid HUDDLE_PORT: {p}"))?,
            None => 8080,
        };
        let heartbeat_secs: u64 = match get("HUDDLE_HEARTBEAT_SECS") {
            Some(s) => s
                .parse()
                .with_context(|| format!("invalid HUDDLE_HEARTBEAT_SECS: {s}"))?,
            None => 15,
        };
        if heartbeat_secs == 0 {
            bail!("HUDDLE_HEARTBEAT_SECS must be at least 1");
        }

        Ok(Self {
            host: get("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(get("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into())),
            jwt_secret,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            heartbeat_interval: self.heartbeat_interval,
            ..GatewayConfig::default()
        }
    }
}
