use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use parley_gateway::HubConfig;
use parley_gateway::connection::Heartbeat;
use parley_gateway::registry::DEFAULT_QUEUE_DEPTH;
use parley_gateway::store::DEFAULT_MAX_ATTACHMENT_BYTES;

/// Placeholder secret; accepted for local runs but never for real deployments.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub max_attachment_bytes: usize,
    pub heartbeat: Heartbeat,
    pub session_queue: usize,
    pub status_sweep: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys fall back to defaults; set but
    /// unparsable values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "PARLEY_PORT", 8080)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let jwt_secret = lookup("PARLEY_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEV_JWT_SECRET.into());
        if jwt_secret == DEV_JWT_SECRET {
            warn!("PARLEY_JWT_SECRET is unset or a placeholder; tokens are forgeable");
        }

        let heartbeat_secs: u64 = parse_or(&lookup, "PARLEY_HEARTBEAT_SECS", 4)?;
        let grace: u32 = parse_or(&lookup, "PARLEY_HEARTBEAT_GRACE", 3)?;
        let sweep_secs: u64 = parse_or(&lookup, "PARLEY_STATUS_SWEEP_SECS", 300)?;
        if heartbeat_secs == 0 || sweep_secs == 0 {
            anyhow::bail!("PARLEY_HEARTBEAT_SECS and PARLEY_STATUS_SWEEP_SECS must be positive");
        }

        let session_queue = parse_or(&lookup, "PARLEY_SESSION_QUEUE", DEFAULT_QUEUE_DEPTH)?;
        if session_queue == 0 {
            anyhow::bail!("PARLEY_SESSION_QUEUE must be positive");
        }

        Ok(Self {
            addr,
            db_path: lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            jwt_secret,
            max_attachment_bytes: parse_or(&lookup, "PARLEY_MAX_ATTACHMENT_BYTES", DEFAULT_MAX_ATTACHMENT_BYTES)?,
            heartbeat: Heartbeat {
                interval: Duration::from_secs(heartbeat_secs),
                grace,
            },
            session_queue,
            status_sweep: Duration::from_secs(sweep_secs),
        })
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_depth: self.session_queue,
            max_attachment_bytes: self.max_attachment_bytes,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}
