use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MONITOR_CONCURRENCY_PER_USER, DEFAULT_MONITOR_POLL_INTERVAL_SECS, DEFAULT_QUEUE_POLL_INTERVAL_SECS,
    DEFAULT_RISK_POLL_INTERVAL_SECS, LEADER_LOCK_TTL_SECS,
};
use crate::errors::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mock_exchange_base_url: String,
    pub coordination_redis_url: Option<String>,

    pub queue_poll_interval: Duration,
    pub fill_monitor_poll_interval: Duration,
    pub risk_engine_poll_interval: Duration,
    pub fill_monitor_concurrency_per_user: usize,

    pub leader_lock_ttl: Duration,

    pub default_max_open_positions_global: u32,
    pub default_max_open_positions_per_symbol: u32,
    pub default_max_total_exposure_usd: f64,
    pub default_max_daily_loss_usd: f64,

    pub metrics_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mock_exchange_base_url: env::var("MOCK_EXCHANGE_BASE_URL")
                .unwrap_or_else(|_| "mock://localhost".to_string()),
            coordination_redis_url: env::var("COORDINATION_REDIS_URL").ok(),

            queue_poll_interval: Duration::from_secs(Self::parse_env(
                "QUEUE_POLL_INTERVAL_SECS",
                DEFAULT_QUEUE_POLL_INTERVAL_SECS,
            )),
            fill_monitor_poll_interval: Duration::from_secs(Self::parse_env(
                "FILL_MONITOR_POLL_INTERVAL_SECS",
                DEFAULT_MONITOR_POLL_INTERVAL_SECS,
            )),
            risk_engine_poll_interval: Duration::from_secs(Self::parse_env(
                "RISK_ENGINE_POLL_INTERVAL_SECS",
                DEFAULT_RISK_POLL_INTERVAL_SECS,
            )),
            fill_monitor_concurrency_per_user: Self::parse_env(
                "FILL_MONITOR_CONCURRENCY_PER_USER",
                DEFAULT_MONITOR_CONCURRENCY_PER_USER as u64,
            ) as usize,

            leader_lock_ttl: Duration::from_secs(Self::parse_env("LEADER_LOCK_TTL_SECS", LEADER_LOCK_TTL_SECS)),

            default_max_open_positions_global: Self::parse_env("DEFAULT_MAX_OPEN_POSITIONS_GLOBAL", 10),
            default_max_open_positions_per_symbol: Self::parse_env("DEFAULT_MAX_OPEN_POSITIONS_PER_SYMBOL", 2),
            default_max_total_exposure_usd: env::var("DEFAULT_MAX_TOTAL_EXPOSURE_USD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000.0),
            default_max_daily_loss_usd: env::var("DEFAULT_MAX_DAILY_LOSS_USD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500.0),

            metrics_port: Self::parse_env("METRICS_PORT", 9464),
        })
    }

    fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
        env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mock_exchange_base_url.is_empty() {
            return Err(EngineError::config("mock exchange base URL must not be empty"));
        }
        if self.fill_monitor_concurrency_per_user == 0 {
            return Err(EngineError::config("fill monitor concurrency must be at least 1"));
        }
        if self.default_max_total_exposure_usd <= 0.0 {
            return Err(EngineError::config("default max total exposure must be positive"));
        }
        Ok(())
    }
}
