use std::time::Duration;

pub const DEFAULT_QUEUE_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MONITOR_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_RISK_POLL_INTERVAL_SECS: u64 = 30;

pub const DEFAULT_MONITOR_CONCURRENCY_PER_USER: usize = 10;

pub const PRECISION_CACHE_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);
pub const TICKER_CACHE_TTL: Duration = Duration::from_secs(5);
pub const CONFIG_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

pub const LEADER_LOCK_TTL_SECS: u64 = 60;
pub const LEADER_RENEWAL_INTERVAL_SECS: u64 = 30;
pub const HEARTBEAT_TTL_SECS: u64 = 5 * 60;

pub const QUEUE_TIER_PYRAMID: f64 = 1.0e7;
pub const QUEUE_TIER_LOSS: f64 = 1.0e6;
pub const QUEUE_TIER_REPLACEMENT: f64 = 1.0e4;
pub const QUEUE_TIER_FIFO: f64 = 1.0e3;
pub const QUEUE_LOSS_PERCENT_WEIGHT: f64 = 1.0e4;
pub const QUEUE_REPLACEMENT_WEIGHT: f64 = 100.0;
pub const QUEUE_TIME_IN_QUEUE_WEIGHT: f64 = 1.0e-3;
/// Clamp applied to |loss_percent| in the Tier-B sub-score so an extreme
/// loss can never add up to or past the Tier-A base.
pub const QUEUE_LOSS_PERCENT_CLAMP: f64 = 99.0;

pub const DEFAULT_MAX_WINNERS_TO_COMBINE: usize = 3;

pub const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 30;
