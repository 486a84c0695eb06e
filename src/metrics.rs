//! Prometheus metrics (§10.4): one registry shared across every component,
//! exposed by whatever HTTP surface the embedder wires up. This crate only
//! owns the collectors and the increment/observe call sites.

use std::sync::Arc;

use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};
use tracing::info;

use crate::errors::Result;

#[derive(Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,

    pub orders_submitted_total: CounterVec,
    pub orders_filled_total: CounterVec,
    pub orders_cancelled_total: CounterVec,

    pub take_profit_armed_total: Counter,
    pub take_profit_hit_total: CounterVec,

    pub groups_opened_total: Counter,
    pub groups_closed_total: CounterVec,

    pub risk_actions_total: Counter,
    pub risk_engine_paused_users: Gauge,

    pub queue_depth: Gauge,
    pub queue_promotions_total: Counter,
    pub queue_denials_total: Counter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let orders_submitted_total = CounterVec::new(
            Opts::new("orders_submitted_total", "Total DCA leg orders submitted to an exchange"),
            &["exchange", "side"],
        )?;
        let orders_filled_total = CounterVec::new(
            Opts::new("orders_filled_total", "Total DCA leg orders observed as filled"),
            &["exchange", "side"],
        )?;
        let orders_cancelled_total = CounterVec::new(
            Opts::new("orders_cancelled_total", "Total DCA leg orders cancelled"),
            &["exchange", "reason"],
        )?;

        let take_profit_armed_total =
            Counter::new("take_profit_armed_total", "Total per-leg take-profit orders armed")?;
        let take_profit_hit_total = CounterVec::new(
            Opts::new("take_profit_hit_total", "Total take-profit triggers by mode"),
            &["tp_mode"],
        )?;

        let groups_opened_total =
            Counter::new("position_groups_opened_total", "Total position groups created")?;
        let groups_closed_total = CounterVec::new(
            Opts::new("position_groups_closed_total", "Total position groups closed"),
            &["reason"],
        )?;

        let risk_actions_total =
            Counter::new("risk_actions_total", "Total hedge actions executed by the risk engine")?;
        let risk_engine_paused_users =
            Gauge::new("risk_engine_paused_users", "Users currently paused by the daily loss limit")?;

        let queue_depth = Gauge::new("queue_depth", "Signals currently waiting in the promotion queue")?;
        let queue_promotions_total =
            Counter::new("queue_promotions_total", "Total signals promoted from the queue")?;
        let queue_denials_total =
            Counter::new("queue_denials_total", "Total promotion attempts denied an execution pool slot")?;

        registry.register(Box::new(orders_submitted_total.clone()))?;
        registry.register(Box::new(orders_filled_total.clone()))?;
        registry.register(Box::new(orders_cancelled_total.clone()))?;
        registry.register(Box::new(take_profit_armed_total.clone()))?;
        registry.register(Box::new(take_profit_hit_total.clone()))?;
        registry.register(Box::new(groups_opened_total.clone()))?;
        registry.register(Box::new(groups_closed_total.clone()))?;
        registry.register(Box::new(risk_actions_total.clone()))?;
        registry.register(Box::new(risk_engine_paused_users.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(queue_promotions_total.clone()))?;
        registry.register(Box::new(queue_denials_total.clone()))?;

        info!(collectors = registry.gather().len(), "engine metrics initialized");

        Ok(Self {
            registry,
            orders_submitted_total,
            orders_filled_total,
            orders_cancelled_total,
            take_profit_armed_total,
            take_profit_hit_total,
            groups_opened_total,
            groups_closed_total,
            risk_actions_total,
            risk_engine_paused_users,
            queue_depth,
            queue_promotions_total,
            queue_denials_total,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}
