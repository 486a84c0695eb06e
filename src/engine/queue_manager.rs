//! Queue Manager (§4.5): holds at most one pending signal per
//! (user, symbol, timeframe, side), scores it by priority tier, and
//! promotes the highest scorer once a pool slot frees up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::constants::*;
use crate::domain::*;
use crate::errors::Result;
use crate::exchange::ExchangeConnector;
use crate::store::Store;

use super::execution_pool::ExecutionPoolManager;

pub struct QueueManager {
    store: Arc<dyn Store>,
    pool: Arc<ExecutionPoolManager>,
    poll_interval: Duration,
}

impl QueueManager {
    pub fn new(store: Arc<dyn Store>, pool: Arc<ExecutionPoolManager>) -> Self {
        Self { store, pool, poll_interval: Duration::from_secs(DEFAULT_QUEUE_POLL_INTERVAL_SECS) }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Insert or replace the queued signal for its (user, symbol, timeframe,
    /// side) key. On replace, bumps `replacement_count` and refreshes
    /// `entry_price`/`signal_payload` while preserving the original
    /// `queued_at` FIFO timestamp (handled by the store's upsert).
    pub async fn add_signal_to_queue(&self, signal: QueuedSignal) -> Result<()> {
        self.store.upsert_queued_signal(signal).await
    }

    /// Computes the strict-tier priority score for `signal` given the
    /// user's currently active groups (used to detect pyramid
    /// continuations).
    pub fn calculate_priority(signal: &QueuedSignal, active_groups: &[PositionGroup]) -> f64 {
        let is_pyramid = active_groups.iter().any(|g| {
            g.exchange == signal.exchange
                && g.symbol == signal.symbol
                && g.timeframe == signal.timeframe
                && g.side == signal.side
                && !g.status.is_terminal()
        });

        let seconds_in_queue = (Utc::now() - signal.queued_at).num_milliseconds() as f64 / 1000.0;
        let time_score = seconds_in_queue.max(0.0) * QUEUE_TIME_IN_QUEUE_WEIGHT;
        let replacement_score = signal.replacement_count as f64 * QUEUE_REPLACEMENT_WEIGHT;

        let loss_percent: f64 = signal.current_loss_percent.to_string().parse().unwrap_or(0.0);
        let is_losing = loss_percent < 0.0;
        let clamped_loss = loss_percent.abs().min(QUEUE_LOSS_PERCENT_CLAMP);
        let loss_score = clamped_loss * QUEUE_LOSS_PERCENT_WEIGHT;

        if is_pyramid {
            QUEUE_TIER_PYRAMID + loss_score + replacement_score + time_score
        } else if is_losing {
            QUEUE_TIER_LOSS + loss_score + replacement_score + time_score
        } else if signal.replacement_count > 0 {
            QUEUE_TIER_REPLACEMENT + replacement_score + time_score
        } else {
            QUEUE_TIER_FIFO + time_score
        }
    }

    fn signed_loss_percent(entry_price: Decimal, current: Decimal, side: Side) -> Decimal {
        if entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let raw = (current - entry_price) / entry_price * Decimal::new(100, 0);
        match side {
            Side::Long => raw,
            Side::Short => -raw,
        }
    }

    /// One promotion cycle: refreshes prices, re-scores every queued signal
    /// per user, and promotes the highest scorer if a slot is available.
    /// Lower-scoring signals never "slip through" a denied higher scorer in
    /// the same cycle.
    pub async fn run_promotion_cycle<F>(&self, exchanges: &IndexMap<String, Arc<dyn ExchangeConnector>>, mut promote: F) -> Result<()>
    where
        F: FnMut(QueuedSignal) -> futures::future::BoxFuture<'static, Result<()>>,
    {
        let mut queued = self.store.list_queued_signals().await?;
        if queued.is_empty() {
            return Ok(());
        }

        let mut by_user: IndexMap<Id, Vec<usize>> = IndexMap::new();
        for (idx, s) in queued.iter().enumerate() {
            by_user.entry(s.user_id).or_default().push(idx);
        }

        for (exchange_name, connector) in exchanges {
            if let Ok(tickers) = connector.get_all_tickers().await {
                for idx in 0..queued.len() {
                    if &queued[idx].exchange != exchange_name {
                        continue;
                    }
                    if let Some(price) = tickers.get(&queued[idx].symbol) {
                        let entry = queued[idx].entry_price;
                        let side = queued[idx].side;
                        queued[idx].current_loss_percent = Self::signed_loss_percent(entry, *price, side);
                    }
                }
            }
        }

        for (user_id, indices) in by_user {
            let active_groups = self.store.list_active_groups_for_user(user_id).await?;
            for &idx in &indices {
                let score = Self::calculate_priority(&queued[idx], &active_groups);
                queued[idx].priority_score = score;
                queued[idx].is_pyramid_continuation = active_groups.iter().any(|g| {
                    g.exchange == queued[idx].exchange
                        && g.symbol == queued[idx].symbol
                        && g.timeframe == queued[idx].timeframe
                        && g.side == queued[idx].side
                });
                self.store.update_queued_signal(queued[idx].clone()).await?;
            }

            let user = self.store.get_user(user_id).await?;
            if user.risk_config.engine_force_stopped || user.risk_config.engine_paused_by_loss_limit {
                debug!(user_id = %user_id, "promotion denied, engine paused or force-stopped for this user");
                continue;
            }

            let mut user_signals: Vec<&QueuedSignal> = indices.iter().map(|&i| &queued[i]).collect();
            user_signals.sort_by(|a, b| b.priority_score.partial_cmp(&a.priority_score).unwrap());

            if let Some(best) = user_signals.first() {
                let slot_granted = if best.is_pyramid_continuation {
                    self.pool.bypass()
                } else {
                    self.pool.request_slot(user_id).await
                };
                if slot_granted {
                    let mut promoted = (*best).clone();
                    promoted.status = QueuedSignalStatus::Promoted;
                    promoted.promoted_at = Some(Utc::now());
                    self.store.upsert_queued_signal(promoted.clone()).await?;
                    info!(user_id = %user_id, signal_id = %promoted.id, score = promoted.priority_score, "signal promoted");
                    if let Err(e) = promote(promoted).await {
                        warn!(user_id = %user_id, error = %e, "promotion dispatch failed");
                    }
                } else {
                    debug!(user_id = %user_id, "no slot available this cycle");
                }
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
