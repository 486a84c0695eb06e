//! Risk Engine (§4.9): per-user scheduled pre-trade checks, risk-timer
//! maintenance, loser/winner selection, and hedge execution. One process-wide
//! loop evaluates every user in isolation; a failure for one user never
//! aborts the cycle for the rest.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::domain::*;
use crate::errors::{EngineError, Result};
use crate::exchange::ExchangeConnector;
use crate::grid::{self, PrecisionRules};
use crate::store::Store;

use super::execution_pool::ExecutionPoolManager;
use super::order_service::OrderService;

pub struct RiskEngine {
    store: Arc<dyn Store>,
    pool: Arc<ExecutionPoolManager>,
}

fn signed_pnl(side: Side, entry: Decimal, current: Decimal, quantity: Decimal) -> Decimal {
    match side {
        Side::Long => (current - entry) * quantity,
        Side::Short => (entry - current) * quantity,
    }
}

fn all_orders_at_least_open(orders: &[DCAOrder]) -> bool {
    orders.iter().all(|o| o.status.is_open() || o.status.is_terminal())
}

/// Plans which winners to partially close to raise `required_usd`,
/// conservatively floor-snapping quantities and skipping any winner whose
/// planned close would fall below exchange minimums.
pub fn plan_partial_closes(
    winners: &[PositionGroup],
    current_prices: &HashMap<Id, Decimal>,
    precisions: &HashMap<Id, PrecisionRules>,
    required_usd: Decimal,
) -> Vec<WinnerContribution> {
    let mut remaining = required_usd;
    let mut plan = Vec::new();
    for winner in winners {
        if remaining <= Decimal::ZERO {
            break;
        }
        let (Some(&price), Some(precision)) = (current_prices.get(&winner.id), precisions.get(&winner.id)) else {
            continue;
        };
        let price_delta = match winner.side {
            Side::Long => price - winner.weighted_avg_entry,
            Side::Short => winner.weighted_avg_entry - price,
        };
        if price_delta <= Decimal::ZERO {
            continue;
        }
        let profit_to_take = winner.unrealized_pnl_usd.min(remaining);
        let raw_qty = profit_to_take / price_delta;
        let qty = grid::snap_quantity(raw_qty, precision.step_size).min(winner.total_filled_quantity);
        if qty.is_zero() || qty * price < precision.min_notional {
            continue;
        }
        let contribution = qty * price_delta;
        plan.push(WinnerContribution { group_id: winner.id, pnl_usd: contribution, quantity_closed: qty });
        remaining -= contribution;
    }
    plan
}

impl RiskEngine {
    pub fn new(store: Arc<dyn Store>, pool: Arc<ExecutionPoolManager>) -> Self {
        Self { store, pool }
    }

    /// Invoked by the Signal Router / Position Creator before committing
    /// capital to a new group or pyramid. Pyramid continuations skip the
    /// position-count checks, per §4.9.1.
    pub async fn validate_pre_trade_risk(
        &self,
        user_id: Id,
        symbol: &str,
        proposed_allocation_usd: Decimal,
        is_pyramid_continuation: bool,
    ) -> Result<()> {
        let user = self.store.get_user(user_id).await?;
        let cfg = &user.risk_config;
        if cfg.engine_force_stopped {
            return Err(EngineError::validation("engine force-stopped for this user"));
        }
        if cfg.engine_paused_by_loss_limit {
            return Err(EngineError::validation("engine paused by daily loss limit"));
        }

        let active = self.store.list_active_groups_for_user(user_id).await?;
        if !is_pyramid_continuation {
            if active.len() as u32 >= cfg.max_open_positions_global {
                return Err(EngineError::validation("max_open_positions_global exceeded"));
            }
            let per_symbol = active.iter().filter(|g| g.symbol == symbol).count() as u32;
            if per_symbol >= cfg.max_open_positions_per_symbol {
                return Err(EngineError::validation("max_open_positions_per_symbol exceeded"));
            }
        }

        let total_invested: Decimal = active.iter().map(|g| g.total_invested_usd).sum();
        if total_invested + proposed_allocation_usd > cfg.max_total_exposure_usd {
            return Err(EngineError::validation("max_total_exposure_usd exceeded"));
        }

        let today_realized = self.realized_pnl_today(user_id).await?;
        if today_realized <= -cfg.max_daily_loss_usd {
            self.pause_for_loss_limit(user_id).await?;
            return Err(EngineError::validation("daily loss limit reached"));
        }
        Ok(())
    }

    /// Realized PnL booked by this engine's own hedge actions today (UTC
    /// day). Ordinary take-profit closes realize PnL on their PositionGroup
    /// directly; once closed, a group falls outside every `Store` query this
    /// crate exposes, so the daily-loss gate tracks hedge-driven realizations
    /// only. An embedder with a closed-positions ledger can widen this.
    async fn realized_pnl_today(&self, user_id: Id) -> Result<Decimal> {
        let today = Utc::now().date_naive();
        let actions = self.store.list_risk_actions_for_user(user_id).await?;
        Ok(actions
            .iter()
            .filter(|a| a.timestamp.date_naive() == today)
            .map(|a| a.loser_pnl_usd + a.winners.iter().map(|w| w.pnl_usd).sum::<Decimal>())
            .sum())
    }

    async fn pause_for_loss_limit(&self, user_id: Id) -> Result<()> {
        let mut user = self.store.get_user(user_id).await?;
        if !user.risk_config.engine_paused_by_loss_limit {
            user.risk_config.engine_paused_by_loss_limit = true;
            self.store.put_user(user).await?;
            warn!(%user_id, "daily loss limit reached, engine paused");
        }
        Ok(())
    }

    /// Clears both pause flags for a user, per the administrative
    /// `force_start_engine` action.
    pub async fn force_start_engine(&self, user_id: Id) -> Result<()> {
        let mut user = self.store.get_user(user_id).await?;
        user.risk_config.engine_paused_by_loss_limit = false;
        user.risk_config.engine_force_stopped = false;
        self.store.put_user(user).await?;
        Ok(())
    }

    /// Sets `engine_force_stopped` and cancels every queued (not yet
    /// promoted) signal for the user.
    pub async fn force_stop_engine(&self, user_id: Id) -> Result<()> {
        let mut user = self.store.get_user(user_id).await?;
        user.risk_config.engine_force_stopped = true;
        self.store.put_user(user).await?;

        let queued = self.store.list_queued_signals().await?;
        for mut signal in queued.into_iter().filter(|s| s.user_id == user_id) {
            signal.status = QueuedSignalStatus::Cancelled;
            self.store.update_queued_signal(signal).await?;
        }
        Ok(())
    }

    async fn maintain_timers_for_user(&self, user_id: Id, cfg: &RiskEngineConfig) -> Result<()> {
        let groups = self.store.list_active_groups_for_user(user_id).await?;
        let now = Utc::now();
        for mut group in groups {
            let mut changed = false;

            if group.risk_timer_start.is_none() {
                let condition_met = match cfg.timer_start_condition {
                    TimerStartCondition::AfterAllDcaSubmitted => {
                        let orders = self.store.list_orders_for_group(group.id).await?;
                        !orders.is_empty() && all_orders_at_least_open(&orders)
                    }
                    TimerStartCondition::AfterAllDcaFilled => {
                        group.total_dca_legs > 0 && group.filled_dca_legs == group.total_dca_legs
                    }
                    TimerStartCondition::After5Pyramids => group.pyramid_count == group.max_pyramids,
                };
                if condition_met {
                    group.risk_timer_start = Some(now);
                    group.risk_timer_expires = Some(now + ChronoDuration::minutes(cfg.post_full_wait_minutes));
                    changed = true;
                }
            }

            if !group.risk_eligible {
                if let Some(expires) = group.risk_timer_expires {
                    if now >= expires {
                        group.risk_eligible = true;
                        changed = true;
                    }
                }
            }

            if changed {
                self.store.update_group(group).await?;
            }
        }
        Ok(())
    }

    async fn select_loser_and_winners(
        &self,
        user_id: Id,
        cfg: &RiskEngineConfig,
        exchange: &dyn ExchangeConnector,
    ) -> Result<Option<(PositionGroup, Vec<PositionGroup>, Decimal)>> {
        let mut groups = self.store.list_active_groups_for_user(user_id).await?;
        let now = Utc::now();

        for group in groups.iter_mut() {
            if let Ok(price) = exchange.get_current_price(&group.symbol).await {
                group.unrealized_pnl_usd = signed_pnl(group.side, group.weighted_avg_entry, price, group.total_filled_quantity);
                group.unrealized_pnl_percent = if group.total_invested_usd.is_zero() {
                    Decimal::ZERO
                } else {
                    group.unrealized_pnl_usd / group.total_invested_usd * Decimal::new(100, 0)
                };
                self.store.update_group(group.clone()).await?;
            }
        }

        let mut skip_once_cleared = Vec::new();
        let mut eligible: Vec<&PositionGroup> = groups
            .iter()
            .filter(|g| {
                if g.status != PositionGroupStatus::Active || !g.risk_eligible || g.risk_blocked {
                    return false;
                }
                if g.risk_skip_once {
                    skip_once_cleared.push(g.id);
                    return false;
                }
                if g.unrealized_pnl_percent > cfg.loss_threshold_percent {
                    return false;
                }
                if cfg.require_full_pyramids && g.pyramid_count < g.max_pyramids {
                    return false;
                }
                if cfg.use_trade_age_filter && (now - g.created_at).num_minutes() < cfg.age_threshold_minutes {
                    return false;
                }
                true
            })
            .collect();

        for id in skip_once_cleared {
            if let Ok(mut g) = self.store.get_group(id).await {
                g.risk_skip_once = false;
                self.store.update_group(g).await?;
            }
        }

        eligible.sort_by(|a, b| {
            b.unrealized_pnl_percent
                .abs()
                .cmp(&a.unrealized_pnl_percent.abs())
                .then(b.unrealized_pnl_usd.abs().cmp(&a.unrealized_pnl_usd.abs()))
                .then(a.created_at.cmp(&b.created_at))
        });

        let Some(loser) = eligible.first().map(|g| (*g).clone()) else {
            return Ok(None);
        };

        let mut winners: Vec<PositionGroup> =
            groups.iter().filter(|g| g.id != loser.id && g.unrealized_pnl_usd > Decimal::ZERO).cloned().collect();
        winners.sort_by(|a, b| b.unrealized_pnl_usd.cmp(&a.unrealized_pnl_usd));
        winners.truncate(cfg.max_winners_to_combine);

        let required_usd = loser.unrealized_pnl_usd.abs();
        Ok(Some((loser, winners, required_usd)))
    }

    async fn execute_hedge(
        &self,
        exchange: Arc<dyn ExchangeConnector>,
        loser: PositionGroup,
        winners: Vec<PositionGroup>,
        required_usd: Decimal,
    ) -> Result<Option<RiskAction>> {
        let order_service = OrderService::new(exchange.clone(), self.store.clone());
        let precision_rules = exchange.get_precision_rules().await?;

        let mut current_prices = HashMap::new();
        let mut precisions = HashMap::new();
        for winner in &winners {
            if let Ok(price) = exchange.get_current_price(&winner.symbol).await {
                current_prices.insert(winner.id, price);
            }
            if let Some(pr) = precision_rules.get(&winner.symbol).or_else(|| precision_rules.get(&winner.symbol.replace('/', ""))) {
                precisions.insert(winner.id, *pr);
            }
        }

        let plan = plan_partial_closes(&winners, &current_prices, &precisions, required_usd);
        if plan.is_empty() && !required_usd.is_zero() {
            info!(group_id = %loser.id, "no winners available to offset loser, hedge skipped this cycle");
            return Ok(None);
        }

        let captured_loser_pnl = loser.unrealized_pnl_usd;

        order_service.cancel_open_orders_for_group(&loser).await?;
        order_service.place_market_close(&loser, loser.total_filled_quantity).await?;
        let mut closed_loser = loser.clone();
        closed_loser.status = PositionGroupStatus::Closed;
        closed_loser.closed_at = Some(Utc::now());
        closed_loser.realized_pnl_usd += captured_loser_pnl;
        self.store.update_group(closed_loser.clone()).await?;
        self.pool.release_slot(closed_loser.user_id).await;

        for contribution in &plan {
            let winner = winners.iter().find(|w| w.id == contribution.group_id).expect("plan only references its own winners");
            order_service.place_market_close(winner, contribution.quantity_closed).await?;
            let mut updated = winner.clone();
            updated.total_filled_quantity -= contribution.quantity_closed;
            updated.realized_pnl_usd += contribution.pnl_usd;
            if updated.total_filled_quantity.is_zero() {
                updated.status = PositionGroupStatus::Closed;
                updated.closed_at = Some(Utc::now());
                self.pool.release_slot(updated.user_id).await;
            }
            self.store.update_group(updated).await?;
        }

        let action = RiskAction {
            id: Id::new_v4(),
            user_id: loser.user_id,
            loser_group_id: loser.id,
            loser_pnl_usd: captured_loser_pnl,
            winners: plan,
            action_type: RiskActionType::OffsetLoss,
            notes: None,
            timestamp: Utc::now(),
        };
        self.store.insert_risk_action(action.clone()).await?;
        info!(user_id = %loser.user_id, loser_group_id = %loser.id, pnl_usd = %captured_loser_pnl, "hedge executed");
        Ok(Some(action))
    }

    /// One full cycle across every known user. Per-user failures are logged
    /// and do not prevent the remaining users from being evaluated.
    pub async fn run_cycle(&self, exchanges: &IndexMap<String, Arc<dyn ExchangeConnector>>) -> Result<()> {
        let user_ids = self.store.list_user_ids().await?;
        for user_id in user_ids {
            if let Err(e) = self.run_cycle_for_user(user_id, exchanges).await {
                error!(%user_id, error = %e, "risk engine cycle failed for user, continuing");
            }
        }
        Ok(())
    }

    async fn run_cycle_for_user(&self, user_id: Id, exchanges: &IndexMap<String, Arc<dyn ExchangeConnector>>) -> Result<()> {
        let user = self.store.get_user(user_id).await?;
        if !user.is_active || user.risk_config.engine_force_stopped {
            return Ok(());
        }
        let cfg = user.risk_config.clone();
        self.maintain_timers_for_user(user_id, &cfg).await?;

        if cfg.engine_paused_by_loss_limit {
            return Ok(());
        }

        let Some(exchange) = exchanges.get(&user.default_exchange) else {
            return Ok(());
        };

        if let Some((loser, winners, required_usd)) = self.select_loser_and_winners(user_id, &cfg, exchange.as_ref()).await? {
            self.execute_hedge(exchange.clone(), loser, winners, required_usd).await?;
        }

        let today_realized = self.realized_pnl_today(user_id).await?;
        if today_realized <= -cfg.max_daily_loss_usd {
            self.pause_for_loss_limit(user_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn winner(id: Id, side: Side, entry: Decimal, filled_qty: Decimal, pnl: Decimal) -> PositionGroup {
        PositionGroup {
            id,
            user_id: Uuid::new_v4(),
            exchange: "mock".into(),
            symbol: "BTC/USDT".into(),
            timeframe: "60".into(),
            side,
            status: PositionGroupStatus::Active,
            total_dca_legs: 1,
            filled_dca_legs: 1,
            pyramid_count: 0,
            max_pyramids: 1,
            total_filled_quantity: filled_qty,
            weighted_avg_entry: entry,
            total_invested_usd: entry * filled_qty,
            unrealized_pnl_usd: pnl,
            unrealized_pnl_percent: Decimal::ZERO,
            realized_pnl_usd: Decimal::ZERO,
            tp_mode: TpMode::Aggregate,
            tp_aggregate_percent: dec!(2),
            tp_pyramid_percent: Decimal::ZERO,
            replacement_count: 0,
            risk_timer_start: None,
            risk_timer_expires: None,
            risk_eligible: true,
            risk_blocked: false,
            risk_skip_once: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn plan_skips_winner_with_no_favorable_delta() {
        let w = winner(Uuid::new_v4(), Side::Long, dec!(50000), dec!(0.01), dec!(50));
        let mut prices = HashMap::new();
        prices.insert(w.id, dec!(49000));
        let mut precisions = HashMap::new();
        precisions.insert(w.id, PrecisionRules { tick_size: dec!(0.01), step_size: dec!(0.00001), min_qty: dec!(0.00001), min_notional: dec!(10) });
        let plan = plan_partial_closes(&[w], &prices, &precisions, dec!(50));
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_stops_once_required_usd_is_covered() {
        let w1 = winner(Uuid::new_v4(), Side::Long, dec!(50000), dec!(1), dec!(500));
        let w2 = winner(Uuid::new_v4(), Side::Long, dec!(50000), dec!(1), dec!(500));
        let mut prices = HashMap::new();
        prices.insert(w1.id, dec!(50500));
        prices.insert(w2.id, dec!(50500));
        let mut precisions = HashMap::new();
        let pr = PrecisionRules { tick_size: dec!(0.01), step_size: dec!(0.0001), min_qty: dec!(0.0001), min_notional: dec!(10) };
        precisions.insert(w1.id, pr);
        precisions.insert(w2.id, pr);
        let plan = plan_partial_closes(&[w1, w2], &prices, &precisions, dec!(100));
        assert_eq!(plan.len(), 1);
        assert!(plan[0].pnl_usd >= dec!(100));
    }
}
