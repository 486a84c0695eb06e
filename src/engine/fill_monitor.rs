//! Order Fill Monitor (§4.7): reconciles local order state against the
//! exchange, triggers gap-based DCA legs, arms per-leg take-profit orders,
//! and hands aggregate/hybrid/pyramid watchers off to the evaluator.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::constants::DEFAULT_MONITOR_CONCURRENCY_PER_USER;
use crate::domain::*;
use crate::errors::Result;
use crate::exchange::ExchangeConnector;
use crate::store::Store;

use super::execution_pool::ExecutionPoolManager;
use super::order_service::OrderService;
use super::tp_evaluator::TakeProfitEvaluator;

pub struct FillMonitor {
    store: Arc<dyn Store>,
    order_service: Arc<OrderService>,
    tp_evaluator: Arc<TakeProfitEvaluator>,
    pool: Arc<ExecutionPoolManager>,
    exchange: Arc<dyn ExchangeConnector>,
    permits: Arc<Semaphore>,
}

/// Has `current` reached the trigger price for a conditional DCA leg? For a
/// long, deeper legs sit below the base price, so the trigger fires when
/// price falls to or through it; a short's legs sit above, so it fires on
/// the way up.
fn trigger_reached(side: Side, current: Decimal, level: Decimal) -> bool {
    match side {
        Side::Long => current <= level,
        Side::Short => current >= level,
    }
}

/// Has price moved past `level` in the direction away from the trigger,
/// by more than `cancel_beyond_percent`, without ever triggering? Such a
/// leg is abandoned rather than left to trigger on a retrace that may
/// never come.
fn should_abandon(side: Side, current: Decimal, level: Decimal, cancel_beyond_percent: Decimal) -> bool {
    if level.is_zero() || cancel_beyond_percent <= Decimal::ZERO {
        return false;
    }
    let drift = match side {
        Side::Long => (current - level) / level * Decimal::new(100, 0),
        Side::Short => (level - current) / level * Decimal::new(100, 0),
    };
    drift > cancel_beyond_percent
}

/// True once every leg that actually entered has also exited via its
/// per-leg TP, and no leg is still in flight. Legs that never entered
/// (cancelled / failed) don't block closure.
fn per_leg_tp_complete(orders: &[DCAOrder]) -> bool {
    let mut any_filled = false;
    for order in orders {
        match order.status {
            DCAOrderStatus::Filled => {
                any_filled = true;
                if !order.tp_hit {
                    return false;
                }
            }
            DCAOrderStatus::Cancelled | DCAOrderStatus::Failed => {}
            _ => return false,
        }
    }
    any_filled
}

fn signed_pnl(side: Side, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    match side {
        Side::Long => (exit - entry) * quantity,
        Side::Short => (entry - exit) * quantity,
    }
}

impl FillMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        order_service: Arc<OrderService>,
        tp_evaluator: Arc<TakeProfitEvaluator>,
        pool: Arc<ExecutionPoolManager>,
        exchange: Arc<dyn ExchangeConnector>,
    ) -> Self {
        Self::with_concurrency(store, order_service, tp_evaluator, pool, exchange, DEFAULT_MONITOR_CONCURRENCY_PER_USER)
    }

    pub fn with_concurrency(
        store: Arc<dyn Store>,
        order_service: Arc<OrderService>,
        tp_evaluator: Arc<TakeProfitEvaluator>,
        pool: Arc<ExecutionPoolManager>,
        exchange: Arc<dyn ExchangeConnector>,
        concurrency: usize,
    ) -> Self {
        Self { store, order_service, tp_evaluator, pool, exchange, permits: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// One sweep over every active group on this monitor's exchange, bounded
    /// to `concurrency` concurrent group reconciliations.
    pub async fn run_cycle(&self) -> Result<()> {
        let groups = self.store.list_all_active_groups().await?;
        let mut tasks = Vec::with_capacity(groups.len());
        for group in groups {
            let permit = self.permits.clone().acquire_owned().await.expect("semaphore never closed");
            let store = self.store.clone();
            let order_service = self.order_service.clone();
            let tp_evaluator = self.tp_evaluator.clone();
            let pool = self.pool.clone();
            let exchange = self.exchange.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = reconcile_group(&store, &order_service, &tp_evaluator, &pool, exchange.as_ref(), group.id).await {
                    error!(error = %e, "fill monitor reconciliation failed");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn reconcile_group(
    store: &Arc<dyn Store>,
    order_service: &Arc<OrderService>,
    tp_evaluator: &Arc<TakeProfitEvaluator>,
    pool: &Arc<ExecutionPoolManager>,
    exchange: &dyn ExchangeConnector,
    group_id: Id,
) -> Result<()> {
    let _lock = store.lock_group(group_id).await;
    let mut group = store.get_group(group_id).await?;
    if group.status.is_terminal() {
        return Ok(());
    }
    let config = store
        .get_specific_dca_config(group.user_id, &group.symbol, &group.timeframe, &group.exchange)
        .await?;
    let cancel_beyond_percent = config.as_ref().map(|c| c.cancel_dca_beyond_percent).unwrap_or(Decimal::ZERO);

    let current_price = exchange.get_current_price(&group.symbol).await?;
    let mut orders = store.list_orders_for_group(group_id).await?;

    for order in orders.iter_mut() {
        match order.status {
            DCAOrderStatus::TriggerPending => {
                if trigger_reached(group.side, current_price, order.price) {
                    let entry_type =
                        config.as_ref().map(|c| c.entry_order_type).unwrap_or(EntryOrderType::Limit);
                    let submitted = order_service.submit(&group, order.clone(), entry_type).await?;
                    *order = submitted;
                } else if should_abandon(group.side, current_price, order.price, cancel_beyond_percent) {
                    order.status = DCAOrderStatus::Cancelled;
                    order.cancelled_at = Some(chrono::Utc::now());
                    store.update_order(order.clone()).await?;
                    debug!(order_id = %order.id, "trigger_pending leg abandoned, price moved beyond threshold");
                }
            }
            DCAOrderStatus::Pending | DCAOrderStatus::Open | DCAOrderStatus::PartiallyFilled => {
                let refreshed = order_service.refresh(order.clone()).await?;
                *order = refreshed;
            }
            _ => {}
        }

        if order.status == DCAOrderStatus::Filled && order.tp_order_id.is_none() {
            if matches!(group.tp_mode, TpMode::PerLeg | TpMode::Hybrid) {
                let armed = order_service.arm_tp(&group, order.clone(), order.filled_quantity).await?;
                *order = armed;
                info!(order_id = %order.id, leg = order.leg_index, "per-leg take-profit armed");
            }
        } else if order.tp_order_id.is_some() && !order.tp_hit {
            let refreshed = order_service.refresh_tp(order.clone()).await?;
            *order = refreshed;
        }
    }

    let fills: Vec<(Decimal, Decimal)> = orders
        .iter()
        .filter(|o| !o.filled_quantity.is_zero())
        .map(|o| (o.filled_quantity, o.avg_fill_price.unwrap_or(o.price)))
        .collect();
    group.recompute_aggregates(&fills);
    group.filled_dca_legs = orders.iter().filter(|o| o.status == DCAOrderStatus::Filled).count() as u32;

    if group.status == PositionGroupStatus::Live && group.filled_dca_legs > 0 {
        group.status = if group.filled_dca_legs == group.total_dca_legs {
            PositionGroupStatus::Active
        } else {
            PositionGroupStatus::PartiallyFilled
        };
    }

    let all_terminal = orders.iter().all(|o| o.status.is_terminal());
    if all_terminal && group.total_filled_quantity.is_zero() {
        group.status = PositionGroupStatus::Failed;
        group.closed_at = Some(chrono::Utc::now());
        pool.release_slot(group.user_id).await;
    }

    if !group.status.is_terminal()
        && matches!(group.tp_mode, TpMode::PerLeg | TpMode::Hybrid)
        && per_leg_tp_complete(&orders)
    {
        for order in &orders {
            if order.tp_hit {
                let entry = order.avg_fill_price.unwrap_or(order.price);
                let exit = order.tp_fill_price.unwrap_or(order.tp_price);
                group.realized_pnl_usd += signed_pnl(group.side, entry, exit, order.filled_quantity);
            }
        }
        group.status = PositionGroupStatus::Closed;
        group.closed_at = Some(chrono::Utc::now());
        pool.release_slot(group.user_id).await;
        info!(group_id = %group.id, pnl_usd = %group.realized_pnl_usd, "per-leg take-profit closed group");
    }

    store.update_group(group.clone()).await?;

    if !group.status.is_terminal() && !group.total_filled_quantity.is_zero() {
        tp_evaluator.evaluate(&mut group, current_price).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn leg(status: DCAOrderStatus, tp_hit: bool) -> DCAOrder {
        DCAOrder {
            id: Uuid::new_v4(),
            pyramid_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            leg_index: 0,
            status,
            gap_percent: Decimal::ZERO,
            weight_percent: Decimal::ZERO,
            tp_percent: Decimal::ZERO,
            price: dec!(100),
            tp_price: dec!(101),
            quantity: dec!(1),
            filled_quantity: dec!(1),
            avg_fill_price: Some(dec!(100)),
            exchange_order_id: Some("x".into()),
            tp_order_id: Some("tp".into()),
            tp_hit,
            fee: Decimal::ZERO,
            fee_currency: None,
            created_at: Utc::now(),
            submitted_at: Some(Utc::now()),
            filled_at: Some(Utc::now()),
            cancelled_at: None,
            tp_executed_at: if tp_hit { Some(Utc::now()) } else { None },
            tp_fill_price: if tp_hit { Some(dec!(101)) } else { None },
        }
    }

    #[test]
    fn per_leg_tp_incomplete_while_any_filled_leg_has_not_hit_its_target() {
        let orders = vec![leg(DCAOrderStatus::Filled, true), leg(DCAOrderStatus::Filled, false)];
        assert!(!per_leg_tp_complete(&orders));
    }

    #[test]
    fn per_leg_tp_complete_once_every_filled_leg_has_hit_its_target() {
        let orders = vec![leg(DCAOrderStatus::Filled, true), leg(DCAOrderStatus::Cancelled, false)];
        assert!(per_leg_tp_complete(&orders));
    }

    #[test]
    fn per_leg_tp_incomplete_while_a_leg_is_still_in_flight() {
        let orders = vec![leg(DCAOrderStatus::Filled, true), leg(DCAOrderStatus::Open, false)];
        assert!(!per_leg_tp_complete(&orders));
    }

    #[test]
    fn per_leg_tp_never_complete_with_no_fills_at_all() {
        let orders = vec![leg(DCAOrderStatus::Cancelled, false)];
        assert!(!per_leg_tp_complete(&orders));
    }

    #[test]
    fn long_trigger_fires_on_retrace_down() {
        assert!(trigger_reached(Side::Long, dec!(49000), dec!(49000)));
        assert!(!trigger_reached(Side::Long, dec!(49001), dec!(49000)));
    }

    #[test]
    fn short_trigger_fires_on_rally_up() {
        assert!(trigger_reached(Side::Short, dec!(51000), dec!(51000)));
        assert!(!trigger_reached(Side::Short, dec!(50999), dec!(51000)));
    }

    #[test]
    fn long_leg_abandoned_once_price_runs_away_upward() {
        assert!(should_abandon(Side::Long, dec!(51000), dec!(49000), dec!(2)));
        assert!(!should_abandon(Side::Long, dec!(49500), dec!(49000), dec!(2)));
    }

    #[test]
    fn zero_cancel_percent_never_abandons() {
        assert!(!should_abandon(Side::Long, dec!(60000), dec!(49000), Decimal::ZERO));
    }
}
