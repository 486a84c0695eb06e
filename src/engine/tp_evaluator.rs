//! Take-Profit Evaluator (§4.8): per_leg/aggregate/hybrid/pyramid_aggregate
//! trigger semantics, invoked inline from the Order Fill Monitor on fill
//! events and on the idle sweep.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::*;
use crate::errors::Result;
use crate::store::Store;

use super::execution_pool::ExecutionPoolManager;
use super::order_service::OrderService;

pub struct TakeProfitEvaluator {
    store: Arc<dyn Store>,
    order_service: Arc<OrderService>,
    pool: Arc<ExecutionPoolManager>,
}

/// Does `current` cross `target` in the direction that realizes profit for
/// `side`? Inclusive on both ends per the design's `≥`/`≤` convention.
pub fn crosses(side: Side, current: Decimal, target: Decimal) -> bool {
    match side {
        Side::Long => current >= target,
        Side::Short => current <= target,
    }
}

impl TakeProfitEvaluator {
    pub fn new(store: Arc<dyn Store>, order_service: Arc<OrderService>, pool: Arc<ExecutionPoolManager>) -> Self {
        Self { store, order_service, pool }
    }

    /// Evaluates aggregate/hybrid/pyramid_aggregate TP for `group` at
    /// `current_price`. Per-leg TP is driven entirely by the fill monitor,
    /// which arms, polls, and closes out individual TP children; this
    /// function only handles the group/pyramid-level watchers.
    pub async fn evaluate(&self, group: &mut PositionGroup, current_price: Decimal) -> Result<bool> {
        match group.tp_mode {
            TpMode::PerLeg => Ok(false),
            TpMode::Aggregate => self.evaluate_aggregate(group, current_price).await,
            TpMode::Hybrid => self.evaluate_hybrid(group, current_price).await,
            TpMode::PyramidAggregate => self.evaluate_pyramid_aggregate(group, current_price).await,
        }
    }

    async fn aggregate_target(&self, group: &PositionGroup) -> Decimal {
        let pct = group.tp_aggregate_percent / Decimal::new(100, 0);
        match group.side {
            Side::Long => group.weighted_avg_entry * (Decimal::ONE + pct),
            Side::Short => group.weighted_avg_entry * (Decimal::ONE - pct),
        }
    }

    async fn evaluate_aggregate(&self, group: &mut PositionGroup, current_price: Decimal) -> Result<bool> {
        let target = self.aggregate_target(group).await;
        if !crosses(group.side, current_price, target) {
            return Ok(false);
        }
        self.close_group_at_market(group, current_price).await?;
        Ok(true)
    }

    /// Per the preserved open question: an already-filled per-leg TP is
    /// final; only still-open per-leg children are cancelled when the
    /// aggregate watcher wins the race.
    async fn evaluate_hybrid(&self, group: &mut PositionGroup, current_price: Decimal) -> Result<bool> {
        let target = self.aggregate_target(group).await;
        if !crosses(group.side, current_price, target) {
            return Ok(false);
        }
        self.order_service.cancel_open_orders_for_group(group).await?;
        self.close_group_at_market(group, current_price).await?;
        Ok(true)
    }

    async fn evaluate_pyramid_aggregate(&self, group: &mut PositionGroup, current_price: Decimal) -> Result<bool> {
        let pyramids = self.store.list_pyramids_for_group(group.id).await?;
        let mut any_closed = false;
        for mut pyramid in pyramids {
            if pyramid.status == PyramidStatus::Closed || pyramid.total_quantity.is_zero() {
                continue;
            }
            let orders = self.store.list_orders_for_group(group.id).await?;
            let pyramid_orders: Vec<_> = orders.into_iter().filter(|o| o.pyramid_id == pyramid.id).collect();
            let weighted_entry = weighted_avg_entry(&pyramid_orders);
            if weighted_entry.is_zero() {
                continue;
            }
            let pct = group.tp_pyramid_percent / Decimal::new(100, 0);
            let target = match group.side {
                Side::Long => weighted_entry * (Decimal::ONE + pct),
                Side::Short => weighted_entry * (Decimal::ONE - pct),
            };
            if crosses(group.side, current_price, target) {
                let qty = pyramid.total_quantity;
                let avg_price = self.order_service.place_market_close(group, qty).await?;
                let pnl = signed_pnl(group.side, weighted_entry, avg_price, qty);
                pyramid.status = PyramidStatus::Closed;
                pyramid.closed_at = Some(Utc::now());
                pyramid.exit_price = Some(avg_price);
                pyramid.realized_pnl_usd = pnl;
                self.store.update_pyramid(pyramid).await?;
                group.realized_pnl_usd += pnl;
                any_closed = true;
            }
        }
        if any_closed {
            let remaining = self.store.list_pyramids_for_group(group.id).await?;
            if remaining.iter().all(|p| p.status == PyramidStatus::Closed) {
                group.status = PositionGroupStatus::Closed;
                group.closed_at = Some(Utc::now());
                self.pool.release_slot(group.user_id).await;
            }
            self.store.update_group(group.clone()).await?;
            info!(group_id = %group.id, "pyramid aggregate TP closed one or more pyramids");
        }
        Ok(any_closed)
    }

    async fn close_group_at_market(&self, group: &mut PositionGroup, current_price: Decimal) -> Result<()> {
        self.order_service.cancel_open_orders_for_group(group).await?;
        let qty = group.total_filled_quantity;
        let avg_price = self.order_service.place_market_close(group, qty).await?;
        let fill_price = if avg_price.is_zero() { current_price } else { avg_price };
        let pnl = signed_pnl(group.side, group.weighted_avg_entry, fill_price, qty);
        group.realized_pnl_usd += pnl;
        group.status = PositionGroupStatus::Closed;
        group.closed_at = Some(Utc::now());
        self.store.update_group(group.clone()).await?;
        self.pool.release_slot(group.user_id).await;
        info!(group_id = %group.id, pnl_usd = %group.realized_pnl_usd, "aggregate TP closed group");
        Ok(())
    }
}

fn weighted_avg_entry(orders: &[DCAOrder]) -> Decimal {
    let mut qty = Decimal::ZERO;
    let mut cost = Decimal::ZERO;
    for o in orders {
        if o.filled_quantity.is_zero() {
            continue;
        }
        let price = o.avg_fill_price.unwrap_or(o.price);
        qty += o.filled_quantity;
        cost += o.filled_quantity * price;
    }
    if qty.is_zero() { Decimal::ZERO } else { cost / qty }
}

fn signed_pnl(side: Side, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    match side {
        Side::Long => (exit - entry) * quantity,
        Side::Short => (entry - exit) * quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn long_crosses_inclusive_upward() {
        assert!(crosses(Side::Long, dec!(100), dec!(100)));
        assert!(!crosses(Side::Long, dec!(99.99), dec!(100)));
    }

    #[test]
    fn short_crosses_inclusive_downward() {
        assert!(crosses(Side::Short, dec!(100), dec!(100)));
        assert!(!crosses(Side::Short, dec!(100.01), dec!(100)));
    }

    #[test]
    fn scenario_s2_aggregate_short_target() {
        // weighted_avg_entry = 50500, tp_aggregate_percent = 2
        let target = dec!(50500) * (Decimal::ONE - dec!(2) / Decimal::new(100, 0));
        assert_eq!(target, dec!(49490.00));
        assert!(!crosses(Side::Short, dec!(49491), target));
        assert!(crosses(Side::Short, dec!(49490), target));
    }
}
