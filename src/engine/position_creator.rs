//! Position Creator (§4.3): materializes a promoted signal into a
//! PositionGroup + Pyramid + DCAOrders, or grows an existing group with a
//! new pyramid.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::*;
use crate::errors::{EngineError, Result};
use crate::exchange::ExchangeConnector;
use crate::grid::{self, PrecisionRules};
use crate::store::Store;

use super::order_service::OrderService;

pub struct PositionCreator {
    store: Arc<dyn Store>,
    order_service: Arc<OrderService>,
}

/// Callback invoked after orders are submitted so the risk timer can be
/// (re)started per §4.9.2; kept as an injected hook rather than a direct
/// dependency so the Risk Engine's timer policy stays in one place.
pub type RiskTimerHook = Arc<dyn Fn(&mut PositionGroup) + Send + Sync>;

impl PositionCreator {
    pub fn new(store: Arc<dyn Store>, order_service: Arc<OrderService>) -> Self {
        Self { store, order_service }
    }

    async fn precision_for(&self, exchange: &dyn ExchangeConnector, symbol: &str) -> Result<PrecisionRules> {
        let rules = exchange.get_precision_rules().await?;
        rules
            .get(symbol)
            .or_else(|| rules.get(&symbol.replace('/', "")))
            .copied()
            .ok_or_else(|| EngineError::validation(format!("no precision metadata for {symbol}")))
    }

    fn classify_legs(entry_type: EntryOrderType, gap_percent: Decimal) -> (DCAOrderStatus, bool) {
        match entry_type {
            EntryOrderType::Limit => (DCAOrderStatus::Pending, true),
            EntryOrderType::Market => {
                if gap_percent <= Decimal::ZERO {
                    (DCAOrderStatus::Pending, true)
                } else {
                    (DCAOrderStatus::TriggerPending, false)
                }
            }
        }
    }

    /// Creates a brand new PositionGroup for `signal`, submitting whichever
    /// legs are eligible immediately and leaving the rest `trigger_pending`
    /// for the Order Fill Monitor to pick up.
    pub async fn create_position_group_from_signal(
        &self,
        exchange: Arc<dyn ExchangeConnector>,
        user_id: Id,
        exchange_name: &str,
        symbol: &str,
        timeframe: &str,
        side: Side,
        base_price: Decimal,
        config: &DCAConfiguration,
        total_capital_usd: Decimal,
        risk_timer_hook: Option<RiskTimerHook>,
    ) -> Result<PositionGroup> {
        let precision = self.precision_for(exchange.as_ref(), symbol).await?;
        let levels = grid::calculate_levels(base_price, side, config.levels_for_pyramid(0), &precision);
        let sized = grid::calculate_quantities(levels, total_capital_usd, &precision)?;

        let now = Utc::now();
        let group_id = Uuid::new_v4();
        let pyramid_id = Uuid::new_v4();

        let mut group = PositionGroup {
            id: group_id,
            user_id,
            exchange: exchange_name.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            side,
            status: PositionGroupStatus::Waiting,
            total_dca_legs: sized.len() as u32,
            filled_dca_legs: 0,
            pyramid_count: 0,
            max_pyramids: config.max_pyramids,
            total_filled_quantity: Decimal::ZERO,
            weighted_avg_entry: Decimal::ZERO,
            total_invested_usd: total_capital_usd,
            unrealized_pnl_usd: Decimal::ZERO,
            unrealized_pnl_percent: Decimal::ZERO,
            realized_pnl_usd: Decimal::ZERO,
            tp_mode: config.tp_mode,
            tp_aggregate_percent: config.tp_aggregate_percent,
            tp_pyramid_percent: config.tp_pyramid_percent,
            replacement_count: 0,
            risk_timer_start: None,
            risk_timer_expires: None,
            risk_eligible: false,
            risk_blocked: false,
            risk_skip_once: false,
            created_at: now,
            updated_at: now,
            closed_at: None,
        };

        let mut pyramid = Pyramid {
            id: pyramid_id,
            group_id,
            pyramid_index: 0,
            status: PyramidStatus::Pending,
            signal_id: None,
            total_quantity: Decimal::ZERO,
            entry_timestamp: Some(now),
            closed_at: None,
            exit_price: None,
            realized_pnl_usd: Decimal::ZERO,
            tp_order_id: None,
        };

        let mut orders = Vec::new();
        let mut to_submit = Vec::new();
        for level in &sized {
            let (status, submit_now) = Self::classify_legs(config.entry_order_type, level.gap_percent);
            let order = DCAOrder {
                id: Uuid::new_v4(),
                pyramid_id,
                group_id,
                leg_index: level.leg_index,
                status,
                gap_percent: level.gap_percent,
                weight_percent: level.weight_percent,
                tp_percent: level.tp_percent,
                price: level.price,
                tp_price: level.tp_price,
                quantity: level.quantity,
                filled_quantity: Decimal::ZERO,
                avg_fill_price: None,
                exchange_order_id: None,
                tp_order_id: None,
                tp_hit: false,
                tp_fill_price: None,
                fee: Decimal::ZERO,
                fee_currency: None,
                created_at: now,
                submitted_at: None,
                filled_at: None,
                cancelled_at: None,
                tp_executed_at: None,
            };
            if submit_now {
                to_submit.push(order);
            } else {
                orders.push(order);
            }
        }
        orders.extend(to_submit.iter().cloned());

        self.store.insert_position_group(group.clone(), pyramid.clone(), orders).await?;

        group.status = PositionGroupStatus::Live;
        let mut submission_failed = false;
        for order in to_submit {
            match self.order_service.submit(&group, order, config.entry_order_type).await {
                Ok(_) => {}
                Err(e) => {
                    error!(group_id = %group.id, error = %e, "leg submission failed, group marked failed");
                    submission_failed = true;
                    break;
                }
            }
        }

        pyramid.status = PyramidStatus::Submitted;
        if submission_failed {
            group.status = PositionGroupStatus::Failed;
        }
        if let Some(hook) = risk_timer_hook {
            hook(&mut group);
        }
        self.store.update_group(group.clone()).await?;
        self.store.update_pyramid(pyramid).await?;

        info!(group_id = %group.id, status = ?group.status, "position group created");
        Ok(group)
    }

    /// Adds a new pyramid to an already-active group, resetting the risk
    /// timer to the unarmed state.
    pub async fn handle_pyramid_continuation(
        &self,
        exchange: Arc<dyn ExchangeConnector>,
        mut group: PositionGroup,
        base_price: Decimal,
        config: &DCAConfiguration,
        additional_capital_usd: Decimal,
    ) -> Result<PositionGroup> {
        let _lock = self.store.lock_group(group.id).await;
        let precision = self.precision_for(exchange.as_ref(), &group.symbol).await?;
        let next_pyramid_index = group.pyramid_count + 1;
        let levels = grid::calculate_levels(base_price, group.side, config.levels_for_pyramid(next_pyramid_index), &precision);
        let sized = grid::calculate_quantities(levels, additional_capital_usd, &precision)?;

        let now = Utc::now();
        let pyramid_id = Uuid::new_v4();
        group.pyramid_count = next_pyramid_index;
        group.total_dca_legs += sized.len() as u32;
        group.risk_timer_start = None;
        group.risk_timer_expires = None;
        group.risk_eligible = false;

        let mut pyramid = Pyramid {
            id: pyramid_id,
            group_id: group.id,
            pyramid_index: group.pyramid_count,
            status: PyramidStatus::Pending,
            signal_id: None,
            total_quantity: Decimal::ZERO,
            entry_timestamp: Some(now),
            closed_at: None,
            exit_price: None,
            realized_pnl_usd: Decimal::ZERO,
            tp_order_id: None,
        };

        let mut orders = Vec::new();
        let mut to_submit = Vec::new();
        for level in &sized {
            let (status, submit_now) = Self::classify_legs(config.entry_order_type, level.gap_percent);
            let order = DCAOrder {
                id: Uuid::new_v4(),
                pyramid_id,
                group_id: group.id,
                leg_index: level.leg_index,
                status,
                gap_percent: level.gap_percent,
                weight_percent: level.weight_percent,
                tp_percent: level.tp_percent,
                price: level.price,
                tp_price: level.tp_price,
                quantity: level.quantity,
                filled_quantity: Decimal::ZERO,
                avg_fill_price: None,
                exchange_order_id: None,
                tp_order_id: None,
                tp_hit: false,
                tp_fill_price: None,
                fee: Decimal::ZERO,
                fee_currency: None,
                created_at: now,
                submitted_at: None,
                filled_at: None,
                cancelled_at: None,
                tp_executed_at: None,
            };
            if submit_now {
                to_submit.push(order);
            } else {
                orders.push(order);
            }
        }
        orders.extend(to_submit.iter().cloned());
        self.store.insert_pyramid(pyramid.clone(), orders).await?;

        let mut submission_failed = false;
        for order in to_submit {
            if let Err(e) = self.order_service.submit(&group, order, config.entry_order_type).await {
                error!(group_id = %group.id, error = %e, "pyramid leg submission failed");
                submission_failed = true;
                break;
            }
        }
        pyramid.status = PyramidStatus::Submitted;
        if submission_failed {
            group.status = PositionGroupStatus::Failed;
        }
        self.store.update_pyramid(pyramid).await?;
        self.store.update_group(group.clone()).await?;
        Ok(group)
    }
}
