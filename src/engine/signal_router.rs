//! Signal Router (§4.6): classifies an incoming signal and dispatches it to
//! the close path, the Position Creator, or the Queue Manager.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::domain::*;
use crate::errors::{EngineError, Result};
use crate::exchange::{normalize_symbol, ExchangeConnector};
use crate::store::{GroupKey, Store};

use super::execution_pool::ExecutionPoolManager;
use super::order_service::OrderService;
use super::position_creator::PositionCreator;
use super::queue_manager::QueueManager;
use super::risk_engine::RiskEngine;
use super::{IncomingSignal, RouteOutcome, RouteRejected, SignalIntent};

pub struct SignalRouter {
    store: Arc<dyn Store>,
    pool: Arc<ExecutionPoolManager>,
    queue: Arc<QueueManager>,
    position_creator: Arc<PositionCreator>,
    order_service: Arc<OrderService>,
    risk_engine: Arc<RiskEngine>,
}

impl SignalRouter {
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<ExecutionPoolManager>,
        queue: Arc<QueueManager>,
        position_creator: Arc<PositionCreator>,
        order_service: Arc<OrderService>,
        risk_engine: Arc<RiskEngine>,
    ) -> Self {
        Self { store, pool, queue, position_creator, order_service, risk_engine }
    }

    pub async fn route(
        &self,
        exchange: Arc<dyn ExchangeConnector>,
        mut signal: IncomingSignal,
    ) -> Result<RouteOutcome> {
        signal.symbol = normalize_symbol(&signal.symbol);
        let side = Side::from_action(&signal.action);

        let config = self
            .store
            .get_specific_dca_config(signal.user_id, &signal.symbol, &signal.timeframe, &signal.exchange)
            .await?
            .ok_or_else(|| EngineError::exchange_config(format!("no DCA configuration for {}", signal.symbol)))?;

        let precision = exchange.get_precision_rules().await?;
        if !precision.contains_key(&signal.symbol) && !precision.contains_key(&signal.symbol.replace('/', "")) {
            return Err(EngineError::validation(format!("no precision metadata for {}", signal.symbol)));
        }

        let key = GroupKey {
            user_id: signal.user_id,
            exchange: &signal.exchange,
            symbol: &signal.symbol,
            timeframe: &signal.timeframe,
            side,
        };

        if signal.intent == SignalIntent::Exit {
            // An exit's action names the side being closed, the inverse of
            // the entry convention: buy exits a short, sell exits a long.
            let target_side = side.opposite();
            let key = GroupKey { side: target_side, ..key };
            return match self.store.get_active_group(key).await? {
                Some(group) => {
                    self.order_service.cancel_open_orders_for_group(&group).await?;
                    self.order_service.place_market_close(&group, group.total_filled_quantity).await?;
                    let mut group = group;
                    group.status = PositionGroupStatus::Closed;
                    group.closed_at = Some(Utc::now());
                    self.store.update_group(group.clone()).await?;
                    self.pool.release_slot(group.user_id).await;
                    Ok(RouteOutcome::Exited)
                }
                None => Ok(RouteOutcome::NoActivePosition),
            };
        }

        let existing_group = self.store.get_active_group(key).await?;
        let is_pyramid = existing_group
            .as_ref()
            .map(|g| g.pyramid_count < g.max_pyramids.saturating_sub(1))
            .unwrap_or(false);

        let risk_cfg = &self.store.get_user(signal.user_id).await?.risk_config;
        let capital = match exchange.fetch_free_balance().await {
            Ok(balances) => {
                let free_balance = balances.values().copied().next().unwrap_or(Decimal::ZERO);
                (risk_cfg.risk_per_position_percent / Decimal::new(100, 0) * free_balance)
                    .min(risk_cfg.risk_per_position_cap_usd)
                    .min(risk_cfg.max_total_exposure_usd)
            }
            Err(e) => {
                // Balance fetch failed: fall back to the user's configured
                // per-position cap rather than silently sizing to zero.
                info!(user_id = %signal.user_id, error = %e, "balance fetch failed, using configured default allocation");
                risk_cfg.risk_per_position_cap_usd.min(risk_cfg.max_total_exposure_usd)
            }
        };

        if let Err(e) = self
            .risk_engine
            .validate_pre_trade_risk(signal.user_id, &signal.symbol, capital, is_pyramid)
            .await
        {
            info!(user_id = %signal.user_id, symbol = %signal.symbol, reason = %e, "signal rejected by pre-trade risk check");
            return Ok(RouteOutcome::Rejected(RouteRejected { reason: e.to_string() }));
        }

        if let (true, Some(group)) = (is_pyramid, existing_group.clone()) {
            let slot_ok = if config.same_pair_timeframe_bypass { self.pool.bypass() } else { self.pool.request_slot(signal.user_id).await };
            if slot_ok {
                self.position_creator
                    .handle_pyramid_continuation(exchange, group, signal.entry_price, &config, capital)
                    .await?;
                info!(user_id = %signal.user_id, symbol = %signal.symbol, "pyramid continuation routed directly");
                return Ok(RouteOutcome::Accepted);
            }
        } else {
            let slot_ok = self.pool.request_slot(signal.user_id).await;
            if slot_ok {
                self.position_creator
                    .create_position_group_from_signal(
                        exchange,
                        signal.user_id,
                        &signal.exchange,
                        &signal.symbol,
                        &signal.timeframe,
                        side,
                        signal.entry_price,
                        &config,
                        capital,
                        None,
                    )
                    .await?;
                info!(user_id = %signal.user_id, symbol = %signal.symbol, "new entry routed directly");
                return Ok(RouteOutcome::Accepted);
            }
        }

        let queued = QueuedSignal {
            id: Uuid::new_v4(),
            user_id: signal.user_id,
            exchange: signal.exchange.clone(),
            symbol: signal.symbol.clone(),
            timeframe: signal.timeframe.clone(),
            side,
            status: QueuedSignalStatus::Queued,
            entry_price: signal.entry_price,
            signal_payload: signal.payload.clone(),
            queued_at: Utc::now(),
            promoted_at: None,
            replacement_count: 0,
            current_loss_percent: Decimal::ZERO,
            is_pyramid_continuation: is_pyramid,
            priority_score: 0.0,
        };
        self.queue.add_signal_to_queue(queued).await?;
        info!(user_id = %signal.user_id, symbol = %signal.symbol, "signal queued, no slot available");
        Ok(RouteOutcome::Queued)
    }
}
