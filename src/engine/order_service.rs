//! Order Service (§4.2): submit, cancel, refresh, and TP-arm individual
//! orders, converging local state with whatever the exchange reports.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::*;
use crate::errors::Result;
use crate::exchange::{ExchangeConnector, ExchangeOrderStatus, OrderSide, OrderType};
use crate::store::Store;

pub struct OrderService {
    exchange: Arc<dyn ExchangeConnector>,
    store: Arc<dyn Store>,
}

fn to_order_side(side: Side, closing: bool) -> OrderSide {
    match (side, closing) {
        (Side::Long, false) => OrderSide::Buy,
        (Side::Long, true) => OrderSide::Sell,
        (Side::Short, false) => OrderSide::Sell,
        (Side::Short, true) => OrderSide::Buy,
    }
}

fn from_exchange_status(status: ExchangeOrderStatus) -> DCAOrderStatus {
    match status {
        ExchangeOrderStatus::Pending => DCAOrderStatus::Pending,
        ExchangeOrderStatus::Open => DCAOrderStatus::Open,
        ExchangeOrderStatus::PartiallyFilled => DCAOrderStatus::PartiallyFilled,
        ExchangeOrderStatus::Filled => DCAOrderStatus::Filled,
        ExchangeOrderStatus::Cancelled => DCAOrderStatus::Cancelled,
        ExchangeOrderStatus::Failed => DCAOrderStatus::Failed,
    }
}

impl OrderService {
    pub fn new(exchange: Arc<dyn ExchangeConnector>, store: Arc<dyn Store>) -> Self {
        Self { exchange, store }
    }

    /// Places `order`'s entry leg. Market orders usually resolve to
    /// `filled` from the mock connector's perspective by the time this
    /// returns; real adapters may leave it `open` until the next refresh.
    pub async fn submit(&self, group: &PositionGroup, mut order: DCAOrder, entry_type: EntryOrderType) -> Result<DCAOrder> {
        let order_type = match entry_type {
            EntryOrderType::Limit => OrderType::Limit,
            EntryOrderType::Market => OrderType::Market,
        };
        let side = to_order_side(group.side, false);
        let price = matches!(order_type, OrderType::Limit).then_some(order.price);

        let result = self
            .exchange
            .place_order(&group.symbol, side, order_type, order.quantity, price)
            .await;

        match result {
            Ok(placed) => {
                order.exchange_order_id = Some(placed.exchange_order_id);
                order.status = from_exchange_status(placed.status);
                order.filled_quantity = placed.filled_quantity;
                order.avg_fill_price = placed.avg_fill_price;
                order.submitted_at = Some(Utc::now());
                if order.status == DCAOrderStatus::Filled {
                    order.filled_at = Some(Utc::now());
                }
                self.store.update_order(order.clone()).await?;
                info!(order_id = %order.id, leg = order.leg_index, status = ?order.status, "order submitted");
                Ok(order)
            }
            Err(e) => {
                order.status = DCAOrderStatus::Failed;
                self.store.update_order(order.clone()).await?;
                warn!(order_id = %order.id, error = %e, "order submission failed");
                Err(e)
            }
        }
    }

    /// Idempotent: if the exchange reports the order as already gone or
    /// terminal, local state converges to that terminal status with
    /// `filled_quantity` preserved from whatever was already recorded.
    pub async fn cancel(&self, mut order: DCAOrder) -> Result<DCAOrder> {
        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            order.status = DCAOrderStatus::Cancelled;
            order.cancelled_at = Some(Utc::now());
            self.store.update_order(order.clone()).await?;
            return Ok(order);
        };
        let symbol = self.symbol_for_order(&order).await?;
        let result = self.exchange.cancel_order(&exchange_order_id, &symbol).await?;
        order.status = from_exchange_status(result.status);
        if result.filled_quantity > order.filled_quantity {
            order.filled_quantity = result.filled_quantity;
        }
        if order.status == DCAOrderStatus::Cancelled {
            order.cancelled_at = Some(Utc::now());
        }
        self.store.update_order(order.clone()).await?;
        Ok(order)
    }

    pub async fn refresh(&self, mut order: DCAOrder) -> Result<DCAOrder> {
        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            return Ok(order);
        };
        let symbol = self.symbol_for_order(&order).await?;
        let result = self.exchange.get_order_status(&exchange_order_id, &symbol).await?;
        let new_status = from_exchange_status(result.status);
        let changed = new_status != order.status || result.filled_quantity != order.filled_quantity;
        order.status = new_status;
        order.filled_quantity = result.filled_quantity;
        order.avg_fill_price = result.avg_fill_price;
        if matches!(order.status, DCAOrderStatus::Filled | DCAOrderStatus::PartiallyFilled) && order.filled_at.is_none()
        {
            order.filled_at = Some(Utc::now());
        }
        if changed {
            self.store.update_order(order.clone()).await?;
        }
        Ok(order)
    }

    /// Places a counter-side limit order at `order.tp_price` for
    /// `quantity`, recording the resulting exchange id on the order.
    pub async fn arm_tp(&self, group: &PositionGroup, mut order: DCAOrder, quantity: Decimal) -> Result<DCAOrder> {
        let side = to_order_side(group.side, true);
        let placed = self
            .exchange
            .place_order(&group.symbol, side, OrderType::Limit, quantity, Some(order.tp_price))
            .await?;
        order.tp_order_id = Some(placed.exchange_order_id);
        self.store.update_order(order.clone()).await?;
        Ok(order)
    }

    /// Polls a leg's armed TP child. Once the exchange reports it filled,
    /// marks `tp_hit`, records the exit price and timestamp, and leaves the
    /// entry-side fields untouched so the leg's realized PnL can still be
    /// computed from `avg_fill_price` (entry) vs. `tp_fill_price` (exit).
    pub async fn refresh_tp(&self, mut order: DCAOrder) -> Result<DCAOrder> {
        if order.tp_hit {
            return Ok(order);
        }
        let Some(tp_order_id) = order.tp_order_id.clone() else {
            return Ok(order);
        };
        let symbol = self.symbol_for_order(&order).await?;
        let result = self.exchange.get_order_status(&tp_order_id, &symbol).await?;
        if result.status != ExchangeOrderStatus::Filled {
            return Ok(order);
        }
        order.tp_hit = true;
        order.tp_executed_at = Some(Utc::now());
        order.tp_fill_price = Some(result.avg_fill_price.unwrap_or(order.tp_price));
        self.store.update_order(order.clone()).await?;
        info!(order_id = %order.id, leg = order.leg_index, "per-leg take-profit filled");
        Ok(order)
    }

    pub async fn cancel_open_orders_for_group(&self, group: &PositionGroup) -> Result<()> {
        let orders = self.store.list_orders_for_group(group.id).await?;
        for order in orders {
            if order.status.is_open() {
                self.cancel(order).await?;
            }
        }
        Ok(())
    }

    pub async fn place_market_close(&self, group: &PositionGroup, quantity: Decimal) -> Result<Decimal> {
        let side = to_order_side(group.side, true);
        let placed = self.exchange.place_order(&group.symbol, side, OrderType::Market, quantity, None).await?;
        Ok(placed.avg_fill_price.unwrap_or_default())
    }

    async fn symbol_for_order(&self, order: &DCAOrder) -> Result<String> {
        let group = self.store.get_group(order.group_id).await?;
        Ok(group.symbol)
    }
}
