use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::grid::PrecisionRules;

use super::{ExchangeConnector, ExchangeOrder, ExchangeOrderStatus, OrderSide, OrderType};

#[derive(Debug, Clone, Copy)]
pub enum InjectedError {
    Connection,
    Timeout,
    Rejection,
}

#[derive(Debug, Clone)]
struct ResidentOrder {
    symbol: String,
    side: OrderSide,
    order_type: OrderType,
    price: Option<Decimal>,
    quantity: Decimal,
    filled_quantity: Decimal,
    status: ExchangeOrderStatus,
}

/// In-process simulated exchange used by tests and paper operation.
///
/// Market orders fill instantly at the current simulated price. Limit
/// orders rest until [`MockConnector::set_price`] moves the market across
/// their price, mirroring the reference mock's error-injection facility so
/// fill/latency/rejection scenarios stay reproducible without a network
/// dependency.
pub struct MockConnector {
    precision: IndexMap<String, PrecisionRules>,
    prices: RwLock<IndexMap<String, Decimal>>,
    orders: RwLock<HashMap<String, ResidentOrder>>,
    balances: RwLock<IndexMap<String, Decimal>>,
    injected_error: RwLock<Option<InjectedError>>,
    next_id: AtomicU64,
}

impl MockConnector {
    pub fn new(precision: IndexMap<String, PrecisionRules>) -> Self {
        Self {
            precision,
            prices: RwLock::new(IndexMap::new()),
            orders: RwLock::new(HashMap::new()),
            balances: RwLock::new(IndexMap::new()),
            injected_error: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub async fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances.write().await.insert(asset.to_string(), amount);
    }

    pub async fn inject_error(&self, kind: InjectedError) {
        *self.injected_error.write().await = Some(kind);
    }

    pub async fn clear_error(&self) {
        *self.injected_error.write().await = None;
    }

    async fn check_error_injection(&self) -> Result<()> {
        match *self.injected_error.read().await {
            Some(InjectedError::Connection) => Err(EngineError::connection("injected failure")),
            Some(InjectedError::Timeout) => Err(EngineError::timeout("mock_call", 30)),
            Some(InjectedError::Rejection) => Err(EngineError::api(400, "injected rejection")),
            None => Ok(()),
        }
    }

    fn crosses(side: OrderSide, order_price: Decimal, market_price: Decimal) -> bool {
        match side {
            OrderSide::Buy => market_price <= order_price,
            OrderSide::Sell => market_price >= order_price,
        }
    }

    fn to_exchange_order(id: &str, order: &ResidentOrder) -> ExchangeOrder {
        ExchangeOrder {
            exchange_order_id: id.to_string(),
            status: order.status,
            filled_quantity: order.filled_quantity,
            avg_fill_price: order.price,
        }
    }
}

#[async_trait]
impl ExchangeConnector for MockConnector {
    async fn get_precision_rules(&self) -> Result<IndexMap<String, PrecisionRules>> {
        self.check_error_injection().await?;
        Ok(self.precision.clone())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<ExchangeOrder> {
        self.check_error_injection().await?;
        let market_price = *self
            .prices
            .read()
            .await
            .get(symbol)
            .ok_or_else(|| EngineError::not_found(format!("no simulated price for {symbol}")))?;

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (status, filled_quantity, fill_price) = match order_type {
            OrderType::Market => (ExchangeOrderStatus::Filled, quantity, market_price),
            OrderType::Limit => {
                let limit_price = price.ok_or_else(|| EngineError::validation("limit order requires a price"))?;
                if Self::crosses(side, limit_price, market_price) {
                    (ExchangeOrderStatus::Filled, quantity, limit_price)
                } else {
                    (ExchangeOrderStatus::Open, Decimal::ZERO, limit_price)
                }
            }
        };

        let resident = ResidentOrder {
            symbol: symbol.to_string(),
            side,
            order_type,
            price: Some(fill_price),
            quantity,
            filled_quantity,
            status,
        };
        debug!(exchange_order_id = %id, ?status, "mock order placed");
        let exchange_order = Self::to_exchange_order(&id, &resident);
        self.orders.write().await.insert(id, resident);
        Ok(exchange_order)
    }

    async fn get_order_status(&self, exchange_order_id: &str, _symbol: &str) -> Result<ExchangeOrder> {
        self.check_error_injection().await?;
        let market_price = {
            let orders = self.orders.read().await;
            let order = orders
                .get(exchange_order_id)
                .ok_or_else(|| EngineError::not_found(format!("unknown order {exchange_order_id}")))?;
            if order.status != ExchangeOrderStatus::Open {
                return Ok(Self::to_exchange_order(exchange_order_id, order));
            }
            *self.prices.read().await.get(&order.symbol).unwrap_or(&Decimal::ZERO)
        };

        let mut orders = self.orders.write().await;
        let order = orders.get_mut(exchange_order_id).expect("checked above");
        if order.status == ExchangeOrderStatus::Open {
            if let Some(limit_price) = order.price {
                if Self::crosses(order.side, limit_price, market_price) {
                    order.status = ExchangeOrderStatus::Filled;
                    order.filled_quantity = order.quantity;
                }
            }
        }
        Ok(Self::to_exchange_order(exchange_order_id, order))
    }

    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<ExchangeOrder> {
        self.check_error_injection().await?;
        let mut orders = self.orders.write().await;
        match orders.get_mut(exchange_order_id) {
            Some(order) => {
                if !matches!(order.status, ExchangeOrderStatus::Filled | ExchangeOrderStatus::Cancelled) {
                    order.status = ExchangeOrderStatus::Cancelled;
                }
                Ok(Self::to_exchange_order(exchange_order_id, order))
            }
            // Already gone on the exchange: cancel is idempotent, report cancelled.
            None => Ok(ExchangeOrder {
                exchange_order_id: exchange_order_id.to_string(),
                status: ExchangeOrderStatus::Cancelled,
                filled_quantity: Decimal::ZERO,
                avg_fill_price: None,
            }),
        }
        .map(|o| {
            debug!(%exchange_order_id, %symbol, "mock order cancel processed");
            o
        })
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        self.check_error_injection().await?;
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::not_found(format!("no simulated price for {symbol}")))
    }

    async fn get_all_tickers(&self) -> Result<IndexMap<String, Decimal>> {
        self.check_error_injection().await?;
        Ok(self.prices.read().await.clone())
    }

    async fn fetch_balance(&self) -> Result<IndexMap<String, Decimal>> {
        self.check_error_injection().await?;
        Ok(self.balances.read().await.clone())
    }

    async fn fetch_free_balance(&self) -> Result<IndexMap<String, Decimal>> {
        self.fetch_balance().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn precision() -> IndexMap<String, PrecisionRules> {
        let mut m = IndexMap::new();
        m.insert(
            "BTC/USDT".to_string(),
            PrecisionRules { tick_size: dec!(0.01), step_size: dec!(0.00001), min_qty: dec!(0.00001), min_notional: dec!(10) },
        );
        m
    }

    #[tokio::test]
    async fn market_order_fills_instantly() {
        let mock = MockConnector::new(precision());
        mock.set_price("BTC/USDT", dec!(50000)).await;
        let order = mock
            .place_order("BTC/USDT", OrderSide::Buy, OrderType::Market, dec!(0.001), None)
            .await
            .unwrap();
        assert_eq!(order.status, ExchangeOrderStatus::Filled);
        assert_eq!(order.filled_quantity, dec!(0.001));
    }

    #[tokio::test]
    async fn resting_limit_fills_once_price_crosses() {
        let mock = MockConnector::new(precision());
        mock.set_price("BTC/USDT", dec!(50000)).await;
        let order = mock
            .place_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, dec!(0.001), Some(dec!(49000)))
            .await
            .unwrap();
        assert_eq!(order.status, ExchangeOrderStatus::Open);

        let refreshed = mock.get_order_status(&order.exchange_order_id, "BTC/USDT").await.unwrap();
        assert_eq!(refreshed.status, ExchangeOrderStatus::Open);

        mock.set_price("BTC/USDT", dec!(48900)).await;
        let refreshed = mock.get_order_status(&order.exchange_order_id, "BTC/USDT").await.unwrap();
        assert_eq!(refreshed.status, ExchangeOrderStatus::Filled);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let mock = MockConnector::new(precision());
        mock.set_price("BTC/USDT", dec!(50000)).await;
        let order = mock
            .place_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, dec!(0.001), Some(dec!(49000)))
            .await
            .unwrap();
        let first = mock.cancel_order(&order.exchange_order_id, "BTC/USDT").await.unwrap();
        let second = mock.cancel_order(&order.exchange_order_id, "BTC/USDT").await.unwrap();
        assert_eq!(first.status, ExchangeOrderStatus::Cancelled);
        assert_eq!(second.status, ExchangeOrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn error_injection_surfaces_to_caller() {
        let mock = MockConnector::new(precision());
        mock.inject_error(InjectedError::Connection).await;
        let err = mock.get_current_price("BTC/USDT").await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
        mock.clear_error().await;
        mock.set_price("BTC/USDT", dec!(50000)).await;
        assert!(mock.get_current_price("BTC/USDT").await.is_ok());
    }
}
