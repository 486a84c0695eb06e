//! Exchange Connector capability set (§6.1) and its in-process mock.
//!
//! A connector is one adapter per exchange; this crate ships only the mock
//! used by tests and paper operation. Real adapters are external
//! collaborators implementing the same trait.

mod mock;

pub use mock::MockConnector;

use async_trait::async_trait;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::grid::PrecisionRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeOrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub exchange_order_id: String,
    pub status: ExchangeOrderStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
}

/// Canonicalize an exchange-native symbol (e.g. `BTCUSDT`) into `BASE/QUOTE`
/// form. Symbols already containing a slash pass through unchanged.
pub fn normalize_symbol(pair: &str) -> String {
    if pair.contains('/') || pair.len() <= 3 {
        return pair.to_string();
    }
    const FOUR_LETTER_QUOTES: &[&str] = &["USDT"];
    const THREE_LETTER_QUOTES: &[&str] = &["USD", "BTC", "ETH", "BNB"];
    for quote in FOUR_LETTER_QUOTES {
        if pair.ends_with(quote) && pair.len() > quote.len() {
            let (base, q) = pair.split_at(pair.len() - quote.len());
            return format!("{base}/{q}");
        }
    }
    for quote in THREE_LETTER_QUOTES {
        if pair.ends_with(quote) && pair.len() > quote.len() {
            let (base, q) = pair.split_at(pair.len() - quote.len());
            return format!("{base}/{q}");
        }
    }
    pair.to_string()
}

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    async fn get_precision_rules(&self) -> Result<IndexMap<String, PrecisionRules>>;
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<ExchangeOrder>;
    async fn get_order_status(&self, exchange_order_id: &str, symbol: &str) -> Result<ExchangeOrder>;
    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<ExchangeOrder>;
    async fn get_current_price(&self, symbol: &str) -> Result<Decimal>;
    async fn get_all_tickers(&self) -> Result<IndexMap<String, Decimal>>;
    async fn fetch_balance(&self) -> Result<IndexMap<String, Decimal>>;
    async fn fetch_free_balance(&self) -> Result<IndexMap<String, Decimal>>;
}

#[cfg(test)]
mod normalize_tests {
    use super::normalize_symbol;

    #[test]
    fn leaves_slashed_symbols_alone() {
        assert_eq!(normalize_symbol("BTC/USDT"), "BTC/USDT");
    }

    #[test]
    fn splits_usdt_suffix() {
        assert_eq!(normalize_symbol("BTCUSDT"), "BTC/USDT");
    }

    #[test]
    fn splits_three_letter_quote() {
        assert_eq!(normalize_symbol("ETHBTC"), "ETH/BTC");
    }

    #[test]
    fn leaves_short_symbols_alone() {
        assert_eq!(normalize_symbol("BTC"), "BTC");
    }
}
