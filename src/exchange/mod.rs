// Exchange access: REST trading API and the kline stream
pub mod binance;
#[cfg(test)]
pub(crate) mod mock;
pub mod stream;

pub use binance::BinanceFutures;
pub use stream::{parse_kline_message, KlineStream};

use crate::models::{Candle, ExchangeFilters, OrderSide, PositionInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange api error (status={status}, code={code:?}): {msg}")]
    Api {
        status: u16,
        code: Option<i64>,
        msg: String,
    },
    #[error("could not parse exchange response: {0}")]
    Parse(String),
    #[error("symbol {0} not found in exchange info")]
    SymbolNotFound(String),
    #[error("asset {0} not found in balances")]
    AssetNotFound(String),
    #[error("api key and secret are required for signed endpoints")]
    MissingCredentials,
    #[error("request signing failed: {0}")]
    Signature(String),
}

/// Standard GTC limit order
#[derive(Debug, Clone, PartialEq)]
pub struct LimitOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub price: String,
    pub quantity: String,
    pub client_order_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionalKind {
    StopMarket,
    TakeProfitMarket,
}

impl ConditionalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionalKind::StopMarket => "STOP_MARKET",
            ConditionalKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Reduce-only trigger order used for stop-loss and take-profit
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: ConditionalKind,
    pub trigger_price: String,
    pub quantity: String,
}

/// Exchange acknowledgement (order id or algo id)
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: u64,
    pub side: String,
    pub order_type: String,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalOrderInfo {
    pub algo_id: u64,
    pub order_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomeRecord {
    pub income_type: String,
    pub income: f64,
    pub time: DateTime<Utc>,
}

/// Futures exchange operations used by the pipeline
///
/// All calls are expected to be bounded by a request-level timeout.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Klines oldest first, optionally starting at `start_time`
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn available_balance(&self, asset: &str) -> Result<f64, ExchangeError>;

    async fn wallet_balance(&self) -> Result<f64, ExchangeError>;

    async fn symbol_filters(&self, symbol: &str) -> Result<ExchangeFilters, ExchangeError>;

    /// Current position, `None` when flat
    async fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    async fn open_conditional_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<ConditionalOrderInfo>, ExchangeError>;

    async fn cancel_conditional_order(&self, algo_id: u64) -> Result<(), ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn place_limit_order(&self, order: &LimitOrder) -> Result<OrderAck, ExchangeError>;

    async fn place_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderAck, ExchangeError>;

    /// Reduce-only market order
    async fn place_market_close(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: &str,
    ) -> Result<OrderAck, ExchangeError>;

    async fn income_since(&self, start: DateTime<Utc>) -> Result<Vec<IncomeRecord>, ExchangeError>;
}
