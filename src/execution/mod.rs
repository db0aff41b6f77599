// Order execution: sizing, entry, protective orders, account PnL
pub mod balance;
pub mod executor;
pub mod pnl;
pub mod quantize;

pub use balance::{wait_for_balance, BalanceWait};
pub use executor::{OrderExecutor, Protection, TradeOutcome, TradeParams, TradeReport};
pub use pnl::{daily_pnl, DailyPnl};

use crate::exchange::ExchangeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("entry order rejected: {0}")]
    EntryRejected(#[source] ExchangeError),
    #[error("insufficient balance: {balance} {asset} sizes to zero at price {price}")]
    InsufficientBalance {
        asset: String,
        balance: f64,
        price: f64,
    },
    #[error("invalid numeric value: {0}")]
    InvalidNumber(String),
}
