//! Scriptable in-memory exchange for unit tests
use super::{
    ConditionalKind, ConditionalOrder, ConditionalOrderInfo, Exchange, ExchangeError,
    IncomeRecord, LimitOrder, OpenOrder, OrderAck,
};
use crate::models::{Candle, ExchangeFilters, OrderSide, PositionInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CancelAllOpenOrders,
    CancelConditional(u64),
    SetLeverage(u32),
    Limit(LimitOrder),
    Conditional(ConditionalOrder),
    MarketClose { side: OrderSide, quantity: String },
}

#[derive(Default)]
struct State {
    balance: f64,
    balance_script: VecDeque<f64>,
    balance_failures: u32,
    balance_calls: usize,
    wallet: f64,
    position: Option<PositionInfo>,
    position_after_entry: Option<PositionInfo>,
    fail_position: bool,
    fail_entry: bool,
    fail_cancel: bool,
    fail_market_close: bool,
    conditional_failures: HashMap<ConditionalKind, u32>,
    open_conditionals: Vec<ConditionalOrderInfo>,
    klines: Vec<Candle>,
    income: Vec<IncomeRecord>,
    next_id: u64,
    calls: Vec<Call>,
}

pub struct MockExchange {
    filters: ExchangeFilters,
    state: Mutex<State>,
}

fn api_error(msg: &str) -> ExchangeError {
    ExchangeError::Api {
        status: 400,
        code: Some(-1000),
        msg: msg.to_string(),
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            filters: ExchangeFilters {
                quantity_step_size: Decimal::new(1, 3),
                quantity_precision: 3,
                price_tick_size: Decimal::new(1, 2),
                price_precision: 2,
            },
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_filters(mut self, filters: ExchangeFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_balance(self, balance: f64) -> Self {
        self.with_state(|s| s.balance = balance)
    }

    /// Balances returned before falling back to the steady balance
    pub fn with_balance_script(self, script: Vec<f64>) -> Self {
        self.with_state(|s| s.balance_script = script.into())
    }

    pub fn with_balance_failures(self, count: u32) -> Self {
        self.with_state(|s| s.balance_failures = count)
    }

    pub fn with_wallet(self, wallet: f64) -> Self {
        self.with_state(|s| s.wallet = wallet)
    }

    pub fn with_position(self, position: PositionInfo) -> Self {
        self.with_state(|s| s.position = Some(position))
    }

    /// Position that appears once the entry order is accepted
    pub fn with_fill_on_entry(self, position: PositionInfo) -> Self {
        self.with_state(|s| s.position_after_entry = Some(position))
    }

    pub fn failing_position(self) -> Self {
        self.with_state(|s| s.fail_position = true)
    }

    pub fn failing_entry(self) -> Self {
        self.with_state(|s| s.fail_entry = true)
    }

    pub fn failing_cancel(self) -> Self {
        self.with_state(|s| s.fail_cancel = true)
    }

    pub fn failing_market_close(self) -> Self {
        self.with_state(|s| s.fail_market_close = true)
    }

    /// Reject the next `count` conditional orders of this kind
    pub fn failing_conditional(self, kind: ConditionalKind, count: u32) -> Self {
        self.with_state(|s| {
            s.conditional_failures.insert(kind, count);
        })
    }

    pub fn with_open_conditionals(self, ids: &[u64]) -> Self {
        self.with_state(|s| {
            s.open_conditionals = ids
                .iter()
                .map(|&algo_id| ConditionalOrderInfo {
                    algo_id,
                    order_type: "STOP_MARKET".to_string(),
                })
                .collect()
        })
    }

    pub fn with_klines(self, klines: Vec<Candle>) -> Self {
        self.with_state(|s| s.klines = klines)
    }

    pub fn with_income(self, income: Vec<IncomeRecord>) -> Self {
        self.with_state(|s| s.income = income)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn balance_calls(&self) -> usize {
        self.state.lock().unwrap().balance_calls
    }

    pub fn limit_orders(&self) -> Vec<LimitOrder> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Limit(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    pub fn conditional_orders(&self) -> Vec<ConditionalOrder> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Conditional(o) => Some(o),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn klines(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: u32,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state.lock().unwrap();
        let filtered: Vec<Candle> = state
            .klines
            .iter()
            .filter(|c| start_time.map_or(true, |start| c.timestamp >= start))
            .cloned()
            .collect();

        Ok(match start_time {
            Some(_) => filtered.into_iter().take(limit as usize).collect(),
            None => {
                let skip = filtered.len().saturating_sub(limit as usize);
                filtered.into_iter().skip(skip).collect()
            }
        })
    }

    async fn available_balance(&self, asset: &str) -> Result<f64, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.balance_calls += 1;
        if state.balance_failures > 0 {
            state.balance_failures -= 1;
            return Err(api_error(&format!("balance unavailable for {}", asset)));
        }
        Ok(state.balance_script.pop_front().unwrap_or(state.balance))
    }

    async fn wallet_balance(&self) -> Result<f64, ExchangeError> {
        Ok(self.state.lock().unwrap().wallet)
    }

    async fn symbol_filters(&self, _symbol: &str) -> Result<ExchangeFilters, ExchangeError> {
        Ok(self.filters.clone())
    }

    async fn position(&self, _symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        let state = self.state.lock().unwrap();
        if state.fail_position {
            return Err(api_error("position risk unavailable"));
        }
        Ok(state.position.clone())
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Limit(o) => Some(OpenOrder {
                    order_id: 0,
                    side: o.side.as_str().to_string(),
                    order_type: "LIMIT".to_string(),
                    price: o.price.clone(),
                }),
                _ => None,
            })
            .collect())
    }

    async fn cancel_all_open_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CancelAllOpenOrders);
        if state.fail_cancel {
            return Err(api_error("cancel failed"));
        }
        Ok(())
    }

    async fn open_conditional_orders(
        &self,
        _symbol: &str,
    ) -> Result<Vec<ConditionalOrderInfo>, ExchangeError> {
        Ok(self.state.lock().unwrap().open_conditionals.clone())
    }

    async fn cancel_conditional_order(&self, algo_id: u64) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CancelConditional(algo_id));
        state.open_conditionals.retain(|o| o.algo_id != algo_id);
        Ok(())
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::SetLeverage(leverage));
        Ok(())
    }

    async fn place_limit_order(&self, order: &LimitOrder) -> Result<OrderAck, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_entry {
            return Err(api_error("Margin is insufficient."));
        }
        state.calls.push(Call::Limit(order.clone()));
        if let Some(position) = state.position_after_entry.take() {
            state.position = Some(position);
        }
        state.next_id += 1;
        Ok(OrderAck { id: state.next_id })
    }

    async fn place_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderAck, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.conditional_failures.get_mut(&order.kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(api_error("Order would immediately trigger."));
            }
        }
        state.calls.push(Call::Conditional(order.clone()));
        state.next_id += 1;
        let algo_id = state.next_id;
        state.open_conditionals.push(ConditionalOrderInfo {
            algo_id,
            order_type: order.kind.as_str().to_string(),
        });
        Ok(OrderAck { id: algo_id })
    }

    async fn place_market_close(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: &str,
    ) -> Result<OrderAck, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_market_close {
            return Err(api_error("ReduceOnly Order is rejected."));
        }
        state.calls.push(Call::MarketClose {
            side,
            quantity: quantity.to_string(),
        });
        state.position = None;
        state.next_id += 1;
        Ok(OrderAck { id: state.next_id })
    }

    async fn income_since(&self, start: DateTime<Utc>) -> Result<Vec<IncomeRecord>, ExchangeError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .income
            .iter()
            .filter(|r| r.time >= start)
            .cloned()
            .collect())
    }
}
