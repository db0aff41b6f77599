//! In-memory doubles for driving the decision cycle end to end
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use patterntrader::audit::{AuditError, AuditRecord, AuditSink};
use patterntrader::decision::{DecisionError, DecisionRequest, DecisionService, Verdict};
use patterntrader::exchange::{
    ConditionalOrder, ConditionalOrderInfo, Exchange, ExchangeError, IncomeRecord, LimitOrder,
    OpenOrder, OrderAck,
};
use patterntrader::models::{Candle, ExchangeFilters, OrderSide, PositionInfo, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Mutex;

/// Seeded random walk of one-minute candles
pub fn random_walk(seed: u64, n: usize) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let mut close = 2000.0;

    (0..n)
        .map(|i| {
            let open = close;
            close *= 1.0 + rng.gen_range(-0.002..0.002);
            Candle {
                timestamp: start + Duration::minutes(i as i64),
                open,
                high: open.max(close) * 1.0005,
                low: open.min(close) * 0.9995,
                close,
                volume: rng.gen_range(5.0..50.0),
            }
        })
        .collect()
}

#[derive(Default)]
struct State {
    visible_until: Option<DateTime<Utc>>,
    position: Option<PositionInfo>,
    limit_orders: Vec<LimitOrder>,
    conditional_orders: Vec<ConditionalOrder>,
    next_id: u64,
}

/// Exchange that serves a fixed candle series and fills every entry at once
pub struct FakeExchange {
    candles: Vec<Candle>,
    balance: f64,
    state: Mutex<State>,
}

impl FakeExchange {
    pub fn new(candles: Vec<Candle>, balance: f64) -> Self {
        Self {
            candles,
            balance,
            state: Mutex::new(State::default()),
        }
    }

    /// Hide candles opening after `time` from kline requests
    pub fn advance_to(&self, time: DateTime<Utc>) {
        self.state.lock().unwrap().visible_until = Some(time);
    }

    pub fn limit_orders(&self) -> Vec<LimitOrder> {
        self.state.lock().unwrap().limit_orders.clone()
    }

    pub fn conditional_orders(&self) -> Vec<ConditionalOrder> {
        self.state.lock().unwrap().conditional_orders.clone()
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn klines(
        &self,
        _symbol: &str,
        _interval: &str,
        limit: u32,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let until = self.state.lock().unwrap().visible_until;
        let visible: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| until.map_or(true, |t| c.timestamp <= t))
            .filter(|c| start_time.map_or(true, |s| c.timestamp >= s))
            .cloned()
            .collect();

        Ok(match start_time {
            Some(_) => visible.into_iter().take(limit as usize).collect(),
            None => {
                let skip = visible.len().saturating_sub(limit as usize);
                visible.into_iter().skip(skip).collect()
            }
        })
    }

    async fn available_balance(&self, _asset: &str) -> Result<f64, ExchangeError> {
        Ok(self.balance)
    }

    async fn wallet_balance(&self) -> Result<f64, ExchangeError> {
        Ok(self.balance)
    }

    async fn symbol_filters(&self, _symbol: &str) -> Result<ExchangeFilters, ExchangeError> {
        Ok(ExchangeFilters {
            quantity_step_size: Decimal::new(1, 3),
            quantity_precision: 3,
            price_tick_size: Decimal::new(1, 2),
            price_precision: 2,
        })
    }

    async fn position(&self, _symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        Ok(self.state.lock().unwrap().position.clone())
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(vec![])
    }

    async fn cancel_all_open_orders(&self, _symbol: &str) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn open_conditional_orders(
        &self,
        _symbol: &str,
    ) -> Result<Vec<ConditionalOrderInfo>, ExchangeError> {
        Ok(vec![])
    }

    async fn cancel_conditional_order(&self, _algo_id: u64) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn place_limit_order(&self, order: &LimitOrder) -> Result<OrderAck, ExchangeError> {
        let quantity: f64 = order
            .quantity
            .parse()
            .map_err(|_| ExchangeError::Parse(order.quantity.clone()))?;
        {
            let mut state = self.state.lock().unwrap();
            state.limit_orders.push(order.clone());
            state.position = Some(PositionInfo {
                side: match order.side {
                    OrderSide::Buy => Side::Long,
                    OrderSide::Sell => Side::Short,
                },
                quantity,
            });
        }
        Ok(OrderAck { id: self.next_id() })
    }

    async fn place_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderAck, ExchangeError> {
        self.state
            .lock()
            .unwrap()
            .conditional_orders
            .push(order.clone());
        Ok(OrderAck { id: self.next_id() })
    }

    async fn place_market_close(
        &self,
        _symbol: &str,
        _side: OrderSide,
        _quantity: &str,
    ) -> Result<OrderAck, ExchangeError> {
        self.state.lock().unwrap().position = None;
        Ok(OrderAck { id: self.next_id() })
    }

    async fn income_since(&self, _start: DateTime<Utc>) -> Result<Vec<IncomeRecord>, ExchangeError> {
        Ok(vec![])
    }
}

/// Decision service returning the same verdict every time
pub struct ScriptedDecision {
    pub verdict: Verdict,
    pub requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedDecision {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DecisionService for ScriptedDecision {
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, DecisionError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.verdict.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingSink {
    /// Records published so far, after letting spawned publishers run
    pub async fn settled(&self, expected: usize) -> Vec<AuditRecord> {
        for _ in 0..200 {
            if self.records.lock().unwrap().len() >= expected {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn publish(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
