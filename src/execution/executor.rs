use super::balance::{wait_for_balance, BalanceWait};
use super::quantize::{floor_to_step, format_fixed, round_to_tick, to_decimal};
use super::ExecutionError;
use crate::config::{MarketConfig, TradingConfig};
use crate::exchange::{ConditionalKind, ConditionalOrder, Exchange, LimitOrder};
use crate::models::{ExchangeFilters, PositionInfo, Side};
use std::sync::Arc;
use tokio::time::Duration;

/// Per-symbol trading parameters, fixed for the life of the executor
#[derive(Debug, Clone)]
pub struct TradeParams {
    pub symbol: String,
    pub quote_asset: String,
    pub trade_ratio: f64,
    pub leverage: u32,
    pub sl_pct: f64,
    pub tp_pct: f64,
    pub min_notional: f64,
    pub balance_poll_interval: Duration,
    pub balance_timeout: Duration,
    pub protective_attempts: u32,
    pub protective_retry_delay: Duration,
}

impl TradeParams {
    pub fn from_config(market: &MarketConfig, trading: &TradingConfig) -> Self {
        Self {
            symbol: market.symbol.clone(),
            quote_asset: trading.quote_asset.clone(),
            trade_ratio: trading.trade_ratio,
            leverage: trading.leverage,
            sl_pct: trading.sl_pct,
            tp_pct: trading.tp_pct,
            min_notional: trading.min_notional,
            balance_poll_interval: trading.balance_poll_interval(),
            balance_timeout: trading.balance_timeout(),
            protective_attempts: trading.protective_attempts.max(1),
            protective_retry_delay: trading.protective_retry_delay(),
        }
    }

    fn buying_power_factor(&self) -> f64 {
        self.trade_ratio * self.leverage as f64
    }
}

/// State of the stop-loss / take-profit pair after an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Both protective orders are live
    Protected,
    /// A protective order failed; orders were cancelled and any position closed
    Flattened,
    /// Protective orders failed and so did the flatten
    Unprotected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeReport {
    pub side: Side,
    pub entry_order_id: u64,
    pub quantity: String,
    pub entry_price: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub protection: Protection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    /// A position already exists; nothing was placed
    SkippedOpenPosition(PositionInfo),
    Placed(TradeReport),
}

/// Turns a directional verdict into exchange-legal entry and protective orders
pub struct OrderExecutor {
    exchange: Arc<dyn Exchange>,
    params: TradeParams,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn Exchange>, params: TradeParams) -> Self {
        Self { exchange, params }
    }

    pub fn params(&self) -> &TradeParams {
        &self.params
    }

    /// Current position for the symbol, `None` when flat
    pub async fn has_open_position(&self) -> Result<Option<PositionInfo>, ExecutionError> {
        Ok(self.exchange.position(&self.params.symbol).await?)
    }

    pub async fn has_open_orders(&self) -> Result<bool, ExecutionError> {
        let orders = self.exchange.open_orders(&self.params.symbol).await?;
        Ok(!orders.is_empty())
    }

    /// Push the configured leverage to the exchange
    pub async fn sync_leverage(&self) -> Result<(), ExecutionError> {
        self.exchange
            .set_leverage(&self.params.symbol, self.params.leverage)
            .await?;
        tracing::info!(
            symbol = %self.params.symbol,
            leverage = self.params.leverage,
            "Leverage set on exchange"
        );
        Ok(())
    }

    /// `entry × (1 ∓ sl_pct / leverage)`; equity risk converted to price move
    pub fn stop_loss_price(&self, entry_price: f64, side: Side) -> f64 {
        let movement = self.params.sl_pct / self.params.leverage as f64;
        match side {
            Side::Long => entry_price * (1.0 - movement),
            Side::Short => entry_price * (1.0 + movement),
        }
    }

    pub fn take_profit_price(&self, entry_price: f64, side: Side) -> f64 {
        let movement = self.params.tp_pct / self.params.leverage as f64;
        match side {
            Side::Long => entry_price * (1.0 + movement),
            Side::Short => entry_price * (1.0 - movement),
        }
    }

    /// Position size before step rounding
    pub fn raw_quantity(&self, balance: f64, entry_price: f64) -> f64 {
        balance * self.params.buying_power_factor() / entry_price
    }

    /// Cancel standard and conditional orders; failures are logged only
    pub async fn reset_orders(&self) {
        let symbol = &self.params.symbol;

        if let Err(e) = self.exchange.cancel_all_open_orders(symbol).await {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to cancel open orders");
        }

        match self.exchange.open_conditional_orders(symbol).await {
            Ok(orders) => {
                if !orders.is_empty() {
                    tracing::info!(count = orders.len(), "Cancelling conditional orders");
                }
                for order in orders {
                    if let Err(e) = self.exchange.cancel_conditional_order(order.algo_id).await {
                        tracing::warn!(
                            algo_id = order.algo_id,
                            error = %e,
                            "Failed to cancel conditional order"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Failed to list conditional orders");
            }
        }
    }

    /// Run one trade cycle for an actionable side at `entry_price`
    pub async fn place_trade(
        &self,
        side: Side,
        entry_price: f64,
    ) -> Result<TradeOutcome, ExecutionError> {
        if let Some(position) = self.has_open_position().await? {
            tracing::info!(
                symbol = %self.params.symbol,
                side = position.side.as_str(),
                quantity = position.quantity,
                "Position already open, skipping entry"
            );
            return Ok(TradeOutcome::SkippedOpenPosition(position));
        }

        self.reset_orders().await;

        let wait = wait_for_balance(
            self.exchange.as_ref(),
            &self.params.quote_asset,
            self.params.buying_power_factor(),
            self.params.min_notional,
            self.params.balance_poll_interval,
            self.params.balance_timeout,
        )
        .await;

        let balance = match wait {
            BalanceWait::Ready(balance) => balance,
            BalanceWait::TimedOut => {
                self.exchange
                    .available_balance(&self.params.quote_asset)
                    .await?
            }
        };

        let filters = self.exchange.symbol_filters(&self.params.symbol).await?;

        let quantity = floor_to_step(
            self.raw_quantity(balance, entry_price),
            filters.quantity_step_size,
        )?;
        if quantity.is_zero() {
            return Err(ExecutionError::InsufficientBalance {
                asset: self.params.quote_asset.clone(),
                balance,
                price: entry_price,
            });
        }
        let quantity = format_fixed(quantity, filters.quantity_precision);

        let entry = self.format_price(entry_price, &filters)?;
        let stop_loss = self.format_price(self.stop_loss_price(entry_price, side), &filters)?;
        let take_profit = self.format_price(self.take_profit_price(entry_price, side), &filters)?;

        tracing::info!(
            symbol = %self.params.symbol,
            side = side.as_str(),
            %quantity,
            %entry,
            %stop_loss,
            %take_profit,
            "Placing trade"
        );

        let entry_order = LimitOrder {
            symbol: self.params.symbol.clone(),
            side: side.entry_order_side(),
            price: entry.clone(),
            quantity: quantity.clone(),
            client_order_id: format!("pt-{}", uuid::Uuid::new_v4().simple()),
        };
        let ack = self
            .exchange
            .place_limit_order(&entry_order)
            .await
            .map_err(ExecutionError::EntryRejected)?;
        tracing::info!(order_id = ack.id, price = %entry, "Limit entry placed");

        let stop_placed = self
            .place_protective(side, ConditionalKind::StopMarket, &stop_loss, &quantity)
            .await;
        let target_placed = self
            .place_protective(side, ConditionalKind::TakeProfitMarket, &take_profit, &quantity)
            .await;

        let protection = if stop_placed && target_placed {
            Protection::Protected
        } else {
            tracing::warn!(
                stop_placed,
                target_placed,
                "Protective orders missing, flattening"
            );
            self.flatten(&filters).await
        };

        Ok(TradeOutcome::Placed(TradeReport {
            side,
            entry_order_id: ack.id,
            quantity,
            entry_price: entry,
            stop_loss,
            take_profit,
            protection,
        }))
    }

    fn format_price(&self, price: f64, filters: &ExchangeFilters) -> Result<String, ExecutionError> {
        let rounded = round_to_tick(price, filters.price_tick_size)?;
        Ok(format_fixed(rounded, filters.price_precision))
    }

    async fn place_protective(
        &self,
        side: Side,
        kind: ConditionalKind,
        trigger_price: &str,
        quantity: &str,
    ) -> bool {
        let order = ConditionalOrder {
            symbol: self.params.symbol.clone(),
            side: side.exit_order_side(),
            kind,
            trigger_price: trigger_price.to_string(),
            quantity: quantity.to_string(),
        };

        for attempt in 1..=self.params.protective_attempts {
            match self.exchange.place_conditional_order(&order).await {
                Ok(ack) => {
                    tracing::info!(
                        kind = kind.as_str(),
                        algo_id = ack.id,
                        trigger = trigger_price,
                        "Protective order placed"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        kind = kind.as_str(),
                        attempt,
                        max_attempts = self.params.protective_attempts,
                        error = %e,
                        "Protective order failed"
                    );
                    if attempt < self.params.protective_attempts {
                        tokio::time::sleep(self.params.protective_retry_delay).await;
                    }
                }
            }
        }

        false
    }

    /// Cancel everything for the symbol and close any position at market
    async fn flatten(&self, filters: &ExchangeFilters) -> Protection {
        self.reset_orders().await;

        let position = match self.exchange.position(&self.params.symbol).await {
            Ok(position) => position,
            Err(e) => {
                tracing::error!(error = %e, "Flatten failed: position unknown");
                return Protection::Unprotected;
            }
        };

        let Some(position) = position else {
            tracing::info!("No position after cancel, entry never filled");
            return Protection::Flattened;
        };

        let quantity = match to_decimal(position.quantity) {
            Ok(q) => format_fixed(q, filters.quantity_precision),
            Err(e) => {
                tracing::error!(error = %e, "Flatten failed: bad position quantity");
                return Protection::Unprotected;
            }
        };

        match self
            .exchange
            .place_market_close(
                &self.params.symbol,
                position.side.exit_order_side(),
                &quantity,
            )
            .await
        {
            Ok(ack) => {
                tracing::warn!(order_id = ack.id, %quantity, "Position flattened at market");
                Protection::Flattened
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    side = position.side.as_str(),
                    %quantity,
                    "Flatten failed, position is unprotected"
                );
                Protection::Unprotected
            }
        }
    }
}
