use crate::exchange::Exchange;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BalanceWait {
    /// Buying power reached the minimum notional
    Ready(f64),
    TimedOut,
}

/// Poll the available quote balance until `balance × buying_power_factor`
/// reaches `min_notional` or `timeout` elapses
///
/// Errors while polling are logged and polling continues.
pub async fn wait_for_balance(
    exchange: &dyn Exchange,
    asset: &str,
    buying_power_factor: f64,
    min_notional: f64,
    poll_interval: Duration,
    timeout: Duration,
) -> BalanceWait {
    let deadline = Instant::now() + timeout;
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(asset, min_notional, "Waiting for funds to be released");

    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => {
                tracing::warn!(
                    asset,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for balance, proceeding"
                );
                return BalanceWait::TimedOut;
            }
            _ = ticker.tick() => {
                match exchange.available_balance(asset).await {
                    Ok(balance) if balance * buying_power_factor >= min_notional => {
                        tracing::info!(asset, balance, "Balance available");
                        return BalanceWait::Ready(balance);
                    }
                    Ok(balance) => {
                        tracing::debug!(asset, balance, "Balance below minimum notional");
                    }
                    Err(e) => {
                        tracing::warn!(asset, error = %e, "Error fetching balance");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;

    const POLL: Duration = Duration::from_millis(200);
    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_returns_immediately_when_funded() {
        let exchange = MockExchange::new().with_balance(100.0);
        let started = Instant::now();

        let result = wait_for_balance(&exchange, "USDT", 0.9 * 3.0, 21.0, POLL, TIMEOUT).await;

        assert_eq!(result, BalanceWait::Ready(100.0));
        assert!(started.elapsed() < POLL);
        assert_eq!(exchange.balance_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_release() {
        let exchange = MockExchange::new()
            .with_balance(100.0)
            .with_balance_script(vec![1.0, 2.0, 50.0]);
        let started = Instant::now();

        let result = wait_for_balance(&exchange, "USDT", 2.7, 21.0, POLL, TIMEOUT).await;

        assert_eq!(result, BalanceWait::Ready(50.0));
        assert_eq!(exchange.balance_calls(), 3);
        // Two full poll intervals elapsed before the third check
        assert!(started.elapsed() >= POLL * 2);
        assert!(started.elapsed() < TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_on_paused_clock() {
        let exchange = MockExchange::new().with_balance(1.0);
        let started = Instant::now();

        let result = wait_for_balance(&exchange, "USDT", 2.7, 21.0, POLL, TIMEOUT).await;

        assert_eq!(result, BalanceWait::TimedOut);
        assert!(started.elapsed() >= TIMEOUT);
        assert!(exchange.balance_calls() >= 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_polling_through_errors() {
        let exchange = MockExchange::new()
            .with_balance(100.0)
            .with_balance_failures(2);

        let result = wait_for_balance(&exchange, "USDT", 2.7, 21.0, POLL, TIMEOUT).await;

        assert_eq!(result, BalanceWait::Ready(100.0));
        assert_eq!(exchange.balance_calls(), 3);
    }
}
