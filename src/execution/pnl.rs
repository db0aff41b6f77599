use crate::exchange::{Exchange, ExchangeError, IncomeRecord};
use chrono::{DateTime, Utc};

/// Income types that make up realized daily PnL
const PNL_INCOME_TYPES: [&str; 3] = ["REALIZED_PNL", "FUNDING_FEE", "COMMISSION"];

#[derive(Debug, Clone, PartialEq)]
pub struct DailyPnl {
    pub since: DateTime<Utc>,
    pub realized_pnl: f64,
    pub funding_fees: f64,
    pub commissions: f64,
    /// Sum of the three components
    pub net_pnl: f64,
    pub wallet_balance: f64,
    /// `wallet − net_pnl`, assumes no transfers during the day
    pub start_balance: f64,
    /// Percent of the start balance; zero when the start balance is not positive
    pub roi_pct: f64,
}

pub fn summarize(income: &[IncomeRecord], wallet_balance: f64, since: DateTime<Utc>) -> DailyPnl {
    let sum_of = |kind: &str| -> f64 {
        income
            .iter()
            .filter(|r| r.income_type == kind && r.time >= since)
            .map(|r| r.income)
            .sum()
    };

    let realized_pnl = sum_of(PNL_INCOME_TYPES[0]);
    let funding_fees = sum_of(PNL_INCOME_TYPES[1]);
    let commissions = sum_of(PNL_INCOME_TYPES[2]);
    let net_pnl = realized_pnl + funding_fees + commissions;
    let start_balance = wallet_balance - net_pnl;

    let roi_pct = if start_balance > 0.0 {
        net_pnl / start_balance * 100.0
    } else {
        0.0
    };

    DailyPnl {
        since,
        realized_pnl,
        funding_fees,
        commissions,
        net_pnl,
        wallet_balance,
        start_balance,
        roi_pct,
    }
}

/// Realized PnL and ROI since 00:00 UTC of `now`
pub async fn daily_pnl(
    exchange: &dyn Exchange,
    now: DateTime<Utc>,
) -> Result<DailyPnl, ExchangeError> {
    let since = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);

    let income = exchange.income_since(since).await?;
    let wallet = exchange.wallet_balance().await?;

    let summary = summarize(&income, wallet, since);
    tracing::info!(
        net_pnl = summary.net_pnl,
        roi_pct = summary.roi_pct,
        wallet = summary.wallet_balance,
        "Daily realized PnL"
    );
    Ok(summary)
}
