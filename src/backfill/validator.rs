use crate::models::Candle;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    #[error("non-positive {field} price: {value}")]
    NonPositivePrice { field: &'static str, value: f64 },
    #[error("negative volume: {0}")]
    NegativeVolume(f64),
    #[error("candle opened {open} is still open until {closes}")]
    NotClosed {
        open: DateTime<Utc>,
        closes: DateTime<Utc>,
    },
    #[error("high {high} is below {field} {value}")]
    HighBelow {
        field: &'static str,
        high: f64,
        value: f64,
    },
    #[error("low {low} is above {field} {value}")]
    LowAbove {
        field: &'static str,
        low: f64,
        value: f64,
    },
}

/// Hole in a downloaded series: `missing` candles between `after` and `before`
#[derive(Debug, Clone, PartialEq)]
pub struct Gap {
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    pub missing: i64,
}

/// Sanity checks for downloaded klines before they become features
pub struct CandleValidator {
    now: DateTime<Utc>,
    interval: Duration,
}

impl CandleValidator {
    pub fn new(now: DateTime<Utc>, interval_secs: i64) -> Self {
        Self {
            now,
            interval: Duration::seconds(interval_secs),
        }
    }

    pub fn validate(&self, candle: &Candle) -> Result<(), CandleError> {
        for (field, value) in [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(CandleError::NonPositivePrice { field, value });
            }
        }
        if candle.volume < 0.0 {
            return Err(CandleError::NegativeVolume(candle.volume));
        }
        // REST includes the kline still in progress
        let closes = candle.timestamp + self.interval;
        if closes > self.now {
            return Err(CandleError::NotClosed {
                open: candle.timestamp,
                closes,
            });
        }

        for (field, value) in [("low", candle.low), ("open", candle.open), ("close", candle.close)] {
            if candle.high < value {
                return Err(CandleError::HighBelow {
                    field,
                    high: candle.high,
                    value,
                });
            }
        }
        for (field, value) in [("open", candle.open), ("close", candle.close)] {
            if candle.low > value {
                return Err(CandleError::LowAbove {
                    field,
                    low: candle.low,
                    value,
                });
            }
        }

        Ok(())
    }
}

/// Spacing violations in a time-ordered series
pub fn find_gaps(candles: &[Candle], interval_secs: i64) -> Vec<Gap> {
    candles
        .windows(2)
        .filter_map(|pair| {
            let diff = (pair[1].timestamp - pair[0].timestamp).num_seconds();
            (diff != interval_secs).then(|| Gap {
                after: pair[0].timestamp,
                before: pair[1].timestamp,
                missing: diff / interval_secs - 1,
            })
        })
        .collect()
}

/// Split a time-ordered series at every spacing violation
pub fn contiguous_runs(candles: &[Candle], interval_secs: i64) -> Vec<&[Candle]> {
    let mut runs = Vec::new();
    let mut start = 0;

    for i in 1..candles.len() {
        let diff = (candles[i].timestamp - candles[i - 1].timestamp).num_seconds();
        if diff != interval_secs {
            runs.push(&candles[start..i]);
            start = i;
        }
    }
    if start < candles.len() {
        runs.push(&candles[start..]);
    }

    runs
}
