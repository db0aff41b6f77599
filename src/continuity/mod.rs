use crate::models::Candle;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContinuityError {
    #[error("not enough history after filtering: need {needed}, got {got}")]
    InsufficientHistory { needed: usize, got: usize },
    #[error(
        "continuity gap: history ends {last}, live candle {live}, diff {diff}s (expected {expected}s)"
    )]
    ContinuityGap {
        last: DateTime<Utc>,
        live: DateTime<Utc>,
        diff: i64,
        expected: i64,
    },
}

/// Merge a REST history window with the candle that just closed on the stream
///
/// Drops any history at or after the live candle (REST windows often already
/// contain it), keeps the last `window_size` entries and requires the live
/// candle to follow the last of them by exactly one interval.
///
/// # Returns
/// `window_size + 1` candles ending with `live`
pub fn safe_merge(
    history: &[Candle],
    live: &Candle,
    window_size: usize,
    interval_secs: i64,
) -> Result<Vec<Candle>, ContinuityError> {
    let older: Vec<&Candle> = history
        .iter()
        .filter(|c| c.timestamp < live.timestamp)
        .collect();

    if older.len() < window_size {
        return Err(ContinuityError::InsufficientHistory {
            needed: window_size,
            got: older.len(),
        });
    }

    let needed = &older[older.len() - window_size..];

    if let Some(last) = needed.last() {
        let diff = (live.timestamp - last.timestamp).num_seconds();
        if diff != interval_secs {
            return Err(ContinuityError::ContinuityGap {
                last: last.timestamp,
                live: live.timestamp,
                diff,
                expected: interval_secs,
            });
        }
    }

    let mut merged: Vec<Candle> = needed.iter().map(|c| (*c).clone()).collect();
    merged.push(live.clone());
    Ok(merged)
}
