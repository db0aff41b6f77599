use super::math::{calculate_log_returns, calculate_slope, calculate_z_score};
use crate::models::{BulkRow, Candle, LabelColumn, LabelUpdate, PatternFeature};

/// Look-ahead horizons of the slope labels (in candles)
const SLOPE_3_HORIZON: usize = 3;
const SLOPE_5_HORIZON: usize = 5;

/// Turns candle windows into shape vectors and forward labels
///
/// `window` is the number of log-returns per embedding, so a feature needs
/// `window + 1` candles.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    symbol: String,
    interval: String,
    window: usize,
}

impl PatternEngine {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>, window: usize) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            window,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    /// Compute the embedding of the last `window + 1` candles
    ///
    /// Returns `None` when there is not enough history. Spacing is not
    /// re-validated here; callers pass windows from the continuity guard.
    pub fn compute_feature(&self, history: &[Candle]) -> Option<PatternFeature> {
        let required = self.window + 1;
        if self.window == 0 || history.len() < required {
            return None;
        }

        let window = &history[history.len() - required..];
        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let embedding = calculate_z_score(&calculate_log_returns(&closes));

        let last = window.last()?;

        Some(PatternFeature {
            time: last.timestamp,
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            close_price: last.close,
            embedding,
        })
    }

    /// Compute labels for earlier candles now that the last candle has closed
    ///
    /// * `next_return` for n-2, realized at n-1
    /// * `next_slope_3` for n-4, over n-3..=n-1
    /// * `next_slope_5` for n-6, over n-5..=n-1
    pub fn compute_labels(&self, history: &[Candle]) -> Vec<LabelUpdate> {
        let mut updates = Vec::new();
        let n = history.len();
        if n < 2 {
            return updates;
        }

        let prev = &history[n - 2];
        let curr = &history[n - 1];
        if let Some(ret) = simple_return(prev.close, curr.close) {
            updates.push(LabelUpdate {
                target_time: prev.timestamp,
                column: LabelColumn::NextReturn,
                value: ret,
            });
        }

        for (horizon, column) in [
            (SLOPE_3_HORIZON, LabelColumn::NextSlope3),
            (SLOPE_5_HORIZON, LabelColumn::NextSlope5),
        ] {
            if n < horizon + 1 {
                continue;
            }
            let target = n - horizon - 1;
            let future: Vec<f64> = history[target + 1..].iter().map(|c| c.close).collect();

            updates.push(LabelUpdate {
                target_time: history[target].timestamp,
                column,
                value: calculate_slope(&future),
            });
        }

        updates
    }

    /// Offline variant: features for every full window plus look-ahead labels
    pub fn compute_bulk(&self, history: &[Candle]) -> Vec<BulkRow> {
        let mut rows = Vec::new();
        if self.window == 0 {
            return rows;
        }

        for i in self.window..history.len() {
            let Some(feature) = self.compute_feature(&history[i - self.window..=i]) else {
                continue;
            };

            let mut labels = Vec::new();

            if i + 1 < history.len() {
                if let Some(ret) = simple_return(history[i].close, history[i + 1].close) {
                    labels.push(LabelUpdate {
                        target_time: feature.time,
                        column: LabelColumn::NextReturn,
                        value: ret,
                    });
                }
            }

            for (horizon, column) in [
                (SLOPE_3_HORIZON, LabelColumn::NextSlope3),
                (SLOPE_5_HORIZON, LabelColumn::NextSlope5),
            ] {
                if i + horizon >= history.len() {
                    continue;
                }
                let future: Vec<f64> = history[i + 1..=i + horizon]
                    .iter()
                    .map(|c| c.close)
                    .collect();

                labels.push(LabelUpdate {
                    target_time: feature.time,
                    column,
                    value: calculate_slope(&future),
                });
            }

            rows.push(BulkRow { feature, labels });
        }

        rows
    }
}

fn simple_return(from: f64, to: f64) -> Option<f64> {
    if from == 0.0 {
        return None;
    }
    Some((to - from) / from)
}
