use crate::models::PatternMatch;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendOutcome {
    Up,
    Down,
}

/// One neighbour as presented to the decision service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDetail {
    pub time: DateTime<Utc>,
    pub trend_slope: f64,
    pub trend_outcome: TrendOutcome,
    pub immediate_return: f64,
}

/// How the nearest historical shapes played out
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusStats {
    pub positive: usize,
    pub total: usize,
    /// Share of neighbours trending up, 0-100
    pub consensus_pct: f64,
    pub average_slope: f64,
    pub rows: Vec<MatchDetail>,
}

/// `next_slope_3`, or `next_slope_5` when the 3-candle slope is zero or unset
pub fn trend_slope(m: &PatternMatch) -> f64 {
    match m.next_slope_3 {
        Some(slope) if slope != 0.0 => slope,
        _ => m.next_slope_5.unwrap_or(0.0),
    }
}

impl ConsensusStats {
    pub fn from_matches(matches: &[PatternMatch]) -> Self {
        let rows: Vec<MatchDetail> = matches
            .iter()
            .map(|m| {
                let slope = trend_slope(m);
                MatchDetail {
                    time: m.time,
                    trend_slope: slope,
                    trend_outcome: if slope > 0.0 {
                        TrendOutcome::Up
                    } else {
                        TrendOutcome::Down
                    },
                    immediate_return: m.next_return,
                }
            })
            .collect();

        let total = rows.len();
        let positive = rows
            .iter()
            .filter(|r| r.trend_outcome == TrendOutcome::Up)
            .count();

        let (consensus_pct, average_slope) = if total == 0 {
            (0.0, 0.0)
        } else {
            let sum: f64 = rows.iter().map(|r| r.trend_slope).sum();
            (
                positive as f64 / total as f64 * 100.0,
                sum / total as f64,
            )
        };

        Self {
            positive,
            total,
            consensus_pct,
            average_slope,
            rows,
        }
    }
}
