use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV candlestick for the traded symbol
///
/// `timestamp` is the candle open time and the ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Shape vector of one closed candle window
///
/// The embedding is a frozen snapshot: it is never renormalized after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFeature {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub interval: String,
    pub close_price: f64,
    pub embedding: Vec<f64>,
}

/// Nearest-neighbour hit returned by the pattern store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub interval: String,
    pub next_return: f64,
    pub next_slope_3: Option<f64>,
    pub next_slope_5: Option<f64>,
    pub embedding: Vec<f64>,
    /// Cosine distance, ascending = most similar
    pub distance: f64,
}

/// Forward label columns of a stored pattern row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelColumn {
    NextReturn,
    NextSlope3,
    NextSlope5,
}

impl LabelColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelColumn::NextReturn => "next_return",
            LabelColumn::NextSlope3 => "next_slope_3",
            LabelColumn::NextSlope5 => "next_slope_5",
        }
    }
}

/// A realized outcome for a past candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelUpdate {
    pub target_time: DateTime<Utc>,
    pub column: LabelColumn,
    pub value: f64,
}

/// One backfill row: a feature with whatever look-ahead labels history allowed
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRow {
    pub feature: PatternFeature,
    pub labels: Vec<LabelUpdate>,
}

impl BulkRow {
    pub fn label(&self, column: LabelColumn) -> Option<f64> {
        self.labels
            .iter()
            .find(|l| l.column == column)
            .map(|l| l.value)
    }
}

/// Per-symbol trading rules from the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeFilters {
    pub quantity_step_size: Decimal,
    pub quantity_precision: u32,
    pub price_tick_size: Decimal,
    pub price_precision: u32,
}

/// Direction of a position or of an actionable verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens a position in this direction
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction
    pub fn exit_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Decision produced by the reasoning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Long,
    Short,
    Hold,
}

impl Signal {
    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Long => Some(Side::Long),
            Signal::Short => Some(Side::Short),
            Signal::Hold => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Long => "LONG",
            Signal::Short => "SHORT",
            Signal::Hold => "HOLD",
        }
    }
}

/// Open position on the exchange for the traded symbol
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub side: Side,
    /// Absolute position size
    pub quantity: f64,
}

/// Length of a kline interval string such as `1m`, `15m`, `4h` or `1d`
pub fn interval_seconds(interval: &str) -> Option<i64> {
    if interval.len() < 2 {
        return None;
    }
    let (count, unit) = interval.split_at(interval.len() - 1);
    let count: i64 = count.parse().ok()?;
    if count <= 0 {
        return None;
    }
    let unit_secs = match unit {
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return None,
    };
    Some(count * unit_secs)
}
