pub mod validator;

pub use validator::{contiguous_runs, find_gaps, CandleError, CandleValidator, Gap};

use crate::exchange::{Exchange, ExchangeError};
use crate::features::PatternEngine;
use crate::models::Candle;
use crate::store::PatternStore;
use chrono::{DateTime, Duration, Utc};

/// Binance caps a kline page at 1500 entries
pub const PAGE_LIMIT: u32 = 1500;
pub const SAVE_BATCH: usize = 1000;

/// Statistics from a backfill run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillStats {
    pub pages: usize,
    pub fetched_candles: usize,
    pub rejected_candles: usize,
    pub gaps: usize,
    pub patterns: usize,
    pub saved_patterns: usize,
    pub failed_batches: usize,
}

/// Download every kline from `now − days` up to `now`, oldest first
pub async fn fetch_history(
    exchange: &dyn Exchange,
    engine: &PatternEngine,
    interval_secs: i64,
    days: u32,
    now: DateTime<Utc>,
) -> Result<(Vec<Candle>, usize), ExchangeError> {
    let mut cursor = now - Duration::days(i64::from(days));
    let mut candles: Vec<Candle> = Vec::new();
    let mut pages = 0;

    while cursor < now {
        let page = exchange
            .klines(engine.symbol(), engine.interval(), PAGE_LIMIT, Some(cursor))
            .await?;
        pages += 1;

        let Some(last) = page.last() else {
            break;
        };
        let next = last.timestamp + Duration::seconds(interval_secs);
        if next <= cursor {
            tracing::warn!(%cursor, "Kline cursor did not advance, stopping download");
            break;
        }
        cursor = next;

        tracing::info!(
            fetched = candles.len() + page.len(),
            last = %last.timestamp.format("%Y-%m-%d %H:%M"),
            "Fetched kline page"
        );
        candles.extend(page);
    }

    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok((candles, pages))
}

/// Rebuild stored patterns from raw history
///
/// Candles that fail validation (the kline still in progress included) are
/// dropped. Gaps are logged and counted; features and labels are computed per
/// contiguous run so no window or look-ahead spans a hole. Batch save failures
/// are logged and skipped.
pub async fn backfill(
    exchange: &dyn Exchange,
    store: &dyn PatternStore,
    engine: &PatternEngine,
    interval_secs: i64,
    days: u32,
    now: DateTime<Utc>,
) -> Result<BackfillStats, ExchangeError> {
    tracing::info!(
        symbol = engine.symbol(),
        interval = engine.interval(),
        days,
        "Starting backfill"
    );

    let (raw, pages) = fetch_history(exchange, engine, interval_secs, days, now).await?;
    let mut stats = BackfillStats {
        pages,
        fetched_candles: raw.len(),
        ..BackfillStats::default()
    };

    let validator = CandleValidator::new(now, interval_secs);
    let candles: Vec<Candle> = raw
        .into_iter()
        .filter(|c| match validator.validate(c) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(time = %c.timestamp, error = %e, "Dropping invalid candle");
                false
            }
        })
        .collect();
    stats.rejected_candles = stats.fetched_candles - candles.len();

    let gaps = find_gaps(&candles, interval_secs);
    for gap in &gaps {
        tracing::warn!(after = %gap.after, before = %gap.before, missing = gap.missing, "Gap in history");
    }
    stats.gaps = gaps.len();

    let rows: Vec<_> = contiguous_runs(&candles, interval_secs)
        .into_iter()
        .flat_map(|run| engine.compute_bulk(run))
        .collect();
    stats.patterns = rows.len();
    tracing::info!(patterns = rows.len(), "Generated patterns, saving");

    for (index, chunk) in rows.chunks(SAVE_BATCH).enumerate() {
        let from = index * SAVE_BATCH;
        match store.bulk_save(chunk).await {
            Ok(()) => {
                stats.saved_patterns += chunk.len();
                tracing::info!(saved = stats.saved_patterns, total = rows.len(), "Saved batch");
            }
            Err(e) => {
                stats.failed_batches += 1;
                tracing::error!(from, to = from + chunk.len(), error = %e, "Batch save failed");
            }
        }
    }

    tracing::info!(?stats, "Backfill done");
    Ok(stats)
}
