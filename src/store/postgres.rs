use super::{PatternStore, StoreError};
use crate::config::DatabaseConfig;
use crate::models::{BulkRow, LabelColumn, LabelUpdate, PatternFeature, PatternMatch};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;

/// Postgres + pgvector pattern store
///
/// Times are stored as unix seconds; embeddings travel as `vector` text
/// literals so no extra client-side vector type is needed.
#[derive(Clone)]
pub struct PgPatternStore {
    pool: PgPool,
    search_timeout: Duration,
}

impl PgPatternStore {
    /// Connect and run embedded migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres pattern store");

        Ok(Self::from_pool(
            pool,
            Duration::from_secs(config.search_timeout_secs),
        ))
    }

    pub fn from_pool(pool: PgPool, search_timeout: Duration) -> Self {
        Self {
            pool,
            search_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn query_nearest(
        &self,
        embedding: &[f64],
        k: usize,
    ) -> Result<Vec<PatternMatch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT time, symbol, interval,
                   next_return, next_slope_3, next_slope_5,
                   embedding::text AS embedding,
                   (embedding <=> $1::vector) AS distance
            FROM market_pattern
            WHERE next_return IS NOT NULL
            ORDER BY distance ASC
            LIMIT $2
            "#,
        )
        .bind(vector_literal(embedding))
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PatternMatch, StoreError> {
                let secs: i64 = row.try_get("time")?;
                let raw_embedding: String = row.try_get("embedding")?;
                Ok(PatternMatch {
                    time: Utc
                        .timestamp_opt(secs, 0)
                        .single()
                        .ok_or_else(|| StoreError::InvalidRow(format!("bad time {}", secs)))?,
                    symbol: row.try_get("symbol")?,
                    interval: row.try_get("interval")?,
                    next_return: row.try_get("next_return")?,
                    next_slope_3: row.try_get("next_slope_3")?,
                    next_slope_5: row.try_get("next_slope_5")?,
                    embedding: parse_vector(&raw_embedding)?,
                    distance: row.try_get("distance")?,
                })
            })
            .collect()
    }
}

/// Fixed UPDATE text per label column
fn label_update_sql(column: LabelColumn) -> &'static str {
    match column {
        LabelColumn::NextReturn => {
            "UPDATE market_pattern SET next_return = $1 WHERE time = $2 AND symbol = $3 AND interval = $4"
        }
        LabelColumn::NextSlope3 => {
            "UPDATE market_pattern SET next_slope_3 = $1 WHERE time = $2 AND symbol = $3 AND interval = $4"
        }
        LabelColumn::NextSlope5 => {
            "UPDATE market_pattern SET next_slope_5 = $1 WHERE time = $2 AND symbol = $3 AND interval = $4"
        }
    }
}

/// pgvector text form: `[0.1,-0.2,...]`
pub fn vector_literal(values: &[f64]) -> String {
    let body = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{}]", body)
}

pub fn parse_vector(raw: &str) -> Result<Vec<f64>, StoreError> {
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| StoreError::InvalidRow(raw.to_string()))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| StoreError::InvalidRow(raw.to_string()))
        })
        .collect()
}

#[async_trait]
impl PatternStore for PgPatternStore {
    async fn ingest(
        &self,
        feature: &PatternFeature,
        labels: &[LabelUpdate],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO market_pattern (time, symbol, interval, close_price, embedding)
            VALUES ($1, $2, $3, $4, $5::vector)
            ON CONFLICT (symbol, interval, time) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                close_price = EXCLUDED.close_price
            "#,
        )
        .bind(feature.time.timestamp())
        .bind(&feature.symbol)
        .bind(&feature.interval)
        .bind(feature.close_price)
        .bind(vector_literal(&feature.embedding))
        .execute(&mut *tx)
        .await?;

        for label in labels {
            sqlx::query(label_update_sql(label.column))
                .bind(label.value)
                .bind(label.target_time.timestamp())
                .bind(&feature.symbol)
                .bind(&feature.interval)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn bulk_save(&self, rows: &[BulkRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let f = &row.feature;
            sqlx::query(
                r#"
                INSERT INTO market_pattern (
                    time, symbol, interval, close_price, embedding,
                    next_return, next_slope_3, next_slope_5
                )
                VALUES ($1, $2, $3, $4, $5::vector, $6, $7, $8)
                ON CONFLICT (symbol, interval, time) DO UPDATE SET
                    close_price = EXCLUDED.close_price,
                    embedding = EXCLUDED.embedding,
                    next_return = EXCLUDED.next_return,
                    next_slope_3 = EXCLUDED.next_slope_3,
                    next_slope_5 = EXCLUDED.next_slope_5
                "#,
            )
            .bind(f.time.timestamp())
            .bind(&f.symbol)
            .bind(&f.interval)
            .bind(f.close_price)
            .bind(vector_literal(&f.embedding))
            .bind(row.label(LabelColumn::NextReturn))
            .bind(row.label(LabelColumn::NextSlope3))
            .bind(row.label(LabelColumn::NextSlope5))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(rows = rows.len(), "Bulk saved patterns");
        Ok(())
    }

    async fn search(&self, embedding: &[f64], k: usize) -> Result<Vec<PatternMatch>, StoreError> {
        tokio::time::timeout(self.search_timeout, self.query_nearest(embedding, k))
            .await
            .map_err(|_| StoreError::Timeout(self.search_timeout))?
    }
}
