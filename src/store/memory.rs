use super::{PatternStore, StoreError};
use crate::models::{BulkRow, LabelColumn, LabelUpdate, PatternFeature, PatternMatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredRow {
    close_price: f64,
    embedding: Vec<f64>,
    next_return: Option<f64>,
    next_slope_3: Option<f64>,
    next_slope_5: Option<f64>,
}

type RowKey = (String, String, DateTime<Utc>);

/// Brute-force pattern store with the same write and read semantics as the
/// Postgres adapter
#[derive(Default)]
pub struct InMemoryPatternStore {
    rows: RwLock<BTreeMap<RowKey, StoredRow>>,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn contains(&self, symbol: &str, interval: &str, time: DateTime<Utc>) -> bool {
        self.rows
            .read()
            .await
            .contains_key(&(symbol.to_string(), interval.to_string(), time))
    }

    /// Stored value of a label column, if the row exists and the label is set
    pub async fn label(
        &self,
        symbol: &str,
        interval: &str,
        time: DateTime<Utc>,
        column: LabelColumn,
    ) -> Option<f64> {
        let rows = self.rows.read().await;
        let row = rows.get(&(symbol.to_string(), interval.to_string(), time))?;
        match column {
            LabelColumn::NextReturn => row.next_return,
            LabelColumn::NextSlope3 => row.next_slope_3,
            LabelColumn::NextSlope5 => row.next_slope_5,
        }
    }
}

fn set_label(row: &mut StoredRow, column: LabelColumn, value: Option<f64>) {
    match column {
        LabelColumn::NextReturn => row.next_return = value,
        LabelColumn::NextSlope3 => row.next_slope_3 = value,
        LabelColumn::NextSlope5 => row.next_slope_5 = value,
    }
}

/// `1 − cos(a, b)`; NaN when either vector has zero norm, matching pgvector
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn ingest(
        &self,
        feature: &PatternFeature,
        labels: &[LabelUpdate],
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;

        let key = (
            feature.symbol.clone(),
            feature.interval.clone(),
            feature.time,
        );
        let row = rows.entry(key).or_insert_with(|| StoredRow {
            close_price: feature.close_price,
            embedding: Vec::new(),
            next_return: None,
            next_slope_3: None,
            next_slope_5: None,
        });
        row.close_price = feature.close_price;
        row.embedding = feature.embedding.clone();

        for label in labels {
            let key = (
                feature.symbol.clone(),
                feature.interval.clone(),
                label.target_time,
            );
            // Labels for rows that were never stored are dropped, like an UPDATE
            if let Some(row) = rows.get_mut(&key) {
                set_label(row, label.column, Some(label.value));
            }
        }

        Ok(())
    }

    async fn bulk_save(&self, batch: &[BulkRow]) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;

        for item in batch {
            let f = &item.feature;
            let mut row = StoredRow {
                close_price: f.close_price,
                embedding: f.embedding.clone(),
                next_return: None,
                next_slope_3: None,
                next_slope_5: None,
            };
            for column in [
                LabelColumn::NextReturn,
                LabelColumn::NextSlope3,
                LabelColumn::NextSlope5,
            ] {
                set_label(&mut row, column, item.label(column));
            }
            rows.insert((f.symbol.clone(), f.interval.clone(), f.time), row);
        }

        Ok(())
    }

    async fn search(&self, embedding: &[f64], k: usize) -> Result<Vec<PatternMatch>, StoreError> {
        let rows = self.rows.read().await;

        let mut matches: Vec<PatternMatch> = rows
            .iter()
            .filter_map(|((symbol, interval, time), row)| {
                Some(PatternMatch {
                    time: *time,
                    symbol: symbol.clone(),
                    interval: interval.clone(),
                    next_return: row.next_return?,
                    next_slope_3: row.next_slope_3,
                    next_slope_5: row.next_slope_5,
                    embedding: row.embedding.clone(),
                    distance: cosine_distance(embedding, &row.embedding),
                })
            })
            .collect();

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn feature(minute: i64, embedding: Vec<f64>) -> PatternFeature {
        PatternFeature {
            time: Utc.with_ymd_and_hms(2026, 1, 9, 0, 0, 0).unwrap() + Duration::minutes(minute),
            symbol: "ETHUSDT".to_string(),
            interval: "1m".to_string(),
            close_price: 2000.0,
            embedding,
        }
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_ingest_updates_past_labels_only_for_stored_rows() {
        let store = InMemoryPatternStore::new();
        let first = feature(0, vec![1.0, -1.0]);
        let second = feature(1, vec![-1.0, 1.0]);

        store.ingest(&first, &[]).await.unwrap();
        store
            .ingest(
                &second,
                &[
                    LabelUpdate {
                        target_time: first.time,
                        column: LabelColumn::NextReturn,
                        value: 0.01,
                    },
                    LabelUpdate {
                        target_time: first.time - Duration::minutes(10),
                        column: LabelColumn::NextSlope3,
                        value: 0.5,
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.len().await, 2);
        assert_eq!(
            store
                .label("ETHUSDT", "1m", first.time, LabelColumn::NextReturn)
                .await,
            Some(0.01)
        );
    }

    #[tokio::test]
    async fn test_search_returns_labelled_rows_by_distance() {
        let store = InMemoryPatternStore::new();
        let rows = vec![
            BulkRow {
                feature: feature(0, vec![1.0, 0.0]),
                labels: vec![LabelUpdate {
                    target_time: feature(0, vec![]).time,
                    column: LabelColumn::NextReturn,
                    value: 0.02,
                }],
            },
            BulkRow {
                feature: feature(1, vec![0.0, 1.0]),
                labels: vec![LabelUpdate {
                    target_time: feature(1, vec![]).time,
                    column: LabelColumn::NextReturn,
                    value: -0.01,
                }],
            },
            // Unlabelled: never returned
            BulkRow {
                feature: feature(2, vec![1.0, 0.01]),
                labels: vec![],
            },
        ];
        store.bulk_save(&rows).await.unwrap();

        let matches = store.search(&[1.0, 0.1], 5).await.unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].next_return, 0.02);
        assert!(matches[0].distance <= matches[1].distance);

        let top1 = store.search(&[1.0, 0.1], 1).await.unwrap();
        assert_eq!(top1.len(), 1);
    }
}
