// Pattern persistence: write path (features + labels) and k-NN read path
pub mod consensus;
pub mod memory;
pub mod postgres;

pub use consensus::{ConsensusStats, MatchDetail, TrendOutcome};
pub use memory::InMemoryPatternStore;
pub use postgres::PgPatternStore;

use crate::models::{BulkRow, LabelUpdate, PatternFeature, PatternMatch};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}

#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Upsert the current feature, then apply label updates for earlier rows,
    /// all in one transaction
    async fn ingest(&self, feature: &PatternFeature, labels: &[LabelUpdate])
        -> Result<(), StoreError>;

    /// Upsert backfill rows with every label column they carry
    async fn bulk_save(&self, rows: &[BulkRow]) -> Result<(), StoreError>;

    /// `k` nearest labelled rows by cosine distance, most similar first
    async fn search(&self, embedding: &[f64], k: usize) -> Result<Vec<PatternMatch>, StoreError>;
}
