// Decision audit trail and chat notifications
pub mod consumer;
pub mod notify;
pub mod queue;

pub use consumer::AuditConsumer;
pub use notify::WebhookNotifier;
pub use queue::RedisAuditQueue;

use crate::decision::Verdict;
use crate::models::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("audit record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("redis connection timed out")]
    ConnectTimeout,
}

/// One decision, traded or held, as written to the audit queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub symbol: String,
    pub signal: Signal,
    pub confidence: u8,
    pub reason: String,
    /// Local file name of the candlestick chart, empty when none was rendered
    pub candle_chart: String,
    pub pattern_chart: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_verdict(symbol: &str, verdict: &Verdict, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            signal: verdict.signal,
            confidence: verdict.confidence,
            reason: verdict.reasoning.clone(),
            candle_chart: String::new(),
            pattern_chart: String::new(),
            recorded_at,
        }
    }

    /// HOLD record for a cycle that could not reach a verdict
    pub fn aborted(symbol: &str, error: &dyn std::fmt::Display, recorded_at: DateTime<Utc>) -> Self {
        Self::from_verdict(
            symbol,
            &Verdict::hold(format!("cycle aborted: {}", error)),
            recorded_at,
        )
    }

    pub fn with_charts(mut self, candle_chart: String, pattern_chart: String) -> Self {
        self.candle_chart = candle_chart;
        self.pattern_chart = pattern_chart;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn publish(&self, record: &AuditRecord) -> Result<(), AuditError>;
}
