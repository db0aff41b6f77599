// External reasoning service and the chart images it consumes
pub mod charts;
pub mod llm;

pub use charts::{ChartError, ChartImage, ChartImages, ChartRenderer, CommandChartRenderer, NoCharts};
pub use llm::LlmDecisionClient;

use crate::models::Signal;
use crate::store::ConsensusStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decision service returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("could not parse verdict: {0}")]
    InvalidResponse(String),
}

/// Structured answer from the decision service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub signal: Signal,
    /// 0-100
    pub confidence: u8,
    pub reasoning: String,
}

impl Verdict {
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            signal: Signal::Hold,
            confidence: 0,
            reasoning: reasoning.into(),
        }
    }

    /// Force LONG/SHORT below `threshold` to HOLD
    pub fn gated(self, threshold: u8) -> Self {
        if self.signal == Signal::Hold || self.confidence >= threshold {
            return self;
        }

        tracing::info!(
            signal = self.signal.as_str(),
            confidence = self.confidence,
            threshold,
            "Confidence below threshold, holding"
        );

        Self {
            signal: Signal::Hold,
            reasoning: format!(
                "{} (confidence {}% below threshold {}%, no trade)",
                self.reasoning, self.confidence, threshold
            ),
            ..self
        }
    }
}

/// Everything the decision service sees for one closed candle
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub symbol: String,
    pub analysis_time: DateTime<Utc>,
    pub stats: ConsensusStats,
    pub charts: ChartImages,
}

#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, DecisionError>;
}
