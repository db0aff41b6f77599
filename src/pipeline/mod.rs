// Per-candle decision cycle and the background label writer
pub mod cycle;
pub mod worker;

pub use cycle::{Collaborators, CycleOutcome, CycleSettings, DecisionPipeline};
pub use worker::LabelWriter;

use crate::continuity::ContinuityError;
use crate::decision::DecisionError;
use crate::exchange::ExchangeError;
use crate::execution::ExecutionError;
use crate::store::StoreError;
use thiserror::Error;

/// Reasons a decision cycle stops before reaching a verdict or a trade
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("data integrity: {0}")]
    Continuity(#[from] ContinuityError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("merged window too short for a feature")]
    NoFeature,
}
