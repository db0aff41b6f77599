use crate::config::LabelsConfig;
use crate::features::PatternEngine;
use crate::models::{Candle, PatternFeature};
use crate::store::PatternStore;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

struct LabelJob {
    feature: PatternFeature,
    window: Vec<Candle>,
}

/// Background writer for the current feature and the labels it completes
///
/// The decision path never waits on the store: jobs go through a bounded
/// queue and are dropped with a warning when it is full. A later candle
/// re-emits overlapping labels, so a dropped job only delays them.
pub struct LabelWriter {
    sender: mpsc::Sender<LabelJob>,
    worker: JoinHandle<u64>,
}

impl LabelWriter {
    pub fn spawn(store: Arc<dyn PatternStore>, engine: PatternEngine, config: &LabelsConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let ingest_timeout = Duration::from_secs(config.ingest_timeout_secs);

        let worker = tokio::spawn(run_worker(store, engine, receiver, ingest_timeout));

        Self { sender, worker }
    }

    /// Queue a feature and its merged window; `false` when the job was dropped
    pub fn submit(&self, feature: PatternFeature, window: Vec<Candle>) -> bool {
        match self.sender.try_send(LabelJob { feature, window }) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                tracing::warn!(time = %job.feature.time, "Label queue full, dropping ingest job");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("Label worker has stopped, dropping ingest job");
                false
            }
        }
    }

    /// Close the queue and wait up to `drain` for queued jobs to finish
    ///
    /// Returns the number of successful ingests, or `None` when the worker
    /// did not finish in time.
    pub async fn shutdown(self, drain: Duration) -> Option<u64> {
        drop(self.sender);

        let mut worker = self.worker;
        match timeout(drain, &mut worker).await {
            Ok(Ok(written)) => {
                tracing::info!(written, "Label writer drained");
                Some(written)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Label worker panicked");
                None
            }
            Err(_) => {
                tracing::warn!(?drain, "Label writer did not drain in time, aborting");
                worker.abort();
                None
            }
        }
    }
}

async fn run_worker(
    store: Arc<dyn PatternStore>,
    engine: PatternEngine,
    mut receiver: mpsc::Receiver<LabelJob>,
    ingest_timeout: Duration,
) -> u64 {
    let mut written = 0;

    while let Some(job) = receiver.recv().await {
        let labels = engine.compute_labels(&job.window);

        match timeout(ingest_timeout, store.ingest(&job.feature, &labels)).await {
            Ok(Ok(())) => {
                written += 1;
                tracing::info!(
                    time = %job.feature.time.format("%H:%M"),
                    labels = labels.len(),
                    "Saved feature and updated past labels"
                );
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Ingestion failed"),
            Err(_) => tracing::error!(?ingest_timeout, "Ingestion timed out"),
        }
    }

    written
}
