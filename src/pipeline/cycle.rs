use super::{CycleError, LabelWriter};
use crate::audit::{AuditRecord, AuditSink, WebhookNotifier};
use crate::config::{AppConfig, LabelsConfig};
use crate::continuity::safe_merge;
use crate::decision::{
    ChartImage, ChartImages, ChartRenderer, DecisionRequest, DecisionService, Verdict,
};
use crate::exchange::Exchange;
use crate::execution::{OrderExecutor, TradeOutcome};
use crate::features::PatternEngine;
use crate::models::{Candle, PatternFeature, PatternMatch, PositionInfo};
use crate::store::{ConsensusStats, PatternStore};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};

/// Fixed parameters of the decision cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub symbol: String,
    pub interval: String,
    pub interval_secs: i64,
    pub window: usize,
    pub top_k: usize,
    /// Extra candles requested on top of the window to absorb overlap
    pub history_padding: usize,
    pub confidence_threshold: u8,
    pub history_timeout: Duration,
    pub cycle_timeout: Duration,
}

impl CycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbol: config.market.symbol.clone(),
            interval: config.market.interval.clone(),
            interval_secs: config.interval_secs(),
            window: config.market.window,
            top_k: config.market.top_k,
            history_padding: config.market.history_padding,
            confidence_threshold: config.trading.confidence_threshold,
            history_timeout: Duration::from_secs(config.exchange.history_timeout_secs),
            cycle_timeout: config.trading.cycle_timeout(),
        }
    }
}

/// External services the pipeline talks to
pub struct Collaborators {
    pub exchange: Arc<dyn Exchange>,
    pub store: Arc<dyn PatternStore>,
    pub decision: Arc<dyn DecisionService>,
    pub charts: Arc<dyn ChartRenderer>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: WebhookNotifier,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// A position is open; the candle was stored but not analysed
    InPosition(PositionInfo),
    /// The store has no labelled neighbours yet
    NoMatches,
    Decided {
        verdict: Verdict,
        trade: Option<TradeOutcome>,
    },
    /// The cycle failed; a HOLD audit record carries the error
    Aborted(String),
}

enum Analysis {
    InPosition(PositionInfo),
    NoMatches,
    Decided {
        verdict: Verdict,
        charts: ChartImages,
        trade: Option<TradeOutcome>,
    },
}

/// Processes closed candles one at a time, in arrival order
pub struct DecisionPipeline {
    settings: CycleSettings,
    engine: PatternEngine,
    executor: OrderExecutor,
    labels: LabelWriter,
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn PatternStore>,
    decision: Arc<dyn DecisionService>,
    charts: Arc<dyn ChartRenderer>,
    audit: Arc<dyn AuditSink>,
    notifier: WebhookNotifier,
}

impl DecisionPipeline {
    /// Must be called inside a tokio runtime; spawns the label worker
    pub fn new(
        settings: CycleSettings,
        deps: Collaborators,
        executor: OrderExecutor,
        labels: &LabelsConfig,
    ) -> Self {
        let engine = PatternEngine::new(&settings.symbol, &settings.interval, settings.window);
        let labels = LabelWriter::spawn(deps.store.clone(), engine.clone(), labels);

        Self {
            settings,
            engine,
            executor,
            labels,
            exchange: deps.exchange,
            store: deps.store,
            decision: deps.decision,
            charts: deps.charts,
            audit: deps.audit,
            notifier: deps.notifier,
        }
    }

    /// Consume closed candles until the stream ends or `shutdown` resolves,
    /// then drain the label writer
    ///
    /// A cycle in progress always runs to completion.
    pub async fn run(
        self,
        mut candles: mpsc::Receiver<Candle>,
        shutdown: impl Future<Output = ()>,
        drain: Duration,
    ) -> u64 {
        tokio::pin!(shutdown);
        let mut cycles = 0;

        loop {
            let candle = tokio::select! {
                _ = &mut shutdown => break,
                candle = candles.recv() => match candle {
                    Some(candle) => candle,
                    None => break,
                },
            };

            self.on_candle(candle).await;
            cycles += 1;
        }

        tracing::info!(cycles, "Decision loop stopped");
        self.shutdown(drain).await;
        cycles
    }

    pub async fn shutdown(self, drain: Duration) {
        self.labels.shutdown(drain).await;
    }

    /// Run one full cycle for a just-closed candle
    pub async fn on_candle(&self, live: Candle) -> CycleOutcome {
        let started = Instant::now();
        tracing::info!(
            symbol = %self.settings.symbol,
            time = %live.timestamp.format("%H:%M:%S"),
            price = live.close,
            "Candle closed"
        );

        let analysis = timeout(self.settings.cycle_timeout, self.analyse(&live))
            .await
            .unwrap_or(Err(CycleError::Timeout("decision cycle")));

        // Execution runs outside the deadline: once an entry is accepted the
        // protective orders (or the flatten) must finish
        let result = match analysis {
            Ok(Analysis::Decided { verdict, charts, .. }) => self
                .execute(&verdict, &live)
                .await
                .map(|trade| Analysis::Decided {
                    verdict,
                    charts,
                    trade,
                }),
            other => other,
        };

        let outcome = match result {
            Ok(Analysis::InPosition(position)) => {
                tracing::info!(
                    side = position.side.as_str(),
                    quantity = position.quantity,
                    "In trade, skipping analysis"
                );
                CycleOutcome::InPosition(position)
            }
            Ok(Analysis::NoMatches) => {
                tracing::info!("No labelled matches yet, skipping analysis");
                CycleOutcome::NoMatches
            }
            Ok(Analysis::Decided {
                verdict,
                charts,
                trade,
            }) => {
                let record = AuditRecord::from_verdict(&self.settings.symbol, &verdict, live.timestamp)
                    .with_charts(charts.candles_name(), charts.pattern_name());
                self.publish(record);
                self.announce(&verdict, charts.candles, trade.as_ref());
                CycleOutcome::Decided { verdict, trade }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Decision cycle aborted");
                self.publish(AuditRecord::aborted(
                    &self.settings.symbol,
                    &e,
                    live.timestamp,
                ));
                CycleOutcome::Aborted(e.to_string())
            }
        };

        tracing::info!(elapsed = ?started.elapsed(), "Cycle finished");
        outcome
    }

    async fn analyse(&self, live: &Candle) -> Result<Analysis, CycleError> {
        let limit = (self.settings.window + self.settings.history_padding) as u32;
        let history = timeout(
            self.settings.history_timeout,
            self.exchange
                .klines(&self.settings.symbol, &self.settings.interval, limit, None),
        )
        .await
        .map_err(|_| CycleError::Timeout("history fetch"))??;

        let window = safe_merge(
            &history,
            live,
            self.settings.window,
            self.settings.interval_secs,
        )?;

        let feature = self
            .engine
            .compute_feature(&window)
            .ok_or(CycleError::NoFeature)?;
        tracing::info!(dims = feature.embedding.len(), "Feature ready");

        // Stored even when we end up skipping the analysis below
        self.labels.submit(feature.clone(), window.clone());

        if let Some(position) = self.executor.has_open_position().await? {
            return Ok(Analysis::InPosition(position));
        }

        let matches = self.store.search(&feature.embedding, self.settings.top_k).await?;
        if matches.is_empty() {
            return Ok(Analysis::NoMatches);
        }
        tracing::info!(matches = matches.len(), "Found similar patterns");

        let charts = self.render_charts(&feature, &matches, &window).await;
        self.notify(
            format!("Analyzing {} pattern...", self.settings.symbol),
            charts.pattern.clone(),
        );

        let request = DecisionRequest {
            symbol: self.settings.symbol.clone(),
            analysis_time: Utc::now(),
            stats: ConsensusStats::from_matches(&matches),
            charts,
        };
        tracing::info!(
            consensus_pct = request.stats.consensus_pct,
            average_slope = request.stats.average_slope,
            "Requesting decision"
        );

        let verdict = self
            .decision
            .decide(&request)
            .await?
            .gated(self.settings.confidence_threshold);
        tracing::info!(
            signal = verdict.signal.as_str(),
            confidence = verdict.confidence,
            reasoning = %verdict.reasoning,
            "Verdict"
        );

        Ok(Analysis::Decided {
            verdict,
            charts: request.charts,
            trade: None,
        })
    }

    async fn execute(
        &self,
        verdict: &Verdict,
        live: &Candle,
    ) -> Result<Option<TradeOutcome>, CycleError> {
        match verdict.signal.side() {
            Some(side) => Ok(Some(self.executor.place_trade(side, live.close).await?)),
            None => Ok(None),
        }
    }

    async fn render_charts(
        &self,
        feature: &PatternFeature,
        matches: &[PatternMatch],
        window: &[Candle],
    ) -> ChartImages {
        match self.charts.render(feature, matches, window).await {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(error = %e, "Chart rendering failed, continuing without images");
                ChartImages::default()
            }
        }
    }

    fn publish(&self, record: AuditRecord) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.publish(&record).await {
                tracing::error!(id = %record.id, error = %e, "Audit publish failed");
            }
        });
    }

    fn notify(&self, message: String, image: Option<ChartImage>) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move { notifier.pipeline(&message, image).await });
    }

    fn announce(&self, verdict: &Verdict, candles: Option<ChartImage>, trade: Option<&TradeOutcome>) {
        self.notify(
            format!(
                "**SIDE:** {}\n**CONFIDENCE:** {}%\n**REASON:** {}",
                verdict.signal.as_str(),
                verdict.confidence,
                verdict.reasoning
            ),
            candles,
        );

        if let Some(TradeOutcome::Placed(report)) = trade {
            let message = format!(
                "{} {} {} @ {} | SL {} | TP {} | {:?}",
                self.settings.symbol,
                report.side.as_str(),
                report.quantity,
                report.entry_price,
                report.stop_loss,
                report.take_profit,
                report.protection
            );
            let notifier = self.notifier.clone();
            tokio::spawn(async move { notifier.trade_alert(&message, None).await });
        }
    }
}
