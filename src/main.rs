use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use patterntrader::audit::{AuditConsumer, RedisAuditQueue, WebhookNotifier};
use patterntrader::backfill::backfill;
use patterntrader::config::AppConfig;
use patterntrader::decision::{ChartRenderer, CommandChartRenderer, LlmDecisionClient, NoCharts};
use patterntrader::exchange::{BinanceFutures, Exchange, KlineStream};
use patterntrader::execution::{daily_pnl, OrderExecutor, TradeParams};
use patterntrader::features::PatternEngine;
use patterntrader::pipeline::{Collaborators, CycleSettings, DecisionPipeline};
use patterntrader::store::PgPatternStore;
use patterntrader::{logging, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Closed candles waiting for the decision loop
const CANDLE_QUEUE: usize = 32;

#[derive(Parser)]
#[command(name = "patterntrader", version, about = "Pattern-retrieval futures trader")]
struct Cli {
    /// Extra TOML file layered over config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream closed candles and trade on the decision service's verdicts
    Live,
    /// Download history and rebuild stored patterns
    Backfill {
        #[arg(long, default_value_t = 20)]
        days: u32,
    },
    /// Move audit records from the Redis queue into Postgres
    ConsumeAudit,
    /// Print today's realized PnL and ROI
    Pnl,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Live => run_live(config).await?,
        Command::Backfill { days } => run_backfill(config, days).await?,
        Command::ConsumeAudit => run_consumer(config).await?,
        Command::Pnl => run_pnl(config).await?,
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn run_live(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        symbol = %config.market.symbol,
        interval = %config.market.interval,
        window = config.market.window,
        "Starting live trader"
    );

    let exchange: Arc<dyn Exchange> = Arc::new(
        BinanceFutures::new(&config.exchange).context("building exchange client")?,
    );
    let executor = OrderExecutor::new(
        exchange.clone(),
        TradeParams::from_config(&config.market, &config.trading),
    );
    executor
        .sync_leverage()
        .await
        .context("syncing leverage")?;

    let store = Arc::new(
        PgPatternStore::connect(&config.database)
            .await
            .context("connecting to Postgres")?,
    );
    let audit = Arc::new(
        RedisAuditQueue::connect(&config.redis)
            .await
            .context("connecting to the audit queue")?,
    );
    let decision = Arc::new(
        LlmDecisionClient::new(&config.decision, &config.trading)
            .context("building decision client")?,
    );
    let charts: Arc<dyn ChartRenderer> = match CommandChartRenderer::from_config(&config.charts) {
        Some(renderer) => Arc::new(renderer),
        None => {
            tracing::info!("No chart command configured, deciding without images");
            Arc::new(NoCharts)
        }
    };

    let (sender, receiver) = mpsc::channel(CANDLE_QUEUE);
    let stream = KlineStream::new(
        &config.exchange.ws_url,
        &config.market.symbol,
        &config.market.interval,
        sender,
    );
    tracing::info!(url = stream.url(), "Subscribing to kline stream");
    let stream_task = tokio::spawn(stream.run());

    let pipeline = DecisionPipeline::new(
        CycleSettings::from_config(&config),
        Collaborators {
            exchange,
            store,
            decision,
            charts,
            audit,
            notifier: WebhookNotifier::new(&config.notify),
        },
        executor,
        &config.labels,
    );

    let cycles = pipeline
        .run(
            receiver,
            shutdown_signal(),
            Duration::from_secs(config.labels.drain_timeout_secs),
        )
        .await;

    stream_task.abort();
    tracing::info!(cycles, "Live trader stopped");
    Ok(())
}

async fn run_backfill(config: AppConfig, days: u32) -> anyhow::Result<()> {
    let exchange = BinanceFutures::new(&config.exchange).context("building exchange client")?;
    let store = PgPatternStore::connect(&config.database)
        .await
        .context("connecting to Postgres")?;
    let engine = PatternEngine::new(
        &config.market.symbol,
        &config.market.interval,
        config.market.window,
    );

    let stats = backfill(
        &exchange,
        &store,
        &engine,
        config.interval_secs(),
        days,
        Utc::now(),
    )
    .await
    .context("downloading history")?;

    println!(
        "Backfill {} {}: {} candles ({} rejected, {} gaps), {}/{} patterns saved, {} failed batches",
        config.market.symbol,
        config.market.interval,
        stats.fetched_candles,
        stats.rejected_candles,
        stats.gaps,
        stats.saved_patterns,
        stats.patterns,
        stats.failed_batches
    );
    Ok(())
}

async fn run_consumer(config: AppConfig) -> anyhow::Result<()> {
    // Connecting the pattern store also applies migrations, signal_log included
    let store = PgPatternStore::connect(&config.database)
        .await
        .context("connecting to Postgres")?;
    let queue = RedisAuditQueue::connect(&config.redis)
        .await
        .context("connecting to the audit queue")?;

    let stored = AuditConsumer::new(queue, store.pool().clone())
        .run(shutdown_signal())
        .await
        .context("consuming audit queue")?;

    tracing::info!(stored, "Audit consumer finished");
    Ok(())
}

async fn run_pnl(config: AppConfig) -> anyhow::Result<()> {
    let exchange = BinanceFutures::new(&config.exchange).context("building exchange client")?;
    let pnl = daily_pnl(&exchange, Utc::now())
        .await
        .context("fetching income history")?;

    println!("Realized PnL since {}", pnl.since.format("%Y-%m-%d %H:%M UTC"));
    println!("  realized:    {:>12.4}", pnl.realized_pnl);
    println!("  funding:     {:>12.4}", pnl.funding_fees);
    println!("  commission:  {:>12.4}", pnl.commissions);
    println!("  net:         {:>12.4}", pnl.net_pnl);
    println!("  wallet:      {:>12.4}", pnl.wallet_balance);
    println!("  ROI:         {:>11.2}%", pnl.roi_pct);
    Ok(())
}
