use crate::config::ChartsConfig;
use crate::models::{Candle, PatternFeature, PatternMatch};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("chart io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chart payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("chart command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("chart command timed out after {0:?}")]
    Timeout(Duration),
}

/// Rendered PNG and the file name it was written under
#[derive(Debug, Clone, PartialEq)]
pub struct ChartImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// The two decision charts; either may be missing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartImages {
    /// Current vector overlaid on its neighbours
    pub pattern: Option<ChartImage>,
    /// Recent candlesticks
    pub candles: Option<ChartImage>,
}

impl ChartImages {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_none() && self.candles.is_none()
    }

    pub fn pattern_name(&self) -> String {
        self.pattern
            .as_ref()
            .map(|i| i.file_name.clone())
            .unwrap_or_default()
    }

    pub fn candles_name(&self) -> String {
        self.candles
            .as_ref()
            .map(|i| i.file_name.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(
        &self,
        feature: &PatternFeature,
        matches: &[PatternMatch],
        candles: &[Candle],
    ) -> Result<ChartImages, ChartError>;
}

/// Renderer used when no chart command is configured
pub struct NoCharts;

#[async_trait]
impl ChartRenderer for NoCharts {
    async fn render(
        &self,
        _feature: &PatternFeature,
        _matches: &[PatternMatch],
        _candles: &[Candle],
    ) -> Result<ChartImages, ChartError> {
        Ok(ChartImages::default())
    }
}

#[derive(Serialize)]
struct RenderPayload<'a> {
    pattern_path: &'a Path,
    candles_path: &'a Path,
    current: &'a PatternFeature,
    matches: &'a [PatternMatch],
    candles: &'a [Candle],
}

/// Pipes a JSON payload into an external plotting command and reads back the
/// two PNG files it writes
pub struct CommandChartRenderer {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl CommandChartRenderer {
    /// `None` when `config.command` is blank
    pub fn from_config(config: &ChartsConfig) -> Option<Self> {
        let mut parts = config.command.split_whitespace().map(str::to_string);
        let program = parts.next()?;

        Some(Self {
            program,
            args: parts.collect(),
            output_dir: PathBuf::from(&config.output_dir),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn run(&self, payload: &[u8]) -> Result<(), ChartError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // The command may exit without reading its input
            match stdin.write_all(payload).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ChartError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Option<ChartImage> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => Some(ChartImage {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            bytes,
        }),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Chart image missing");
            None
        }
    }
}

#[async_trait]
impl ChartRenderer for CommandChartRenderer {
    async fn render(
        &self,
        feature: &PatternFeature,
        matches: &[PatternMatch],
        candles: &[Candle],
    ) -> Result<ChartImages, ChartError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let stamp = feature.time.format("%Y%m%d_%H%M");
        let pattern_path = self
            .output_dir
            .join(format!("{}_{}_pattern.png", feature.symbol, stamp));
        let candles_path = self
            .output_dir
            .join(format!("{}_{}_candles.png", feature.symbol, stamp));

        let payload = serde_json::to_vec(&RenderPayload {
            pattern_path: &pattern_path,
            candles_path: &candles_path,
            current: feature,
            matches,
            candles,
        })?;

        tokio::time::timeout(self.timeout, self.run(&payload))
            .await
            .map_err(|_| ChartError::Timeout(self.timeout))??;

        Ok(ChartImages {
            pattern: read_optional(&pattern_path).await,
            candles: read_optional(&candles_path).await,
        })
    }
}
