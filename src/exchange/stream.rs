use super::ExchangeError;
use crate::models::Candle;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const INITIAL_RETRY: Duration = Duration::from_secs(1);
const MAX_RETRY: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_final: bool,
}

/// Parse a `<symbol>@kline_<interval>` event
///
/// Returns `Ok(None)` for non-kline events and for klines that have not closed yet.
pub fn parse_kline_message(text: &str) -> Result<Option<Candle>, ExchangeError> {
    let event: KlineEvent = serde_json::from_str(text)
        .map_err(|e| ExchangeError::Parse(format!("kline event: {}", e)))?;

    if event.event_type != "kline" || !event.kline.is_final {
        return Ok(None);
    }

    let k = event.kline;
    let parse = |raw: &str| {
        raw.parse::<f64>()
            .map_err(|_| ExchangeError::Parse(format!("invalid number '{}'", raw)))
    };

    let timestamp = Utc
        .timestamp_millis_opt(k.open_time)
        .single()
        .ok_or_else(|| ExchangeError::Parse(format!("invalid timestamp {}", k.open_time)))?;

    Ok(Some(Candle {
        timestamp,
        open: parse(&k.open)?,
        high: parse(&k.high)?,
        low: parse(&k.low)?,
        close: parse(&k.close)?,
        volume: parse(&k.volume)?,
    }))
}

/// Reconnecting kline stream that forwards closed candles only
pub struct KlineStream {
    url: String,
    sender: mpsc::Sender<Candle>,
}

impl KlineStream {
    pub fn new(ws_base: &str, symbol: &str, interval: &str, sender: mpsc::Sender<Candle>) -> Self {
        let url = format!(
            "{}/{}@kline_{}",
            ws_base.trim_end_matches('/'),
            symbol.to_lowercase(),
            interval
        );
        Self { url, sender }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs until the receiving side is dropped
    pub async fn run(self) {
        let mut retry_delay = INITIAL_RETRY;

        loop {
            match connect_async(&self.url).await {
                Ok((ws_stream, _)) => {
                    tracing::info!(url = %self.url, "Kline stream connected");
                    retry_delay = INITIAL_RETRY;
                    let (_, mut read) = ws_stream.split();

                    loop {
                        let message = tokio::select! {
                            _ = self.sender.closed() => {
                                tracing::info!("Kline consumer gone, closing stream");
                                return;
                            }
                            message = read.next() => message,
                        };

                        match message {
                            Some(Ok(Message::Text(txt))) => match parse_kline_message(&txt) {
                                Ok(Some(candle)) => {
                                    tracing::debug!(
                                        time = %candle.timestamp,
                                        close = candle.close,
                                        "Kline closed"
                                    );
                                    if self.sender.send(candle).await.is_err() {
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => tracing::warn!(error = %e, "Skipping kline message"),
                            },
                            Some(Ok(Message::Close(_))) => {
                                tracing::warn!("Kline stream closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "Kline stream error");
                                break;
                            }
                            None => {
                                tracing::warn!("Kline stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Kline stream connect error");
                }
            }

            if self.sender.is_closed() {
                return;
            }

            tracing::info!(retry_secs = retry_delay.as_secs(), "Kline stream reconnecting");
            sleep(retry_delay).await;
            retry_delay = (retry_delay * 2).min(MAX_RETRY);
        }
    }
}
