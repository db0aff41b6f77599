use super::{DecisionError, DecisionRequest, DecisionService, Verdict};
use crate::config::{DecisionConfig, TradingConfig};
use crate::models::Signal;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    signal: String,
    confidence: f64,
    #[serde(default)]
    synthesis: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

// ============== Implementation ==============

/// OpenAI-compatible chat-completions client returning JSON verdicts
#[derive(Clone)]
pub struct LlmDecisionClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    leverage: u32,
    sl_pct: f64,
}

impl LlmDecisionClient {
    pub fn new(config: &DecisionConfig, trading: &TradingConfig) -> Result<Self, DecisionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            leverage: trading.leverage,
            sl_pct: trading.sl_pct,
        })
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"You are an objective quantitative analyst weighing statistical evidence against live price action.

Inputs:
1. Chart A: the current z-scored log-return vector (the market "shape") overlaid on its nearest historical matches.
2. Chart B: recent candlesticks for timing.
3. Per-match outcome rows for Chart A.

Decision rules:
- Chart A is the primary driver. A consensus above 60% in one direction is a tradeable edge.
- Chart B can veto only on a major contradiction, such as a large rejection candle or a volume spike against the trend.
- Do not chase: if the last 1-3 candles show an outsized vertical move, answer HOLD.

Environment: leverage {}x, stop-loss at {:.1}% of equity on every trade.

Reply with a single JSON object and nothing else:
{{"chart_a_analysis": "...", "chart_b_analysis": "...", "synthesis": "...", "signal": "LONG" | "SHORT" | "HOLD", "confidence": 0-100}}"#,
            self.leverage,
            self.sl_pct * 100.0
        )
    }

    pub fn user_prompt(request: &DecisionRequest) -> String {
        let stats = &request.stats;
        let rows: Vec<Value> = stats
            .rows
            .iter()
            .map(|r| {
                json!({
                    "time": r.time.format("%Y-%m-%d %H:%M").to_string(),
                    "trend_slope": format!("{:.6}", r.trend_slope),
                    "trend_outcome": r.trend_outcome,
                    "immediate_return": format!("{:.4}%", r.immediate_return * 100.0),
                })
            })
            .collect();
        let details = serde_json::to_string_pretty(&rows).unwrap_or_default();

        format!(
            r#"### Market context
- Symbol: {}
- Analysis time: {}
- Historical trend consensus: {}/{} matches trended UP ({:.1}%)
- Average future slope: {:.6}

### Historical match details (Chart A)
{}

Chart A gives the probability, Chart B gives the timing. Signal the trade when Chart A is above 60% and Chart B shows no clear danger."#,
            request.symbol,
            request.analysis_time.format("%Y-%m-%d %H:%M:%S"),
            stats.positive,
            stats.total,
            stats.consensus_pct,
            stats.average_slope,
            details
        )
    }

    fn request_body(&self, request: &DecisionRequest) -> Value {
        let mut content = vec![json!({"type": "text", "text": Self::user_prompt(request)})];

        for image in [&request.charts.pattern, &request.charts.candles]
            .into_iter()
            .flatten()
        {
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/png;base64,{}", STANDARD.encode(&image.bytes))}
            }));
        }

        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt()},
                {"role": "user", "content": content},
            ],
            "response_format": {"type": "json_object"},
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

/// Remove markdown code fences around a JSON answer
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Parse the model's JSON answer into a verdict
pub fn parse_verdict(content: &str) -> Result<Verdict, DecisionError> {
    let raw: RawVerdict = serde_json::from_str(strip_fences(content))
        .map_err(|e| DecisionError::InvalidResponse(format!("{}: {}", e, content)))?;

    let signal = match raw.signal.trim().to_uppercase().as_str() {
        "LONG" => Signal::Long,
        "SHORT" => Signal::Short,
        "HOLD" => Signal::Hold,
        other => {
            return Err(DecisionError::InvalidResponse(format!(
                "unknown signal '{}'",
                other
            )))
        }
    };

    // Fractions such as 0.72 or 1.0 are read as percentages; 0 stays 0
    let confidence = if raw.confidence > 0.0 && raw.confidence <= 1.0 {
        raw.confidence * 100.0
    } else {
        raw.confidence
    };

    Ok(Verdict {
        signal,
        confidence: confidence.round().clamp(0.0, 100.0) as u8,
        reasoning: raw.synthesis.or(raw.reasoning).unwrap_or_default(),
    })
}

#[async_trait]
impl DecisionService for LlmDecisionClient {
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, DecisionError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DecisionError::InvalidResponse("no choices".to_string()))?;

        let verdict = parse_verdict(&content)?;
        tracing::info!(
            signal = verdict.signal.as_str(),
            confidence = verdict.confidence,
            "Decision received"
        );
        Ok(verdict)
    }
}
