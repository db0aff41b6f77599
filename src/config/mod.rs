use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default layered file, resolved relative to the working directory
const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "PATTERN";

/// Process configuration, built once at startup and passed into constructors
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub trading: TradingConfig,
    pub exchange: ExchangeConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub decision: DecisionConfig,
    pub charts: ChartsConfig,
    pub notify: NotifyConfig,
    pub labels: LabelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub symbol: String,
    pub interval: String,
    /// Log-returns per embedding (N); a feature needs N+1 candles
    pub window: usize,
    pub top_k: usize,
    /// Extra candles requested on top of the window to absorb overlap
    pub history_padding: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbol: "ETHUSDT".to_string(),
            interval: "15m".to_string(),
            window: 60,
            top_k: 18,
            history_padding: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub trade_ratio: f64,
    pub leverage: u32,
    /// Equity risk of the stop-loss, divided by leverage for the price move
    pub sl_pct: f64,
    pub tp_pct: f64,
    pub min_notional: f64,
    pub quote_asset: String,
    pub balance_poll_ms: u64,
    pub balance_timeout_ms: u64,
    pub protective_attempts: u32,
    pub protective_retry_delay_ms: u64,
    pub confidence_threshold: u8,
    pub cycle_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            trade_ratio: 0.9,
            leverage: 3,
            sl_pct: 0.03,
            tp_pct: 0.7,
            min_notional: 21.0,
            quote_asset: "USDT".to_string(),
            balance_poll_ms: 200,
            balance_timeout_ms: 10_000,
            protective_attempts: 3,
            protective_retry_delay_ms: 500,
            confidence_threshold: 30,
            cycle_timeout_secs: 120,
        }
    }
}

impl TradingConfig {
    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_ms.max(1))
    }

    pub fn balance_timeout(&self) -> Duration {
        Duration::from_millis(self.balance_timeout_ms)
    }

    pub fn protective_retry_delay(&self) -> Duration {
        Duration::from_millis(self.protective_retry_delay_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub rest_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    pub history_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://fapi.binance.com".to_string(),
            ws_url: "wss://fstream.binance.com/ws".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5_000,
            request_timeout_secs: 10,
            requests_per_minute: 1_200,
            history_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub search_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/patterntrader".to_string(),
            max_connections: 5,
            search_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub audit_key: String,
    pub publish_attempts: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            audit_key: "patterntrader:audit".to_string(),
            publish_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "anthropic/claude-sonnet-4.5".to_string(),
            timeout_secs: 60,
            max_tokens: 1_000,
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartsConfig {
    /// External renderer; empty disables chart images
    pub command: String,
    pub output_dir: String,
    pub timeout_secs: u64,
}

impl Default for ChartsConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            output_dir: "charts".to_string(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub alert_webhook_url: String,
    pub notify_webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub queue_capacity: usize,
    pub ingest_timeout_secs: u64,
    pub drain_timeout_secs: u64,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            ingest_timeout_secs: 5,
            drain_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load `config/default.toml`, an optional override file, then
    /// `PATTERN__SECTION__KEY` variables and the well-known secret variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let mut cfg: AppConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        cfg.apply_secret_env(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Secrets live in plain variables rather than the layered file
    fn apply_secret_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 7] = [
            ("BINANCE_API_KEY", &mut self.exchange.api_key),
            ("BINANCE_API_SECRET", &mut self.exchange.api_secret),
            ("LLM_API_KEY", &mut self.decision.api_key),
            ("DATABASE_URL", &mut self.database.url),
            ("REDIS_URL", &mut self.redis.url),
            ("DISCORD_ALERT_WEBHOOK_URL", &mut self.notify.alert_webhook_url),
            ("DISCORD_NOTIFY_WEBHOOK_URL", &mut self.notify.notify_webhook_url),
        ];

        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.market.window < 2 {
            return Err(ConfigError::Message(
                "market.window must be at least 2".to_string(),
            ));
        }
        if crate::models::interval_seconds(&self.market.interval).is_none() {
            return Err(ConfigError::Message(format!(
                "market.interval '{}' is not a kline interval",
                self.market.interval
            )));
        }
        if self.trading.leverage == 0 {
            return Err(ConfigError::Message(
                "trading.leverage must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.trading.trade_ratio) || self.trading.trade_ratio == 0.0 {
            return Err(ConfigError::Message(
                "trading.trade_ratio must be in (0, 1]".to_string(),
            ));
        }
        if self.trading.confidence_threshold > 100 {
            return Err(ConfigError::Message(
                "trading.confidence_threshold must be 0-100".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval_secs(&self) -> i64 {
        crate::models::interval_seconds(&self.market.interval).unwrap_or(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.market.symbol, "ETHUSDT");
        assert_eq!(cfg.market.interval, "15m");
        assert_eq!(cfg.market.window, 60);
        assert_eq!(cfg.trading.leverage, 3);
        assert_eq!(cfg.trading.trade_ratio, 0.9);
        assert_eq!(cfg.trading.balance_poll_interval(), Duration::from_millis(200));
        assert_eq!(cfg.trading.balance_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.trading.protective_attempts, 3);
        assert_eq!(cfg.interval_secs(), 900);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_and_defaults_fill_gaps() {
        let dir = std::env::temp_dir().join(format!("patterntrader-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("override.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[market]\nsymbol = \"ADAUSDT\"\nwindow = 30\n").unwrap();
        writeln!(file, "[trading]\nleverage = 5\n").unwrap();

        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.market.symbol, "ADAUSDT");
        assert_eq!(cfg.market.window, 30);
        assert_eq!(cfg.market.interval, "15m");
        assert_eq!(cfg.trading.leverage, 5);
        assert_eq!(cfg.trading.sl_pct, 0.03);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_secret_env_applied() {
        let env: HashMap<&str, &str> = [
            ("BINANCE_API_KEY", "key"),
            ("BINANCE_API_SECRET", "secret"),
            ("REDIS_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        cfg.apply_secret_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.exchange.api_key, "key");
        assert_eq!(cfg.exchange.api_secret, "secret");
        // Empty values do not clobber defaults
        assert_eq!(cfg.redis.url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.market.interval = "15x".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.trading.trade_ratio = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.trading.leverage = 0;
        assert!(cfg.validate().is_err());
    }
}
