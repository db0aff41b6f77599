use super::{
    ConditionalOrder, ConditionalOrderInfo, Exchange, ExchangeError, IncomeRecord, LimitOrder,
    OpenOrder, OrderAck,
};
use crate::config::ExchangeConfig;
use crate::models::{Candle, ExchangeFilters, OrderSide, PositionInfo, Side};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";
const INCOME_PAGE_LIMIT: u32 = 1000;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: String },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    total_wallet_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderRaw {
    order_id: u64,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlgoOrderRaw {
    algo_id: u64,
    #[serde(default)]
    order_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlgoOrderResponse {
    algo_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomeRaw {
    income_type: String,
    income: String,
    time: i64,
}

// ============== Implementation ==============

/// Binance USDⓈ-M futures REST client
///
/// Cloneable; clones share the rate limiter and the symbol filter cache.
#[derive(Clone)]
pub struct BinanceFutures {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
    filters: Arc<RwLock<HashMap<String, ExchangeFilters>>>,
}

impl BinanceFutures {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            rate_limiter,
            filters: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// HMAC-SHA256 of the query string, hex encoded
    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Signature(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn send_public(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response, ExchangeError> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, encode_query(params))
        };

        self.rate_limiter.until_ready().await;
        let response = self.client.get(&url).send().await?;
        check_status(response).await
    }

    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<Response, ExchangeError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ExchangeError::MissingCredentials);
        }

        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = encode_query(&params);
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        check_status(response).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let response = self.send_signed(Method::GET, path, params).await?;
        parse_json(response).await
    }

    async fn load_filters(&self, symbol: &str) -> Result<ExchangeFilters, ExchangeError> {
        let response = self.send_public("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo = parse_json(response).await?;

        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))?;

        filters_from_symbol(symbol_info)
    }
}

#[async_trait]
impl Exchange for BinanceFutures {
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime", start.timestamp_millis().to_string()));
        }

        let response = self.send_public("/fapi/v1/klines", &params).await?;
        let rows: Vec<Vec<Value>> = parse_json(response).await?;

        rows.iter().map(|row| parse_kline_row(row)).collect()
    }

    async fn available_balance(&self, asset: &str) -> Result<f64, ExchangeError> {
        let balances: Vec<BalanceEntry> = self.get_signed("/fapi/v2/balance", vec![]).await?;

        let entry = balances
            .into_iter()
            .find(|b| b.asset == asset)
            .ok_or_else(|| ExchangeError::AssetNotFound(asset.to_string()))?;

        parse_f64(&entry.available_balance)
    }

    async fn wallet_balance(&self) -> Result<f64, ExchangeError> {
        let account: AccountInfo = self.get_signed("/fapi/v2/account", vec![]).await?;
        parse_f64(&account.total_wallet_balance)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<ExchangeFilters, ExchangeError> {
        if let Some(cached) = self.filters.read().await.get(symbol) {
            return Ok(cached.clone());
        }

        let filters = self.load_filters(symbol).await?;
        tracing::info!(
            symbol,
            step = %filters.quantity_step_size,
            tick = %filters.price_tick_size,
            "Cached exchange filters"
        );
        self.filters
            .write()
            .await
            .insert(symbol.to_string(), filters.clone());
        Ok(filters)
    }

    async fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, ExchangeError> {
        let positions: Vec<PositionRisk> = self
            .get_signed("/fapi/v2/positionRisk", vec![("symbol", symbol.to_string())])
            .await?;

        for p in positions.iter().filter(|p| p.symbol == symbol) {
            let amount = parse_f64(&p.position_amt)?;
            if amount > 0.0 {
                return Ok(Some(PositionInfo {
                    side: Side::Long,
                    quantity: amount,
                }));
            }
            if amount < 0.0 {
                return Ok(Some(PositionInfo {
                    side: Side::Short,
                    quantity: amount.abs(),
                }));
            }
        }

        Ok(None)
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let orders: Vec<OpenOrderRaw> = self
            .get_signed("/fapi/v1/openOrders", vec![("symbol", symbol.to_string())])
            .await?;

        Ok(orders
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id,
                side: o.side,
                order_type: o.order_type,
                price: o.price,
            })
            .collect())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.send_signed(
            Method::DELETE,
            "/fapi/v1/allOpenOrders",
            vec![("symbol", symbol.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn open_conditional_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<ConditionalOrderInfo>, ExchangeError> {
        let orders: Vec<AlgoOrderRaw> = self
            .get_signed("/fapi/v1/openAlgoOrders", vec![("symbol", symbol.to_string())])
            .await?;

        Ok(orders
            .into_iter()
            .map(|o| ConditionalOrderInfo {
                algo_id: o.algo_id,
                order_type: o.order_type,
            })
            .collect())
    }

    async fn cancel_conditional_order(&self, algo_id: u64) -> Result<(), ExchangeError> {
        self.send_signed(
            Method::DELETE,
            "/fapi/v1/algoOrder",
            vec![("algoId", algo_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.send_signed(
            Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn place_limit_order(&self, order: &LimitOrder) -> Result<OrderAck, ExchangeError> {
        let response = self
            .send_signed(
                Method::POST,
                "/fapi/v1/order",
                vec![
                    ("symbol", order.symbol.clone()),
                    ("side", order.side.as_str().to_string()),
                    ("type", "LIMIT".to_string()),
                    ("timeInForce", "GTC".to_string()),
                    ("price", order.price.clone()),
                    ("quantity", order.quantity.clone()),
                    ("newClientOrderId", order.client_order_id.clone()),
                ],
            )
            .await?;
        let ack: OrderResponse = parse_json(response).await?;
        Ok(OrderAck { id: ack.order_id })
    }

    async fn place_conditional_order(
        &self,
        order: &ConditionalOrder,
    ) -> Result<OrderAck, ExchangeError> {
        let response = self
            .send_signed(
                Method::POST,
                "/fapi/v1/algoOrder",
                vec![
                    ("algoType", "CONDITIONAL".to_string()),
                    ("symbol", order.symbol.clone()),
                    ("side", order.side.as_str().to_string()),
                    ("type", order.kind.as_str().to_string()),
                    ("triggerPrice", order.trigger_price.clone()),
                    ("quantity", order.quantity.clone()),
                    ("reduceOnly", "true".to_string()),
                ],
            )
            .await?;
        let ack: AlgoOrderResponse = parse_json(response).await?;
        Ok(OrderAck { id: ack.algo_id })
    }

    async fn place_market_close(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: &str,
    ) -> Result<OrderAck, ExchangeError> {
        let response = self
            .send_signed(
                Method::POST,
                "/fapi/v1/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", quantity.to_string()),
                    ("reduceOnly", "true".to_string()),
                ],
            )
            .await?;
        let ack: OrderResponse = parse_json(response).await?;
        Ok(OrderAck { id: ack.order_id })
    }

    async fn income_since(&self, start: DateTime<Utc>) -> Result<Vec<IncomeRecord>, ExchangeError> {
        let rows: Vec<IncomeRaw> = self
            .get_signed(
                "/fapi/v1/income",
                vec![
                    ("startTime", start.timestamp_millis().to_string()),
                    ("limit", INCOME_PAGE_LIMIT.to_string()),
                ],
            )
            .await?;

        rows.into_iter()
            .map(|r| {
                Ok(IncomeRecord {
                    income_type: r.income_type,
                    income: parse_f64(&r.income)?,
                    time: millis_to_utc(r.time)?,
                })
            })
            .collect()
    }
}

// ============== Helpers ==============

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

async fn check_status(response: Response) -> Result<Response, ExchangeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, msg) = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(err) => (Some(err.code), err.msg),
        Err(_) => (None, body),
    };

    Err(ExchangeError::Api {
        status: status.as_u16(),
        code,
        msg,
    })
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(format!("{}: {}", e, body)))
}

fn parse_f64(raw: &str) -> Result<f64, ExchangeError> {
    raw.parse::<f64>()
        .map_err(|_| ExchangeError::Parse(format!("invalid number '{}'", raw)))
}

fn value_f64(value: &Value) -> Result<f64, ExchangeError> {
    match value {
        Value::String(s) => parse_f64(s),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Parse(format!("invalid number {}", n))),
        other => Err(ExchangeError::Parse(format!("expected number, got {}", other))),
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, ExchangeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ExchangeError::Parse(format!("invalid timestamp {}", ms)))
}

/// `[openTime, open, high, low, close, volume, closeTime, ...]`
fn parse_kline_row(row: &[Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Parse(format!(
            "kline row has {} fields",
            row.len()
        )));
    }

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| ExchangeError::Parse("kline open time is not an integer".to_string()))?;

    Ok(Candle {
        timestamp: millis_to_utc(open_time)?,
        open: value_f64(&row[1])?,
        high: value_f64(&row[2])?,
        low: value_f64(&row[3])?,
        close: value_f64(&row[4])?,
        volume: value_f64(&row[5])?,
    })
}

fn parse_decimal(raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw)
        .map(|d| d.normalize())
        .map_err(|_| ExchangeError::Parse(format!("invalid decimal '{}'", raw)))
}

fn filters_from_symbol(info: SymbolInfo) -> Result<ExchangeFilters, ExchangeError> {
    let mut tick_size = None;
    let mut step_size = None;

    for filter in &info.filters {
        match filter {
            SymbolFilter::Price { tick_size: t } => tick_size = Some(parse_decimal(t)?),
            SymbolFilter::LotSize { step_size: s } => step_size = Some(parse_decimal(s)?),
            SymbolFilter::Other => {}
        }
    }

    let missing = |name: &str| {
        ExchangeError::Parse(format!("{} filter missing for {}", name, info.symbol))
    };

    Ok(ExchangeFilters {
        quantity_step_size: step_size.ok_or_else(|| missing("LOT_SIZE"))?,
        quantity_precision: info.quantity_precision,
        price_tick_size: tick_size.ok_or_else(|| missing("PRICE_FILTER"))?,
        price_precision: info.price_precision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ConditionalKind;
    use mockito::Matcher;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn client_for(server: &mockito::ServerGuard) -> BinanceFutures {
        let config = ExchangeConfig {
            rest_url: server.url(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
            ..ExchangeConfig::default()
        };
        BinanceFutures::new(&config).unwrap()
    }

    const EXCHANGE_INFO: &str = r#"{
        "symbols": [
            {
                "symbol": "ETHUSDT",
                "pricePrecision": 2,
                "quantityPrecision": 3,
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.01", "maxPrice": "100000", "tickSize": "0.01"},
                    {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "10000", "stepSize": "0.001"},
                    {"filterType": "MIN_NOTIONAL", "notional": "20"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_sign_matches_documented_example() {
        let config = ExchangeConfig {
            api_secret: "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j"
                .to_string(),
            ..ExchangeConfig::default()
        };
        let client = BinanceFutures::new(&config).unwrap();
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

        assert_eq!(
            client.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_parse_kline_row() {
        let row: Vec<Value> = serde_json::from_str(
            r#"[1767960000000, "2000.10", "2010.00", "1995.5", "2005.25", "1234.5", 1767960899999, "0", 10, "0", "0", "0"]"#,
        )
        .unwrap();

        let candle = parse_kline_row(&row).unwrap();
        assert_eq!(candle.timestamp.timestamp(), 1_767_960_000);
        assert_eq!(candle.open, 2000.10);
        assert_eq!(candle.close, 2005.25);
        assert_eq!(candle.volume, 1234.5);
    }

    #[test]
    fn test_parse_kline_row_too_short() {
        let row: Vec<Value> = serde_json::from_str(r#"[1767960000000, "1"]"#).unwrap();
        assert!(matches!(parse_kline_row(&row), Err(ExchangeError::Parse(_))));
    }

    #[tokio::test]
    async fn test_klines_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex("^/fapi/v1/klines".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "15m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[[1767960000000,"1","2","0.5","1.5","10",1767960899999],
                    [1767960900000,"1.5","2","1","1.8","12",1767961799999]]"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let candles = client.klines("ETHUSDT", "15m", 2, None).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(
            (candles[1].timestamp - candles[0].timestamp).num_seconds(),
            900
        );
        assert_eq!(candles[1].close, 1.8);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_symbol_filters_parsed_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(EXCHANGE_INFO)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let filters = client.symbol_filters("ETHUSDT").await.unwrap();
        let again = client.symbol_filters("ETHUSDT").await.unwrap();

        assert_eq!(filters.quantity_step_size, dec("0.001"));
        assert_eq!(filters.price_tick_size, dec("0.01"));
        assert_eq!(filters.quantity_precision, 3);
        assert_eq!(filters.price_precision, 2);
        assert_eq!(filters, again);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_symbol_filters_unknown_symbol() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_body(EXCHANGE_INFO)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.symbol_filters("BTCUSDT").await.unwrap_err();
        assert!(matches!(err, ExchangeError::SymbolNotFound(s) if s == "BTCUSDT"));
    }

    #[tokio::test]
    async fn test_position_signed_and_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex("^/fapi/v2/positionRisk".to_string()))
            .match_header(API_KEY_HEADER, "test-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "ETHUSDT".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".to_string()),
                Matcher::Regex("timestamp=[0-9]+".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"[{"symbol":"ETHUSDT","positionAmt":"-0.135","entryPrice":"2000"}]"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let position = client.position("ETHUSDT").await.unwrap().unwrap();

        assert_eq!(position.side, Side::Short);
        assert_eq!(position.quantity, 0.135);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_position_flat() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/fapi/v2/positionRisk".to_string()))
            .with_status(200)
            .with_body(r#"[{"symbol":"ETHUSDT","positionAmt":"0.000"}]"#)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.position("ETHUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_available_balance() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/fapi/v2/balance".to_string()))
            .with_status(200)
            .with_body(
                r#"[{"asset":"BNB","balance":"1","availableBalance":"1"},
                    {"asset":"USDT","balance":"120.5","availableBalance":"100.25"}]"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.available_balance("USDT").await.unwrap(), 100.25);
        assert!(matches!(
            client.available_balance("BUSD").await,
            Err(ExchangeError::AssetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_api_error_mapped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Regex("^/fapi/v1/order".to_string()))
            .with_status(400)
            .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let order = LimitOrder {
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Buy,
            price: "2000.00".to_string(),
            quantity: "0.135".to_string(),
            client_order_id: "pt-test".to_string(),
        };

        match client.place_limit_order(&order).await.unwrap_err() {
            ExchangeError::Api { status, code, msg } => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(-2019));
                assert_eq!(msg, "Margin is insufficient.");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conditional_order_is_reduce_only() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("^/fapi/v1/algoOrder".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("algoType".into(), "CONDITIONAL".into()),
                Matcher::UrlEncoded("type".into(), "STOP_MARKET".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("triggerPrice".into(), "1980.00".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"algoId": 4242, "clientAlgoId": "x"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let ack = client
            .place_conditional_order(&ConditionalOrder {
                symbol: "ETHUSDT".to_string(),
                side: OrderSide::Sell,
                kind: ConditionalKind::StopMarket,
                trigger_price: "1980.00".to_string(),
                quantity: "0.135".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(ack.id, 4242);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signed_call_without_credentials() {
        let server = mockito::Server::new_async().await;
        let config = ExchangeConfig {
            rest_url: server.url(),
            ..ExchangeConfig::default()
        };
        let client = BinanceFutures::new(&config).unwrap();

        assert!(matches!(
            client.wallet_balance().await,
            Err(ExchangeError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_income_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/fapi/v1/income".to_string()))
            .with_status(200)
            .with_body(
                r#"[{"symbol":"ETHUSDT","incomeType":"REALIZED_PNL","income":"12.5","asset":"USDT","time":1767960000000},
                    {"symbol":"ETHUSDT","incomeType":"COMMISSION","income":"-0.4","asset":"USDT","time":1767960001000}]"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let income = client
            .income_since(Utc.timestamp_opt(1_767_900_000, 0).unwrap())
            .await
            .unwrap();

        assert_eq!(income.len(), 2);
        assert_eq!(income[0].income_type, "REALIZED_PNL");
        assert_eq!(income[1].income, -0.4);
    }
}
