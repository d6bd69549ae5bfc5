use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::retry::{is_retryable_http_status, retry_async, RetryConfig};
use super::{PriceSource, RawCandle, RawQuote};
use crate::error::ProjectionError;

/// Binance-compatible REST price source.
pub struct HttpPriceSource {
    client: Client,
    base: Url,
    limit: usize,
    retry: RetryConfig,
}

impl HttpPriceSource {
    pub fn new(base: &str, limit: usize) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid price api base {}", base))?;
        Ok(Self {
            client: Client::new(),
            base,
            limit: limit.clamp(1, 1000),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base.join(path)?;
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let err = anyhow!("GET {} returned {}", url.path(), status);
            if is_retryable_http_status(status) {
                return Err(err);
            }
            return Err(ProjectionError::Data(err.to_string()).into());
        }
        resp.json::<T>()
            .await
            .map_err(|e| anyhow::Error::from(ProjectionError::Data(format!("malformed body from {}: {}", url.path(), e))))
    }
}

fn num(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Kline row: [openTime, open, high, low, close, volume, closeTime, ...]
fn parse_kline(row: &[Value]) -> RawCandle {
    RawCandle {
        ts: row.first().and_then(Value::as_u64).map(|ms| ms / 1000),
        o: num(row.get(1)),
        h: num(row.get(2)),
        l: num(row.get(3)),
        c: num(row.get(4)),
        v: num(row.get(5)),
    }
}

#[derive(Deserialize, Debug)]
struct Ticker24h {
    #[serde(rename = "lastPrice")]
    last_price: Option<String>,
    #[serde(rename = "highPrice")]
    high_price: Option<String>,
    #[serde(rename = "lowPrice")]
    low_price: Option<String>,
    #[serde(rename = "closeTime")]
    close_time: Option<u64>,
}

impl From<Ticker24h> for RawQuote {
    fn from(t: Ticker24h) -> Self {
        RawQuote {
            price: t.last_price.and_then(|s| s.parse().ok()),
            ts: t.close_time.map(|ms| ms / 1000),
            high: t.high_price.and_then(|s| s.parse().ok()),
            low: t.low_price.and_then(|s| s.parse().ok()),
        }
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn history(&self, symbol: &str, interval: &str) -> Result<Vec<RawCandle>> {
        let url = self.endpoint(
            "/api/v3/klines",
            &[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", self.limit.to_string()),
            ],
        )?;
        let rows: Vec<Vec<Value>> = retry_async(&self.retry, "history", || self.get_json(url.clone())).await?;
        Ok(rows.iter().map(|r| parse_kline(r)).collect())
    }

    async fn quote(&self, symbol: &str) -> Result<RawQuote> {
        let url = self.endpoint("/api/v3/ticker/24hr", &[("symbol", symbol.to_string())])?;
        let ticker: Ticker24h = retry_async(&self.retry, "quote", || self.get_json(url.clone())).await?;
        Ok(ticker.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([1_700_000_000_000u64, "1.5", "2.0", "1.0", "1.75", "300", 0]);
        let raw = parse_kline(row.as_array().unwrap());
        assert_eq!(raw.ts, Some(1_700_000_000));
        assert_eq!(raw.c, Some(1.75));
        assert_eq!(raw.v, Some(300.0));
    }

    #[test]
    fn test_parse_kline_short_row() {
        let row = json!([1000u64, "1.0"]);
        let raw = parse_kline(row.as_array().unwrap());
        assert_eq!(raw.c, None);
    }

    #[test]
    fn test_ticker_into_quote() {
        let t: Ticker24h = serde_json::from_value(json!({
            "lastPrice": "64000.5",
            "highPrice": "65000",
            "lowPrice": "63000",
            "closeTime": 1_700_000_000_123u64
        }))
        .unwrap();
        let q: RawQuote = t.into();
        assert_eq!(q.price, Some(64000.5));
        assert_eq!(q.ts, Some(1_700_000_000));
    }

    #[test]
    fn test_endpoint_query() {
        let src = HttpPriceSource::new("https://api.binance.com", 500).unwrap();
        let url = src
            .endpoint("/api/v3/klines", &[("symbol", "BTCUSDT".into()), ("limit", "5".into())])
            .unwrap();
        assert_eq!(url.as_str(), "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&limit=5");
    }
}
