//! Price-history collaborator boundary.
//!
//! Sources hand back raw rows with optional fields; `sanitize_history` and
//! `sanitize_quote` are the only way into the engine's typed `Candle`/`Quote`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProjectionError;

pub mod csv;
pub mod http;
pub mod retry;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: u64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub ts: u64,
    pub high: f64,
    pub low: f64,
}

/// Row as delivered by a source, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCandle {
    pub ts: Option<u64>,
    pub o: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub c: Option<f64>,
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawQuote {
    pub price: Option<f64>,
    pub ts: Option<u64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Ascending history for `symbol` at `interval` (e.g. "1h").
    async fn history(&self, symbol: &str, interval: &str) -> Result<Vec<RawCandle>>;
    async fn quote(&self, symbol: &str) -> Result<RawQuote>;
}

fn positive(x: Option<f64>) -> Option<f64> {
    x.filter(|v| v.is_finite() && *v > 0.0)
}

/// `Some(None)` for an absent field, `None` for a present but unusable price.
fn optional_price(x: Option<f64>) -> Option<Option<f64>> {
    match x {
        None => Some(None),
        Some(v) => positive(Some(v)).map(Some),
    }
}

/// Drop rows lacking a timestamp or a positive close, or carrying any present
/// price field that is non-positive or non-finite. Absent open/high/low take
/// the close. Sorts ascending and collapses duplicate timestamps (last one
/// wins). Returns the kept candles and the number dropped.
pub fn sanitize_history(rows: Vec<RawCandle>) -> Result<(Vec<Candle>, usize), ProjectionError> {
    let total = rows.len();
    let mut kept: Vec<Candle> = rows
        .into_iter()
        .filter_map(|r| {
            let ts = r.ts?;
            let c = positive(r.c)?;
            Some(Candle {
                ts,
                o: optional_price(r.o)?.unwrap_or(c),
                h: optional_price(r.h)?.unwrap_or(c),
                l: optional_price(r.l)?.unwrap_or(c),
                c,
                v: r.v.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0),
            })
        })
        .collect();
    kept.sort_by_key(|c| c.ts);
    kept.reverse();
    kept.dedup_by_key(|c| c.ts);
    kept.reverse();

    if kept.is_empty() {
        return Err(ProjectionError::Data(format!(
            "no valid candles among {} rows",
            total
        )));
    }
    let dropped = total - kept.len();
    Ok((kept, dropped))
}

/// Rejects a quote whose price is missing or unusable, or whose present
/// high/low is non-positive. Absent high/low take the price.
pub fn sanitize_quote(raw: RawQuote) -> Result<Quote, ProjectionError> {
    let price = positive(raw.price)
        .ok_or_else(|| ProjectionError::Data("quote missing positive price".to_string()))?;
    let ts = raw
        .ts
        .ok_or_else(|| ProjectionError::Data("quote missing timestamp".to_string()))?;
    let bound = |name: &str, x: Option<f64>| {
        optional_price(x)
            .map(|v| v.unwrap_or(price))
            .ok_or_else(|| ProjectionError::Data(format!("quote {} {:?} is not a positive price", name, x)))
    };
    Ok(Quote {
        price,
        ts,
        high: bound("high", raw.high)?,
        low: bound("low", raw.low)?,
    })
}

/// Seconds per bar for Binance-style interval strings.
pub fn interval_secs(interval: &str) -> Option<u64> {
    let interval = interval.trim();
    if interval.len() < 2 {
        return None;
    }
    let (num, unit) = interval.split_at(interval.len() - 1);
    let n: u64 = num.parse().ok()?;
    let unit_secs = match unit {
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return None,
    };
    Some(n * unit_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ts: Option<u64>, c: Option<f64>) -> RawCandle {
        RawCandle { ts, c, ..Default::default() }
    }

    #[test]
    fn test_sanitize_filters_and_sorts() {
        let rows = vec![
            raw(Some(3), Some(12.0)),
            raw(Some(1), Some(10.0)),
            raw(None, Some(11.0)),
            raw(Some(2), Some(-1.0)),
            raw(Some(4), None),
            raw(Some(5), Some(f64::NAN)),
        ];
        let (kept, dropped) = sanitize_history(rows).unwrap();
        assert_eq!(kept.iter().map(|c| c.ts).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(dropped, 4);
        assert_eq!(kept[0].o, 10.0);
    }

    #[test]
    fn test_sanitize_duplicate_ts_keeps_last() {
        let rows = vec![raw(Some(1), Some(10.0)), raw(Some(1), Some(11.0))];
        let (kept, dropped) = sanitize_history(rows).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].c, 11.0);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_sanitize_all_bad_is_data_error() {
        let err = sanitize_history(vec![raw(None, None)]).unwrap_err();
        assert!(matches!(err, ProjectionError::Data(_)));
        assert!(matches!(sanitize_history(vec![]), Err(ProjectionError::Data(_))));
    }

    #[test]
    fn test_sanitize_quote() {
        let q = sanitize_quote(RawQuote { price: Some(5.0), ts: Some(9), ..Default::default() }).unwrap();
        assert_eq!(q.high, 5.0);
        assert!(sanitize_quote(RawQuote { price: Some(0.0), ts: Some(9), ..Default::default() }).is_err());
        assert!(sanitize_quote(RawQuote { price: Some(1.0), ts: None, ..Default::default() }).is_err());
    }

    #[test]
    fn test_sanitize_drops_rows_with_bad_present_prices() {
        let bad = RawCandle { ts: Some(1), o: Some(-5.0), h: Some(0.0), l: Some(-1.0), c: Some(10.0), v: None };
        let inf_high = RawCandle { ts: Some(2), h: Some(f64::INFINITY), c: Some(10.0), ..Default::default() };
        let good = RawCandle { ts: Some(3), o: Some(9.0), h: None, l: None, c: Some(10.0), v: None };
        let (kept, dropped) = sanitize_history(vec![bad, inf_high, good]).unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ts, 3);
        assert_eq!(kept[0].o, 9.0);
        // Absent high/low still take the close.
        assert_eq!((kept[0].h, kept[0].l), (10.0, 10.0));
    }

    #[test]
    fn test_sanitize_quote_rejects_bad_bounds() {
        let err = sanitize_quote(RawQuote { price: Some(5.0), ts: Some(9), high: Some(-3.0), low: Some(0.0) });
        assert!(matches!(err, Err(ProjectionError::Data(_))));
        let err = sanitize_quote(RawQuote { price: Some(5.0), ts: Some(9), high: Some(6.0), low: Some(f64::NAN) });
        assert!(matches!(err, Err(ProjectionError::Data(_))));
        let q = sanitize_quote(RawQuote { price: Some(5.0), ts: Some(9), high: Some(6.0), low: None }).unwrap();
        assert_eq!((q.high, q.low), (6.0, 5.0));
    }

    #[test]
    fn test_interval_secs() {
        assert_eq!(interval_secs("1m"), Some(60));
        assert_eq!(interval_secs("4h"), Some(14_400));
        assert_eq!(interval_secs("1d"), Some(86_400));
        assert_eq!(interval_secs("x"), None);
        assert_eq!(interval_secs("5y"), None);
    }
}
