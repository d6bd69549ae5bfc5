use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use super::{PriceSource, RawCandle, RawQuote};

/// Parse `ts,open,high,low,close,volume`. Unparseable numeric cells become
/// `None` so the boundary filter decides what survives.
pub fn parse_csv_line(line: &str) -> Result<RawCandle> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return Err(anyhow!("expected 5+ columns, got {}", parts.len()));
    }
    let cell = |i: usize| parts.get(i).and_then(|s| s.parse::<f64>().ok());
    Ok(RawCandle {
        ts: parts[0].parse().ok(),
        o: cell(1),
        h: cell(2),
        l: cell(3),
        c: cell(4),
        v: cell(5),
    })
}

/// Read every data row of a CSV file, skipping blanks, `#` comments and a
/// `ts,` header.
pub fn load_rows(path: &Path) -> Result<Vec<RawCandle>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.to_lowercase().starts_with("ts,") {
            continue;
        }
        match parse_csv_line(trimmed) {
            Ok(r) => rows.push(r),
            Err(_) => rows.push(RawCandle::default()),
        }
    }
    Ok(rows)
}

/// Offline price source backed by a CSV file. The quote is the last row.
pub struct CsvPriceSource {
    path: PathBuf,
}

impl CsvPriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PriceSource for CsvPriceSource {
    async fn history(&self, _symbol: &str, _interval: &str) -> Result<Vec<RawCandle>> {
        load_rows(&self.path)
    }

    async fn quote(&self, _symbol: &str) -> Result<RawQuote> {
        let rows = load_rows(&self.path)?;
        let last = rows
            .iter()
            .rev()
            .find(|r| r.ts.is_some() && r.c.is_some())
            .ok_or_else(|| anyhow!("{} has no usable rows", self.path.display()))?;
        Ok(RawQuote { price: last.c, ts: last.ts, high: last.h, low: last.l })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_line() {
        let r = parse_csv_line("1700000000, 1.0, 2.0, 0.5, 1.5, 10").unwrap();
        assert_eq!(r.ts, Some(1_700_000_000));
        assert_eq!(r.c, Some(1.5));
        let r = parse_csv_line("x,1,2,3,abc").unwrap();
        assert_eq!(r.ts, None);
        assert_eq!(r.c, None);
        assert!(parse_csv_line("1,2").is_err());
    }

    #[tokio::test]
    async fn test_csv_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ts,open,high,low,close,volume").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "60,1,1,1,10,1").unwrap();
        writeln!(file, "120,1,1,1,11,1").unwrap();
        writeln!(file, "bad").unwrap();
        let src = CsvPriceSource::new(file.path());
        let rows = src.history("X", "1m").await.unwrap();
        assert_eq!(rows.len(), 3);
        let q = src.quote("X").await.unwrap();
        assert_eq!(q.price, Some(11.0));
        assert_eq!(q.ts, Some(120));
    }
}
