use crate::ensemble::DEFAULT_ACCURACY_WINDOW;
use crate::phase::Lambda;
use crate::projection::ProjectionParams;

#[derive(Clone, Debug)]
pub struct Config {
    pub symbol: String,
    pub interval: String,
    pub depth_prime: u32,
    pub steps: usize,
    pub projection_count: usize,
    pub base: f64,
    pub decimals: u32,
    pub frequency_hz: f64,
    pub lambda_schedule: Vec<Lambda>,
    pub frequency_schedule: Option<Vec<f64>>,
    pub history_limit: usize,
    pub refresh_secs: u64,
    pub price_api_base: String,
    pub sqlite_path: String,
    pub accuracy_window: usize,
    pub trend_window: usize,
    /// Touch this file to force a recompute.
    pub refresh_file: String,
    pub kill_file: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// "dub,kubt,k'anch" → schedule. Unknown tokens fall back to nu = 3.
pub fn parse_lambda_schedule(raw: &str) -> Vec<Lambda> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Lambda::from_token)
        .collect()
}

/// "432,528" → frequencies. Empty or fully unparseable input means no schedule.
pub fn parse_frequency_schedule(raw: &str) -> Option<Vec<f64>> {
    let freqs: Vec<f64> = raw
        .split(',')
        .filter_map(|t| t.trim().parse().ok())
        .collect();
    if freqs.is_empty() {
        None
    } else {
        Some(freqs)
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = ProjectionParams::default();
        Self {
            symbol: std::env::var("SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string()),
            interval: std::env::var("INTERVAL").unwrap_or_else(|_| "1h".to_string()),
            depth_prime: env_or("DEPTH_PRIME", defaults.depth_prime),
            steps: env_or("STEPS", defaults.steps),
            projection_count: env_or("PROJECTION_COUNT", defaults.projection_count),
            base: env_or("BASE", defaults.base),
            decimals: env_or("DECIMALS", defaults.decimals),
            frequency_hz: env_or("FREQUENCY_HZ", defaults.frequency_hz),
            lambda_schedule: std::env::var("LAMBDA_SCHEDULE")
                .map(|v| parse_lambda_schedule(&v))
                .unwrap_or(defaults.lambda_schedule),
            frequency_schedule: std::env::var("FREQUENCY_SCHEDULE")
                .ok()
                .and_then(|v| parse_frequency_schedule(&v)),
            history_limit: env_or("HISTORY_LIMIT", 500),
            refresh_secs: env_or("REFRESH_SECS", 60),
            price_api_base: std::env::var("PRICE_API_BASE").unwrap_or_else(|_| "https://api.binance.com".to_string()),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./projections.sqlite".to_string()),
            accuracy_window: env_or("ACCURACY_WINDOW", DEFAULT_ACCURACY_WINDOW),
            trend_window: env_or("TREND_WINDOW", 50),
            refresh_file: std::env::var("REFRESH_FILE").unwrap_or_else(|_| "/tmp/projectionfx.refresh".to_string()),
            kill_file: std::env::var("KILL_FILE").unwrap_or_else(|_| "/tmp/projectionfx.stop".to_string()),
        }
    }

    pub fn params(&self) -> ProjectionParams {
        ProjectionParams {
            depth_prime: self.depth_prime,
            steps: self.steps,
            projection_count: self.projection_count,
            base: self.base,
            decimals: self.decimals,
            frequency_hz: self.frequency_hz,
            lambda_schedule: self.lambda_schedule.clone(),
            frequency_schedule: self.frequency_schedule.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lambda_schedule() {
        let s = parse_lambda_schedule("dub, kubt,k'anch,,2,bogus");
        assert_eq!(
            s,
            vec![Lambda::Dub, Lambda::Kubt, Lambda::KAnch, Lambda::Numeric(2), Lambda::Dub]
        );
        assert!(parse_lambda_schedule("").is_empty());
    }

    #[test]
    fn test_parse_frequency_schedule() {
        assert_eq!(parse_frequency_schedule("432, 528"), Some(vec![432.0, 528.0]));
        assert_eq!(parse_frequency_schedule(""), None);
        assert_eq!(parse_frequency_schedule("a,b"), None);
    }
}
