//! Persistable record of a projection run.
//!
//! Only `historical_prices` and `params` are needed to rebuild the run; the
//! labels and stored lines are presentation data.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ensemble::{EnsembleCombiner, EnsembleResult};
use crate::error::{DomainError, ProjectionError};
use crate::feed::Candle;
use crate::projection::{ProjectionLine, ProjectionParams};
use crate::session::{compute_run, ProjectionRun};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    pub symbol: String,
    pub interval: String,
    pub historical_prices: Vec<f64>,
    pub historical_labels: Vec<String>,
    pub projection_lines: Vec<ProjectionLine>,
    #[serde(default)]
    pub ensemble: Option<EnsembleResult>,
    pub projection_labels: Vec<String>,
    pub params: ProjectionParams,
    pub saved_timestamp: u64,
}

pub fn ts_label(ts: u64) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ts.to_string())
}

/// Labels for `steps` bars after `anchor_ts`.
pub fn projection_labels(anchor_ts: u64, interval_secs: u64, steps: usize) -> Vec<String> {
    (1..=steps as u64)
        .map(|k| ts_label(anchor_ts + k * interval_secs))
        .collect()
}

/// sha256 of the canonical params JSON, hex encoded.
pub fn params_digest(params: &ProjectionParams) -> String {
    let body = serde_json::to_vec(params).unwrap_or_default();
    hex::encode(Sha256::digest(&body))
}

impl ProjectionSnapshot {
    pub fn from_run(
        symbol: &str,
        interval: &str,
        interval_secs: u64,
        candles: &[Candle],
        run: &ProjectionRun,
        params: &ProjectionParams,
        saved_timestamp: u64,
    ) -> Self {
        let mut historical_prices: Vec<f64> = candles.iter().map(|c| c.c).collect();
        // The run may have seeded from a live quote rather than the last close.
        if let Some(last) = historical_prices.last_mut() {
            *last = run.last_price;
        }
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            historical_prices,
            historical_labels: candles.iter().map(|c| ts_label(c.ts)).collect(),
            projection_lines: run.lines.clone(),
            ensemble: Some(run.ensemble.clone()),
            projection_labels: projection_labels(run.anchor_ts, interval_secs, params.steps),
            params: params.clone(),
            saved_timestamp,
        }
    }

    pub fn digest(&self) -> String {
        params_digest(&self.params)
    }

    /// Rebuild the run from prices and params alone.
    pub fn regenerate(&self, combiner: &EnsembleCombiner) -> Result<ProjectionRun, ProjectionError> {
        let last = *self
            .historical_prices
            .last()
            .ok_or(DomainError::EmptyHistory)?;
        compute_run(&self.historical_prices, last, 0, &self.params, combiner)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(body: &str) -> Result<Self, ProjectionError> {
        serde_json::from_str(body).map_err(|e| ProjectionError::Data(format!("bad snapshot: {}", e)))
    }
}
