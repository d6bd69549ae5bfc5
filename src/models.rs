//! Baseline forecasting models that can sit beside the lattice lines in the
//! ensemble.

use crate::ensemble::{ModelContext, ModelOutput, ProjectionModel};
use crate::error::{DomainError, Result};
use crate::phase::truncate;
use crate::projection::{line_confidence, PRICE_FLOOR};

/// Exponential moving average with configurable alpha
#[derive(Debug, Clone)]
pub struct Ema {
    pub value: f64,
    pub alpha: f64,
    initialized: bool,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            value: 0.0,
            alpha: 2.0 / (period as f64 + 1.0),
            initialized: false,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        if !self.initialized {
            self.value = price;
            self.initialized = true;
        } else {
            self.value = self.value * (1.0 - self.alpha) + price * self.alpha;
        }
        self.value
    }

    pub fn get(&self) -> f64 {
        self.value
    }
}

fn check_context(ctx: &ModelContext<'_>) -> Result<()> {
    if ctx.closes.is_empty() {
        return Err(DomainError::EmptyHistory.into());
    }
    if ctx.steps == 0 {
        return Err(DomainError::ZeroSteps.into());
    }
    if !(ctx.last_price.is_finite() && ctx.last_price > 0.0) {
        return Err(DomainError::LastPrice(ctx.last_price).into());
    }
    Ok(())
}

/// Walk `steps` increments of `drift` from the last price.
fn extrapolate(ctx: &ModelContext<'_>, drift: f64) -> Vec<f64> {
    (1..=ctx.steps)
        .map(|k| truncate(ctx.last_price + drift * k as f64, ctx.decimals).max(PRICE_FLOOR))
        .collect()
}

// =============================================================================
// Linear trend
// =============================================================================

/// Least-squares slope over the trailing window, extended forward.
#[derive(Debug, Clone)]
pub struct LinearTrendModel {
    window: usize,
}

impl LinearTrendModel {
    pub const ID: &'static str = "linear_trend";

    pub fn new(window: usize) -> Self {
        Self { window: window.max(2) }
    }
}

pub fn least_squares_slope(ys: &[f64]) -> f64 {
    let n = ys.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / nf;
    let (num, den) = ys.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - mean_x;
        (num + dx * (y - mean_y), den + dx * dx)
    });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

impl ProjectionModel for LinearTrendModel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn project(&self, ctx: &ModelContext<'_>) -> Result<ModelOutput> {
        check_context(ctx)?;
        let start = ctx.closes.len().saturating_sub(self.window);
        let slope = least_squares_slope(&ctx.closes[start..]);
        let points = extrapolate(ctx, slope);
        let confidence = line_confidence(&ctx.closes[start..]);
        Ok(ModelOutput { model_id: Self::ID.to_string(), points, confidence })
    }
}

// =============================================================================
// EMA drift
// =============================================================================

/// Fast/slow EMA spread, spread over the slow period as a per-step drift.
#[derive(Debug, Clone)]
pub struct EmaDriftModel {
    fast: usize,
    slow: usize,
}

impl EmaDriftModel {
    pub const ID: &'static str = "ema_drift";

    pub fn new(fast: usize, slow: usize) -> Self {
        let fast = fast.max(1);
        Self { fast, slow: slow.max(fast + 1) }
    }
}

impl Default for EmaDriftModel {
    fn default() -> Self {
        Self::new(6, 24)
    }
}

impl ProjectionModel for EmaDriftModel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn project(&self, ctx: &ModelContext<'_>) -> Result<ModelOutput> {
        check_context(ctx)?;
        let mut fast = Ema::new(self.fast);
        let mut slow = Ema::new(self.slow);
        for &c in ctx.closes {
            fast.update(c);
            slow.update(c);
        }
        let drift = (fast.get() - slow.get()) / self.slow as f64;
        let points = extrapolate(ctx, drift);
        let spread = (fast.get() - slow.get()).abs() / ctx.last_price;
        let confidence = (1.0 / (1.0 + spread * 100.0)).clamp(0.0, 1.0);
        Ok(ModelOutput { model_id: Self::ID.to_string(), points, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProjectionError;

    fn ctx(closes: &[f64], steps: usize) -> ModelContext<'_> {
        ModelContext { closes, last_price: *closes.last().unwrap_or(&0.0), steps, decimals: 4 }
    }

    #[test]
    fn test_ema() {
        let mut ema = Ema::new(10);
        for i in 1..=20 {
            ema.update(i as f64);
        }
        assert!(ema.get() > 10.0 && ema.get() < 20.0);
    }

    #[test]
    fn test_slope_of_line() {
        let ys: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        assert!((least_squares_slope(&ys) - 2.0).abs() < 1e-12);
        assert_eq!(least_squares_slope(&[5.0]), 0.0);
    }

    #[test]
    fn test_linear_extends_trend() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let out = LinearTrendModel::new(10).project(&ctx(&closes, 3)).unwrap();
        assert_eq!(out.points, vec![120.0, 121.0, 122.0]);
    }

    #[test]
    fn test_linear_floor() {
        let closes: Vec<f64> = (0..10).map(|i| 10.0 - i as f64).collect();
        let out = LinearTrendModel::new(10).project(&ctx(&closes, 5)).unwrap();
        assert!(out.points.iter().all(|p| *p >= PRICE_FLOOR));
        assert_eq!(*out.points.last().unwrap(), PRICE_FLOOR);
    }

    #[test]
    fn test_ema_drift_flat_history() {
        let closes = vec![50.0; 30];
        let out = EmaDriftModel::default().project(&ctx(&closes, 4)).unwrap();
        assert_eq!(out.points, vec![50.0; 4]);
        assert_eq!(out.confidence, 1.0);
    }

    #[test]
    fn test_empty_history_rejected() {
        let err = LinearTrendModel::new(5).project(&ctx(&[], 3));
        assert_eq!(err, Err(ProjectionError::Domain(DomainError::EmptyHistory)));
    }
}
