//! Forecast scoring against realized prices.
//!
//! Only the overlapping prefix of projected and actual is compared. An empty
//! overlap is reported as `NoData` rather than an error so a refresh loop can
//! render a placeholder and keep going.

use serde::{Deserialize, Serialize};

use crate::ensemble::{AccuracyBook, ModelOutput};
use crate::logging::log_validation;

/// z for a two-sided 95% interval.
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub samples: usize,
    pub mae: f64,
    pub rmse: f64,
    /// Percent.
    pub mape: f64,
    pub bias: f64,
    pub error_std_dev: f64,
    pub confidence: f64,
    pub confidence_intervals: Option<Vec<Interval>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    NoData,
    Scored(ValidationResult),
}

impl ValidationOutcome {
    pub fn result(&self) -> Option<&ValidationResult> {
        match self {
            ValidationOutcome::NoData => None,
            ValidationOutcome::Scored(r) => Some(r),
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, ValidationOutcome::NoData)
    }
}

pub fn validate(projected: &[f64], actual: &[f64]) -> ValidationOutcome {
    let n = projected.len().min(actual.len());
    if n == 0 {
        return ValidationOutcome::NoData;
    }
    let projected = &projected[..n];
    let actual = &actual[..n];
    let errors: Vec<f64> = projected.iter().zip(actual).map(|(p, a)| p - a).collect();
    let nf = n as f64;

    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / nf;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / nf).sqrt();
    let bias = errors.iter().sum::<f64>() / nf;

    let pct: Vec<f64> = errors
        .iter()
        .zip(actual)
        .filter(|(_, a)| **a > 0.0)
        .map(|(e, a)| e.abs() / a)
        .collect();
    let mape = if pct.is_empty() {
        0.0
    } else {
        pct.iter().sum::<f64>() / pct.len() as f64 * 100.0
    };

    let error_std_dev = (errors.iter().map(|e| (e - bias).powi(2)).sum::<f64>() / nf).sqrt();

    let scale = actual.iter().map(|a| a.abs()).sum::<f64>() / nf;
    let confidence = if scale > 0.0 {
        (1.0 - error_std_dev / scale).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let confidence_intervals = (n >= 2).then(|| {
        projected
            .iter()
            .map(|p| Interval {
                lower: p - Z_95 * error_std_dev,
                upper: p + Z_95 * error_std_dev,
            })
            .collect()
    });

    ValidationOutcome::Scored(ValidationResult {
        samples: n,
        mae,
        rmse,
        mape,
        bias,
        error_std_dev,
        confidence,
        confidence_intervals,
    })
}

/// Score several model outputs against the same actuals, logging each and
/// feeding MAPE into `book` when one is given.
pub fn validate_outputs(
    outputs: &[ModelOutput],
    actual: &[f64],
    book: Option<&AccuracyBook>,
) -> Vec<(String, ValidationOutcome)> {
    outputs
        .iter()
        .map(|o| {
            let outcome = validate(&o.points, actual);
            if let ValidationOutcome::Scored(r) = &outcome {
                log_validation(&o.model_id, r.samples, r.mae, r.rmse, r.mape, r.bias);
                if let Some(book) = book {
                    book.record(&o.model_id, r.mape);
                }
            }
            (o.model_id.clone(), outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_series_is_perfect() {
        let x = [100.0, 101.5, 99.0];
        let r = validate(&x, &x);
        let r = r.result().unwrap();
        assert_eq!(r.mae, 0.0);
        assert_eq!(r.rmse, 0.0);
        assert_eq!(r.bias, 0.0);
        assert_eq!(r.mape, 0.0);
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn test_empty_is_no_data() {
        assert!(validate(&[], &[1.0, 2.0]).is_no_data());
        assert!(validate(&[1.0], &[]).is_no_data());
    }

    #[test]
    fn test_known_errors() {
        let r = validate(&[110.0, 90.0, 100.0], &[100.0, 100.0]);
        let r = r.result().unwrap();
        assert_eq!(r.samples, 2);
        assert!((r.mae - 10.0).abs() < 1e-12);
        assert!((r.rmse - 10.0).abs() < 1e-12);
        assert!((r.mape - 10.0).abs() < 1e-12);
        assert!(r.bias.abs() < 1e-12);
        assert!((r.error_std_dev - 10.0).abs() < 1e-12);
        assert!((r.confidence - 0.9).abs() < 1e-12);
        let ci = r.confidence_intervals.as_ref().unwrap();
        assert_eq!(ci.len(), 2);
        assert!((ci[0].lower - (110.0 - 19.6)).abs() < 1e-9);
    }

    #[test]
    fn test_constant_bias_has_zero_spread() {
        let r = validate(&[102.0, 103.0], &[100.0, 101.0]);
        let r = r.result().unwrap();
        assert!((r.bias - 2.0).abs() < 1e-12);
        assert!(r.error_std_dev.abs() < 1e-12);
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn test_single_sample_has_no_intervals() {
        let r = validate(&[5.0], &[4.0]);
        assert!(r.result().unwrap().confidence_intervals.is_none());
    }

    #[test]
    fn test_mape_skips_non_positive_actuals() {
        let r = validate(&[1.0, 110.0], &[0.0, 100.0]);
        assert!((r.result().unwrap().mape - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_outputs_feeds_book() {
        let book = AccuracyBook::new(4);
        let outputs = vec![
            ModelOutput { model_id: "a".into(), points: vec![101.0], confidence: 1.0 },
            ModelOutput { model_id: "b".into(), points: vec![], confidence: 1.0 },
        ];
        let scored = validate_outputs(&outputs, &[100.0], Some(&book));
        assert_eq!(scored.len(), 2);
        assert!(scored[1].1.is_no_data());
        assert_eq!(book.observations("a"), 1);
        assert_eq!(book.observations("b"), 0);
    }
}
