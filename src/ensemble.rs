//! Ensemble combiner: merges model trajectories into one weighted forecast.
//!
//! Weights come from each model's rolling accuracy history. The combiner never
//! fails on bad input: no outputs gives an empty result, and a degenerate
//! weight total falls back to equal weighting.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ProjectionError, Result};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub const DEFAULT_ACCURACY_WINDOW: usize = 20;

// =============================================================================
// Model strategy interface
// =============================================================================

/// What a model sees when asked for a forecast.
#[derive(Debug, Clone)]
pub struct ModelContext<'a> {
    pub closes: &'a [f64],
    pub last_price: f64,
    pub steps: usize,
    pub decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub model_id: String,
    pub points: Vec<f64>,
    pub confidence: f64,
}

/// A forecasting model the host registers with the combiner.
pub trait ProjectionModel: Send + Sync {
    fn id(&self) -> &str;
    fn project(&self, ctx: &ModelContext<'_>) -> Result<ModelOutput>;
}

// =============================================================================
// Accuracy history
// =============================================================================

#[derive(Debug, Clone)]
struct ErrorWindow {
    max_size: usize,
    values: VecDeque<f64>,
}

impl ErrorWindow {
    fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            values: VecDeque::with_capacity(max_size.max(1)),
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() >= self.max_size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    // Summed fresh on each read; a running total keeps the residue of evicted
    // large values.
    fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }
}

/// Per-model rolling MAPE history. Every read-compute-write happens under one
/// lock so concurrent recorders cannot interleave.
#[derive(Debug)]
pub struct AccuracyBook {
    window: usize,
    inner: Mutex<HashMap<String, ErrorWindow>>,
}

impl Default for AccuracyBook {
    fn default() -> Self {
        Self::new(DEFAULT_ACCURACY_WINDOW)
    }
}

impl AccuracyBook {
    pub fn new(window: usize) -> Self {
        Self { window, inner: Mutex::new(HashMap::new()) }
    }

    /// Record one MAPE observation. Non-finite or negative values are ignored.
    pub fn record(&self, model_id: &str, mape: f64) {
        if !mape.is_finite() || mape < 0.0 {
            return;
        }
        if let Ok(mut map) = self.inner.lock() {
            let window = self.window;
            map.entry(model_id.to_string())
                .or_insert_with(|| ErrorWindow::new(window))
                .push(mape);
        }
    }

    pub fn mean_error(&self, model_id: &str) -> Option<f64> {
        self.inner
            .lock()
            .ok()
            .and_then(|map| map.get(model_id).and_then(ErrorWindow::mean))
    }

    pub fn observations(&self, model_id: &str) -> usize {
        self.inner
            .lock()
            .map(|map| map.get(model_id).map(|w| w.values.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Normalized weights for `ids`, in the same order.
    pub fn weights(&self, ids: &[&str]) -> Vec<f64> {
        let means: Vec<Option<f64>> = match self.inner.lock() {
            Ok(map) => ids
                .iter()
                .map(|id| map.get(*id).and_then(ErrorWindow::mean))
                .collect(),
            Err(_) => vec![None; ids.len()],
        };
        match normalized_weights(&means) {
            Ok(w) => w,
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Ensemble,
                    "weights_fallback",
                    obj(&[("error", v_str(&err.to_string())), ("models", json!(ids.len()))]),
                );
                equal_weights(ids.len())
            }
        }
    }
}

fn equal_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        Vec::new()
    } else {
        vec![1.0 / n as f64; n]
    }
}

/// Raw weight is 1 / (1 + mean error). Models without history borrow the mean
/// raw weight of those with one.
fn normalized_weights(mean_errors: &[Option<f64>]) -> Result<Vec<f64>> {
    if mean_errors.is_empty() {
        return Ok(Vec::new());
    }
    let known: Vec<f64> = mean_errors
        .iter()
        .flatten()
        .map(|e| 1.0 / (1.0 + e.max(0.0)))
        .collect();
    if known.is_empty() {
        return Ok(equal_weights(mean_errors.len()));
    }
    let fill = known.iter().sum::<f64>() / known.len() as f64;
    let raw: Vec<f64> = mean_errors
        .iter()
        .map(|e| e.map(|e| 1.0 / (1.0 + e.max(0.0))).unwrap_or(fill))
        .collect();
    let total: f64 = raw.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(ProjectionError::Computation(format!(
            "ensemble weight total {} is not usable",
            total
        )));
    }
    Ok(raw.into_iter().map(|w| w / total).collect())
}

// =============================================================================
// Combination
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub points: Vec<f64>,
    pub confidence: f64,
    pub contributions: BTreeMap<String, f64>,
}

impl EnsembleResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.contributions.is_empty()
    }
}

/// Weighted merge of `outputs` with explicit `weights` (same order).
///
/// Each index averages only the models that reach it, renormalizing by the
/// weight present there. Indices no model reaches are 0.
pub fn combine_weighted(outputs: &[ModelOutput], weights: &[f64]) -> EnsembleResult {
    if outputs.is_empty() || outputs.len() != weights.len() {
        return EnsembleResult::empty();
    }
    let len = outputs.iter().map(|o| o.points.len()).max().unwrap_or(0);

    let points = (0..len)
        .map(|i| {
            let (num, den) = outputs
                .iter()
                .zip(weights)
                .filter_map(|(o, w)| o.points.get(i).map(|p| (p * w, *w)))
                .fold((0.0, 0.0), |(n, d), (pw, w)| (n + pw, d + w));
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        })
        .collect();

    let confidence = outputs
        .iter()
        .zip(weights)
        .map(|(o, w)| o.confidence.clamp(0.0, 1.0) * w)
        .sum::<f64>()
        .clamp(0.0, 1.0);

    let mut contributions = BTreeMap::new();
    for (o, w) in outputs.iter().zip(weights) {
        *contributions.entry(o.model_id.clone()).or_insert(0.0) += *w;
    }

    EnsembleResult { points, confidence, contributions }
}

/// Holds the model registry and the accuracy book that drives weighting.
pub struct EnsembleCombiner {
    models: Vec<Box<dyn ProjectionModel>>,
    accuracy: AccuracyBook,
}

impl Default for EnsembleCombiner {
    fn default() -> Self {
        Self::new(AccuracyBook::default())
    }
}

impl EnsembleCombiner {
    pub fn new(accuracy: AccuracyBook) -> Self {
        Self { models: Vec::new(), accuracy }
    }

    pub fn register(&mut self, model: Box<dyn ProjectionModel>) {
        self.models.push(model);
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id()).collect()
    }

    pub fn accuracy(&self) -> &AccuracyBook {
        &self.accuracy
    }

    /// Merge pre-computed outputs using accuracy-derived weights.
    pub fn combine(&self, outputs: &[ModelOutput]) -> EnsembleResult {
        if outputs.is_empty() {
            return EnsembleResult::empty();
        }
        let ids: Vec<&str> = outputs.iter().map(|o| o.model_id.as_str()).collect();
        let weights = self.accuracy.weights(&ids);
        let result = combine_weighted(outputs, &weights);
        log(
            Level::Debug,
            Domain::Ensemble,
            "combined",
            obj(&[
                ("models", json!(outputs.len())),
                ("points", json!(result.points.len())),
                ("confidence", v_num(result.confidence)),
            ]),
        );
        result
    }

    /// Run every registered model, then merge with `extra` outputs.
    pub fn run(&self, ctx: &ModelContext<'_>, extra: Vec<ModelOutput>) -> EnsembleResult {
        self.combine(&self.collect(ctx, extra))
    }

    /// `extra` followed by the output of every registered model. Models that
    /// fail are skipped with a warning.
    pub fn collect(&self, ctx: &ModelContext<'_>, extra: Vec<ModelOutput>) -> Vec<ModelOutput> {
        let mut outputs = extra;
        for model in &self.models {
            match model.project(ctx) {
                Ok(out) => outputs.push(out),
                Err(err) => log(
                    Level::Warn,
                    Domain::Ensemble,
                    "model_skipped",
                    obj(&[("model", v_str(model.id())), ("error", v_str(&err.to_string()))]),
                ),
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(id: &str, points: &[f64], confidence: f64) -> ModelOutput {
        ModelOutput { model_id: id.to_string(), points: points.to_vec(), confidence }
    }

    #[test]
    fn test_empty_is_empty() {
        let c = EnsembleCombiner::default();
        let r = c.combine(&[]);
        assert!(r.is_empty());
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_equal_weights_without_history() {
        let c = EnsembleCombiner::default();
        let r = c.combine(&[out("a", &[10.0, 20.0], 0.5), out("b", &[30.0, 40.0], 1.0)]);
        assert_eq!(r.points, vec![20.0, 30.0]);
        assert!((r.confidence - 0.75).abs() < 1e-12);
        assert!((r.contributions["a"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ragged_lengths() {
        let r = combine_weighted(
            &[out("a", &[10.0, 20.0, 30.0], 1.0), out("b", &[20.0], 1.0)],
            &[0.5, 0.5],
        );
        assert_eq!(r.points, vec![15.0, 20.0, 30.0]);
    }

    #[test]
    fn test_lower_error_gets_more_weight() {
        let book = AccuracyBook::new(5);
        book.record("good", 1.0);
        book.record("bad", 9.0);
        let w = book.weights(&["good", "bad"]);
        assert!(w[0] > w[1]);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_history_borrows_mean() {
        let book = AccuracyBook::new(5);
        book.record("a", 0.0);
        book.record("b", 1.0);
        let w = book.weights(&["a", "b", "new"]);
        // raw: 1.0, 0.5, fill 0.75
        assert!((w[2] - 0.75 / 2.25).abs() < 1e-12);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window_drops_old() {
        let book = AccuracyBook::new(2);
        book.record("m", 10.0);
        book.record("m", 2.0);
        book.record("m", 4.0);
        assert_eq!(book.observations("m"), 2);
        assert_eq!(book.mean_error("m"), Some(3.0));
        book.record("m", f64::NAN);
        assert_eq!(book.observations("m"), 2);
    }

    #[test]
    fn test_evicted_outlier_leaves_no_residue() {
        let book = AccuracyBook::new(2);
        book.record("m", 1e17);
        book.record("m", 1.0);
        book.record("m", 1.0);
        assert_eq!(book.mean_error("m"), Some(1.0));
    }

    #[test]
    fn test_concurrent_records_and_weights() {
        let book = AccuracyBook::new(400);
        book.record("other", 1.0);
        std::thread::scope(|scope| {
            for t in 0..8u32 {
                let book = &book;
                scope.spawn(move || {
                    for _ in 0..50 {
                        book.record("m", t as f64);
                    }
                });
            }
            let book = &book;
            scope.spawn(move || {
                for _ in 0..200 {
                    let w = book.weights(&["m", "other"]);
                    assert_eq!(w.len(), 2);
                    assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                }
            });
        });
        assert_eq!(book.observations("m"), 400);
        // 50 * (0 + 1 + ... + 7) / 400
        assert_eq!(book.mean_error("m"), Some(3.5));
    }

    #[test]
    fn test_degenerate_total_is_computation_error() {
        // Infinite error on every model makes all raw weights zero.
        let err = normalized_weights(&[Some(f64::INFINITY), Some(f64::INFINITY)]);
        assert!(matches!(err, Err(ProjectionError::Computation(_))));
    }

    #[test]
    fn test_mismatched_weights_yield_empty() {
        let r = combine_weighted(&[out("a", &[1.0], 1.0)], &[]);
        assert!(r.is_empty());
    }

    struct Fixed(&'static str, f64);

    impl ProjectionModel for Fixed {
        fn id(&self) -> &str {
            self.0
        }
        fn project(&self, ctx: &ModelContext<'_>) -> Result<ModelOutput> {
            if self.1 < 0.0 {
                return Err(ProjectionError::Computation("broken".into()));
            }
            Ok(ModelOutput {
                model_id: self.0.to_string(),
                points: vec![self.1; ctx.steps],
                confidence: 1.0,
            })
        }
    }

    #[test]
    fn test_run_skips_failing_models() {
        let mut c = EnsembleCombiner::default();
        c.register(Box::new(Fixed("flat", 5.0)));
        c.register(Box::new(Fixed("broken", -1.0)));
        let closes = [1.0, 2.0];
        let ctx = ModelContext { closes: &closes, last_price: 2.0, steps: 3, decimals: 4 };
        let r = c.run(&ctx, vec![out("x", &[7.0, 7.0, 7.0], 0.0)]);
        assert_eq!(r.points, vec![6.0, 6.0, 6.0]);
        assert_eq!(r.contributions.len(), 2);
        assert!(!r.contributions.contains_key("broken"));
    }
}
