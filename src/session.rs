//! Projection session: one logical view (symbol + interval + params) and the
//! re-entrancy guard around its refreshes.
//!
//! Every refresh takes a ticket. Starting a new refresh invalidates all older
//! tickets, and a refresh whose ticket is stale when its data arrives drops
//! the result instead of publishing it.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde_json::json;

use crate::ensemble::{EnsembleCombiner, EnsembleResult, ModelContext, ModelOutput, ProjectionModel};
use crate::error::{DomainError, ProjectionError};
use crate::feed::{sanitize_history, sanitize_quote, Candle, PriceSource};
use crate::logging::{
    log, log_history_loaded, log_projection_line, log_run, log_superseded, log_validation, obj, params_hash, v_str,
    Domain, Level, ProfileScope,
};
use crate::primes::PrimeTable;
use crate::projection::{project_lines, ProjectionLine, ProjectionParams};
use crate::validation::{validate, validate_outputs, ValidationOutcome};

pub const ENSEMBLE_ID: &str = "ensemble";

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRun {
    pub lines: Vec<ProjectionLine>,
    /// Line outputs followed by registered model outputs, as weighted.
    pub outputs: Vec<ModelOutput>,
    pub ensemble: EnsembleResult,
    pub last_price: f64,
    /// Timestamp of the last historical bar the run projects from.
    pub anchor_ts: u64,
}

/// Run the full pipeline on closes already in hand.
pub fn compute_run(
    closes: &[f64],
    last_price: f64,
    anchor_ts: u64,
    params: &ProjectionParams,
    combiner: &EnsembleCombiner,
) -> std::result::Result<ProjectionRun, ProjectionError> {
    let _scope = ProfileScope::with_context("compute_run", &[("lines", json!(params.projection_count))]);
    if closes.is_empty() {
        return Err(DomainError::EmptyHistory.into());
    }
    let lines = project_lines(last_price, params, PrimeTable::global())?;

    let line_outputs: Vec<ModelOutput> = lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let id = line.id(idx);
            if let (Some(first), Some(last)) = (line.points.first(), line.points.last()) {
                log_projection_line(&id, line.points.len(), *first, *last, line.confidence);
            }
            ModelOutput { model_id: id, points: line.points.clone(), confidence: line.confidence }
        })
        .collect();

    let ctx = ModelContext {
        closes,
        last_price,
        steps: params.steps,
        decimals: params.decimals,
    };
    let outputs = combiner.collect(&ctx, line_outputs);
    let ensemble = combiner.combine(&outputs);

    Ok(ProjectionRun { lines, outputs, ensemble, last_price, anchor_ts })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRefresh {
    pub ticket: Ticket,
    pub candles: Vec<Candle>,
    pub run: ProjectionRun,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Completed(Box<SessionRefresh>),
    Superseded { ticket: Ticket, current: u64 },
}

pub struct ProjectionSession {
    symbol: String,
    interval: String,
    params: ProjectionParams,
    combiner: EnsembleCombiner,
    generation: AtomicU64,
}

impl ProjectionSession {
    pub fn new(
        symbol: impl Into<String>,
        interval: impl Into<String>,
        params: ProjectionParams,
        combiner: EnsembleCombiner,
    ) -> std::result::Result<Self, ProjectionError> {
        params.validate(PrimeTable::global())?;
        Ok(Self {
            symbol: symbol.into(),
            interval: interval.into(),
            params,
            combiner,
            generation: AtomicU64::new(0),
        })
    }

    pub fn with_model(mut self, model: Box<dyn ProjectionModel>) -> Self {
        self.combiner.register(model);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    pub fn params(&self) -> &ProjectionParams {
        &self.params
    }

    pub fn combiner(&self) -> &EnsembleCombiner {
        &self.combiner
    }

    pub fn params_hash(&self) -> String {
        params_hash(&serde_json::to_string(&self.params).unwrap_or_default())
    }

    /// Start a computation, superseding any in flight.
    pub fn begin(&self) -> Ticket {
        Ticket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    fn superseded(&self, ticket: Ticket) -> RefreshOutcome {
        let current = self.generation.load(Ordering::SeqCst);
        log_superseded(&self.symbol, ticket.0, current);
        RefreshOutcome::Superseded { ticket, current }
    }

    /// Pure computation on closes already in hand; the last close is the seed.
    pub fn compute(&self, closes: &[f64]) -> std::result::Result<ProjectionRun, ProjectionError> {
        let last = *closes.last().ok_or(DomainError::EmptyHistory)?;
        compute_run(closes, last, 0, &self.params, &self.combiner)
    }

    /// Fetch history and quote, project, and publish unless superseded.
    pub async fn refresh(&self, source: &dyn PriceSource) -> Result<RefreshOutcome> {
        let ticket = self.begin();

        let raw = source.history(&self.symbol, &self.interval).await?;
        if !self.is_current(ticket) {
            return Ok(self.superseded(ticket));
        }
        let (candles, dropped) = sanitize_history(raw)?;
        log_history_loaded(&self.symbol, &self.interval, candles.len(), dropped);

        let mut closes: Vec<f64> = candles.iter().map(|c| c.c).collect();
        let anchor_ts = candles.last().map(|c| c.ts).unwrap_or(0);

        // A live quote overrides the last close; without one the close stands.
        match source.quote(&self.symbol).await.and_then(|q| sanitize_quote(q).map_err(anyhow::Error::from)) {
            Ok(quote) => {
                if let Some(last) = closes.last_mut() {
                    *last = quote.price;
                }
            }
            Err(err) => log(
                Level::Warn,
                Domain::Market,
                "quote_unavailable",
                obj(&[("symbol", v_str(&self.symbol)), ("error", v_str(&err.to_string()))]),
            ),
        }
        if !self.is_current(ticket) {
            return Ok(self.superseded(ticket));
        }

        let last_price = *closes.last().ok_or(ProjectionError::from(DomainError::EmptyHistory))?;
        let run = compute_run(&closes, last_price, anchor_ts, &self.params, &self.combiner)?;
        if !self.is_current(ticket) {
            return Ok(self.superseded(ticket));
        }

        log_run(
            &self.symbol,
            &self.params_hash(),
            run.lines.len(),
            run.ensemble.points.last().copied().unwrap_or(0.0),
            run.ensemble.confidence,
        );
        Ok(RefreshOutcome::Completed(Box::new(SessionRefresh { ticket, candles, run })))
    }

    /// Score `previous` against closes realized after its anchor and feed each
    /// model's MAPE into the accuracy book.
    pub fn score(&self, previous: &ProjectionRun, candles: &[Candle]) -> ScoreReport {
        let realized: Vec<f64> = candles
            .iter()
            .filter(|c| c.ts > previous.anchor_ts)
            .map(|c| c.c)
            .collect();
        let models = validate_outputs(&previous.outputs, &realized, Some(self.combiner.accuracy()));
        let ensemble = validate(&previous.ensemble.points, &realized);
        if let ValidationOutcome::Scored(r) = &ensemble {
            log_validation(ENSEMBLE_ID, r.samples, r.mae, r.rmse, r.mape, r.bias);
        }
        ScoreReport { ensemble, models }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub ensemble: ValidationOutcome,
    pub models: Vec<(String, ValidationOutcome)>,
}

impl ScoreReport {
    /// (model, MAPE) for every model that had data to score.
    pub fn mape_observations(&self) -> Vec<(String, f64)> {
        self.models
            .iter()
            .filter_map(|(id, o)| o.result().map(|r| (id.clone(), r.mape)))
            .collect()
    }
}
