//! Offline run: project from a CSV of bars, holding back the last `STEPS`
//! closes to score every line, model and the ensemble against them.
//!
//! Usage: project_csv <file.csv> [symbol]

use std::path::Path;

use anyhow::{anyhow, Result};
use projectionfx::config::Config;
use projectionfx::ensemble::{AccuracyBook, EnsembleCombiner};
use projectionfx::feed::csv::load_rows;
use projectionfx::feed::sanitize_history;
use projectionfx::models::{EmaDriftModel, LinearTrendModel};
use projectionfx::session::{ProjectionSession, ENSEMBLE_ID};
use projectionfx::validation::{validate, validate_outputs};
use serde_json::json;

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: project_csv <file.csv> [symbol]"))?;
    let cfg = Config::from_env();
    let symbol = std::env::args().nth(2).unwrap_or_else(|| cfg.symbol.clone());

    let (candles, dropped) = sanitize_history(load_rows(Path::new(&path))?)?;
    let closes: Vec<f64> = candles.iter().map(|c| c.c).collect();
    let params = cfg.params();
    if closes.len() <= params.steps {
        return Err(anyhow!(
            "need more than {} bars to hold out {}, got {}",
            params.steps,
            params.steps,
            closes.len()
        ));
    }
    let (train, holdout) = closes.split_at(closes.len() - params.steps);

    let session = ProjectionSession::new(
        &symbol,
        &cfg.interval,
        params,
        EnsembleCombiner::new(AccuracyBook::new(cfg.accuracy_window)),
    )?
    .with_model(Box::new(LinearTrendModel::new(cfg.trend_window)))
    .with_model(Box::new(EmaDriftModel::default()));

    let run = session.compute(train)?;
    let models = validate_outputs(&run.outputs, holdout, None);
    let ensemble = validate(&run.ensemble.points, holdout);

    let report = json!({
        "symbol": symbol,
        "bars": candles.len(),
        "dropped": dropped,
        "params_hash": session.params_hash(),
        "last_price": run.last_price,
        "holdout": holdout,
        ENSEMBLE_ID: {
            "points": run.ensemble.points,
            "confidence": run.ensemble.confidence,
            "weights": run.ensemble.contributions,
            "validation": ensemble,
        },
        "models": models
            .iter()
            .map(|(id, outcome)| json!({ "id": id, "validation": outcome }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
