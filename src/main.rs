use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use projectionfx::config::Config;
use projectionfx::ensemble::{AccuracyBook, EnsembleCombiner};
use projectionfx::feed::http::HttpPriceSource;
use projectionfx::feed::{interval_secs, PriceSource};
use projectionfx::logging::{log, obj, v_num, v_str, Domain, Level};
use projectionfx::models::{EmaDriftModel, LinearTrendModel};
use projectionfx::session::{ProjectionRun, ProjectionSession, RefreshOutcome, SessionRefresh};
use projectionfx::snapshot::ProjectionSnapshot;
use projectionfx::storage::SnapshotStore;
use projectionfx::validation::ValidationOutcome;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

fn now_ts() -> u64 {
    Utc::now().timestamp() as u64
}

fn take_trigger(path: &str) -> bool {
    let p = Path::new(path);
    p.exists() && std::fs::remove_file(p).is_ok()
}

fn on_completed(
    cfg: &Config,
    session: &ProjectionSession,
    store: &mut SnapshotStore,
    previous: &mut Option<ProjectionRun>,
    refresh: SessionRefresh,
) -> Result<()> {
    if let Some(prev) = previous.as_ref() {
        let report = session.score(prev, &refresh.candles);
        store.record_accuracy(now_ts(), &report.mape_observations())?;
        match &report.ensemble {
            ValidationOutcome::Scored(r) => log(
                Level::Info,
                Domain::Validation,
                "ensemble_scored",
                obj(&[
                    ("symbol", v_str(&cfg.symbol)),
                    ("samples", json!(r.samples)),
                    ("mape", v_num(r.mape)),
                    ("confidence", v_num(r.confidence)),
                ]),
            ),
            ValidationOutcome::NoData => log(
                Level::Info,
                Domain::Validation,
                "no_data",
                obj(&[("symbol", v_str(&cfg.symbol)), ("status", v_str("no_data"))]),
            ),
        }
    }

    let step_secs = interval_secs(&cfg.interval).unwrap_or(3600);
    let snap = ProjectionSnapshot::from_run(
        &cfg.symbol,
        &cfg.interval,
        step_secs,
        &refresh.candles,
        &refresh.run,
        session.params(),
        now_ts(),
    );
    store.save(&snap)?;
    *previous = Some(refresh.run);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let mut store = SnapshotStore::new(&cfg.sqlite_path)?;
    store.init()?;

    let book = AccuracyBook::new(cfg.accuracy_window);
    let restored = store.load_accuracy(&book)?;
    let session = ProjectionSession::new(&cfg.symbol, &cfg.interval, cfg.params(), EnsembleCombiner::new(book))?
        .with_model(Box::new(LinearTrendModel::new(cfg.trend_window)))
        .with_model(Box::new(EmaDriftModel::default()));
    let session = Arc::new(session);
    let source: Arc<dyn PriceSource> = Arc::new(HttpPriceSource::new(&cfg.price_api_base, cfg.history_limit)?);

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("symbol", v_str(&cfg.symbol)),
            ("interval", v_str(&cfg.interval)),
            ("params_hash", v_str(&session.params_hash())),
            ("accuracy_restored", json!(restored)),
            ("models", json!(session.combiner().model_ids())),
        ]),
    );

    let mut previous: Option<ProjectionRun> = None;
    let mut in_flight: Vec<JoinHandle<Result<RefreshOutcome>>> = Vec::new();
    let mut next_refresh = 0u64;

    loop {
        if Path::new(&cfg.kill_file).exists() {
            log(Level::Info, Domain::System, "shutdown", obj(&[("reason", v_str("kill_file"))]));
            break;
        }

        let now = now_ts();
        let manual = take_trigger(&cfg.refresh_file);
        if manual || now >= next_refresh {
            // Older tasks keep running but will come back superseded.
            let s = session.clone();
            let src = source.clone();
            in_flight.push(tokio::spawn(async move { s.refresh(src.as_ref()).await }));
            next_refresh = now + cfg.refresh_secs;
            log(
                Level::Debug,
                Domain::Session,
                "refresh_started",
                obj(&[("trigger", v_str(if manual { "manual" } else { "timer" }))]),
            );
        }

        let (done, pending): (Vec<_>, Vec<_>) = in_flight.drain(..).partition(|h| h.is_finished());
        in_flight = pending;
        for handle in done {
            match handle.await {
                Ok(Ok(RefreshOutcome::Completed(refresh))) => {
                    if let Err(err) = on_completed(&cfg, &session, &mut store, &mut previous, *refresh) {
                        log(Level::Error, Domain::Storage, "persist_failed", obj(&[("error", v_str(&err.to_string()))]));
                    }
                }
                Ok(Ok(RefreshOutcome::Superseded { .. })) => {}
                Ok(Err(err)) => log(Level::Error, Domain::Session, "refresh_failed", obj(&[("error", v_str(&err.to_string()))])),
                Err(err) => log(Level::Error, Domain::Session, "refresh_panicked", obj(&[("error", v_str(&err.to_string()))])),
            }
        }

        sleep(Duration::from_secs(1)).await;
    }

    for handle in in_flight {
        handle.abort();
    }
    Ok(())
}
