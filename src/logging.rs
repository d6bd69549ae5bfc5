//! Structured JSONL logging for the projection pipeline.
//!
//! Every record is one JSON object carrying the run id, a sequence number,
//! level, domain and event name. Records go to stdout and, unless
//! `LOG_DIR=off`, to a per-run directory:
//!
//! - `events.jsonl`  info and above
//! - `trace.jsonl`   trace and debug
//! - `metrics.jsonl` any event named `metrics.*`
//!
//! `LOG_LEVEL`, `LOG_DOMAINS`, `LOG_DIR`, `RUN_ID` and `LOG_STDOUT` are read
//! once, on the first record.

use std::collections::HashSet;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

// =============================================================================
// Levels and domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,     // history, quotes, retries
    Projection, // triad lines and runs
    Ensemble,   // weighting
    Validation,
    Session, // tickets, supersession
    Storage,
    System, // startup, shutdown, loop control
    Profile,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Projection => "projection",
            Domain::Ensemble => "ensemble",
            Domain::Validation => "validation",
            Domain::Session => "session",
            Domain::Storage => "storage",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }
}

/// Which records pass. `None` domains means all of them.
#[derive(Debug, Clone, PartialEq)]
struct Filter {
    min_level: Level,
    domains: Option<HashSet<String>>,
}

impl Filter {
    fn parse(level: Option<&str>, domains: Option<&str>) -> Self {
        let min_level = level.and_then(|l| l.parse().ok()).unwrap_or(Level::Info);
        let domains = domains
            .filter(|d| d.trim() != "all" && !d.trim().is_empty())
            .map(|d| d.split(',').map(|s| s.trim().to_string()).collect());
        Self { min_level, domains }
    }

    fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level
            && self
                .domains
                .as_ref()
                .map_or(true, |set| set.contains(domain.as_str()))
    }
}

// =============================================================================
// Sinks
// =============================================================================

type Sink = Option<Mutex<BufWriter<File>>>;

struct Logger {
    run_id: String,
    filter: Filter,
    seq: AtomicU64,
    events: Sink,
    trace: Sink,
    metrics: Sink,
    echo: bool,
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

fn open_sink(dir: &Path, name: &str) -> Sink {
    let path = dir.join(name);
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] cannot create {}: {}", path.display(), err);
            None
        }
    }
}

fn logger() -> &'static Logger {
    LOGGER.get_or_init(|| {
        let env = |k: &str| std::env::var(k).ok();
        let run_id = env("RUN_ID").unwrap_or_else(|| format!("p-{}-{}", ts_epoch_ms(), std::process::id()));
        let filter = Filter::parse(env("LOG_LEVEL").as_deref(), env("LOG_DOMAINS").as_deref());
        let echo = env("LOG_STDOUT").map_or(true, |v| v != "0");

        let base = env("LOG_DIR").unwrap_or_else(|| "out/runs".to_string());
        let dir = (base != "off").then(|| PathBuf::from(base).join(&run_id));
        if let Some(dir) = &dir {
            if let Err(err) = create_dir_all(dir) {
                eprintln!("[log] cannot create run dir {}: {}", dir.display(), err);
            }
        }
        let sink = |name: &str| dir.as_deref().and_then(|d| open_sink(d, name));

        Logger {
            events: sink("events.jsonl"),
            trace: sink("trace.jsonl"),
            metrics: sink("metrics.jsonl"),
            seq: AtomicU64::new(0),
            run_id,
            filter,
            echo,
        }
    })
}

fn write_line(sink: &Sink, line: &str) {
    if let Some(Ok(mut w)) = sink.as_ref().map(Mutex::lock) {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Serialize)]
struct Record<'a> {
    ts: String,
    run_id: &'a str,
    seq: u64,
    lvl: Level,
    domain: &'static str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<Value>,
    data: Map<String, Value>,
}

/// RFC3339 with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Emit one record if the level and domain pass the filter.
pub fn log(level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) {
    let lg = logger();
    if !lg.filter.allows(level, domain) {
        return;
    }
    // Correlation keys sit beside `data` so they can be grepped directly.
    let record = Record {
        ts: ts_now(),
        run_id: &lg.run_id,
        seq: lg.seq.fetch_add(1, Ordering::Relaxed),
        lvl: level,
        domain: domain.as_str(),
        event,
        symbol: fields.remove("symbol"),
        model: fields.remove("model"),
        data: fields,
    };
    let Ok(line) = serde_json::to_string(&record) else {
        return;
    };

    if event.starts_with("metrics.") {
        write_line(&lg.metrics, &line);
    }
    if level <= Level::Debug {
        write_line(&lg.trace, &line);
    } else {
        write_line(&lg.events, &line);
    }
    if lg.echo {
        println!("{}", line);
    }
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Non-finite numbers become `null`.
pub fn v_num(n: f64) -> Value {
    json!(n)
}

/// Short stable fingerprint of a parameter set, for correlating runs.
pub fn params_hash(canonical: &str) -> String {
    hex::encode(&Sha256::digest(canonical.as_bytes())[..8])
}

// =============================================================================
// Domain helpers
// =============================================================================

pub fn log_history_loaded(symbol: &str, interval: &str, kept: usize, dropped: usize) {
    let level = if dropped > 0 { Level::Warn } else { Level::Debug };
    log(
        level,
        Domain::Market,
        "history_loaded",
        obj(&[
            ("symbol", v_str(symbol)),
            ("interval", v_str(interval)),
            ("kept", json!(kept)),
            ("dropped", json!(dropped)),
        ]),
    );
}

pub fn log_projection_line(model: &str, steps: usize, first: f64, last: f64, confidence: f64) {
    log(
        Level::Trace,
        Domain::Projection,
        "line",
        obj(&[
            ("model", v_str(model)),
            ("steps", json!(steps)),
            ("first", v_num(first)),
            ("last", v_num(last)),
            ("confidence", v_num(confidence)),
        ]),
    );
}

pub fn log_run(symbol: &str, params_hash: &str, lines: usize, ensemble_last: f64, confidence: f64) {
    log(
        Level::Info,
        Domain::Projection,
        "metrics.run",
        obj(&[
            ("symbol", v_str(symbol)),
            ("params_hash", v_str(params_hash)),
            ("lines", json!(lines)),
            ("ensemble_last", v_num(ensemble_last)),
            ("confidence", v_num(confidence)),
        ]),
    );
}

pub fn log_validation(model: &str, samples: usize, mae: f64, rmse: f64, mape: f64, bias: f64) {
    log(
        Level::Info,
        Domain::Validation,
        "metrics.validation",
        obj(&[
            ("model", v_str(model)),
            ("samples", json!(samples)),
            ("mae", v_num(mae)),
            ("rmse", v_num(rmse)),
            ("mape", v_num(mape)),
            ("bias", v_num(bias)),
        ]),
    );
}

pub fn log_superseded(symbol: &str, ticket: u64, current: u64) {
    log(
        Level::Info,
        Domain::Session,
        "superseded",
        obj(&[
            ("symbol", v_str(symbol)),
            ("ticket", json!(ticket)),
            ("current", json!(current)),
        ]),
    );
}

// =============================================================================
// Profiling
// =============================================================================

/// Logs elapsed wall time under `Domain::Profile` when dropped.
pub struct ProfileScope {
    label: &'static str,
    fields: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self { label, fields: obj(fields), started: Instant::now() }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let mut fields = std::mem::take(&mut self.fields);
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_us".to_string(), json!(self.started.elapsed().as_micros() as u64));
        log(Level::Trace, Domain::Profile, "elapsed", fields);
    }
}
