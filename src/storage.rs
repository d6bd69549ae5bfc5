use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use serde_json::json;

use crate::ensemble::AccuracyBook;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::snapshot::ProjectionSnapshot;

pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                saved_ts INTEGER NOT NULL,
                params_digest TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS snapshots_symbol ON snapshots (symbol, saved_ts);
            CREATE TABLE IF NOT EXISTS accuracy (
                ts INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                mape REAL NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn save(&mut self, snap: &ProjectionSnapshot) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO snapshots (symbol, interval, saved_ts, params_digest, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snap.symbol,
                snap.interval,
                snap.saved_timestamp as i64,
                snap.digest(),
                snap.to_json()
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        log(
            Level::Debug,
            Domain::Storage,
            "snapshot_saved",
            obj(&[("symbol", v_str(&snap.symbol)), ("id", json!(id)), ("lines", json!(snap.projection_lines.len()))]),
        );
        Ok(id)
    }

    pub fn latest(&self, symbol: &str) -> Result<Option<ProjectionSnapshot>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM snapshots WHERE symbol = ?1 ORDER BY saved_ts DESC, id DESC LIMIT 1",
                params![symbol],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(b) => Ok(Some(ProjectionSnapshot::from_json(&b)?)),
            None => Ok(None),
        }
    }

    pub fn record_accuracy(&mut self, ts: u64, observations: &[(String, f64)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (model_id, mape) in observations {
            tx.execute(
                "INSERT INTO accuracy (ts, model_id, mape) VALUES (?1, ?2, ?3)",
                params![ts as i64, model_id, mape],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replay stored observations into `book` oldest first. Returns the count.
    pub fn load_accuracy(&self, book: &AccuracyBook) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT model_id, mape FROM accuracy ORDER BY ts ASC, rowid ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;
        let mut n = 0;
        for row in rows {
            let (model_id, mape) = row?;
            book.record(&model_id, mape);
            n += 1;
        }
        Ok(n)
    }
}
