//! SQLite table of finalized per-window hit counts.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat};
use hitcrab_core::connector::SinkWriter;
use hitcrab_core::types::EventTime;
use hitcrab_core::window::AggregateRow;
use rusqlite::{Connection, params};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS processed_events_aggregated (
    event_hour TEXT NOT NULL,
    host TEXT NOT NULL,
    num_hits INTEGER NOT NULL,
    PRIMARY KEY (event_hour, host)
)";

const UPSERT: &str = "INSERT INTO processed_events_aggregated (event_hour, host, num_hits)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (event_hour, host) DO UPDATE SET num_hits = excluded.num_hits";

pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite sink {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(CREATE_TABLE, [])
            .context("create processed_events_aggregated")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All rows ordered by `(event_hour, host)`.
    pub fn rows(&self) -> Result<Vec<(String, String, i64)>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("sqlite lock poisoned"))?;
        let mut stmt = conn.prepare(
            "SELECT event_hour, host, num_hits FROM processed_events_aggregated
             ORDER BY event_hour, host",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl SinkWriter for SqliteSink {
    fn upsert(&self, row: &AggregateRow) -> Result<()> {
        let event_hour = format_window_start(row.window_start)?;
        let num_hits = i64::try_from(row.count)
            .with_context(|| format!("count {} does not fit in INTEGER", row.count))?;
        let conn = self.conn.lock().map_err(|_| anyhow!("sqlite lock poisoned"))?;
        conn.execute(UPSERT, params![event_hour, row.host, num_hits])
            .with_context(|| format!("upsert ({event_hour}, {})", row.host))?;
        Ok(())
    }
}

/// Window start as RFC 3339 UTC, e.g. `2024-01-01T00:05:00Z`.
pub fn format_window_start(window_start: EventTime) -> Result<String> {
    let at = DateTime::from_timestamp_millis(window_start)
        .ok_or_else(|| anyhow!("window start {window_start} is out of range"))?;
    Ok(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
#[path = "tests/sink_tests.rs"]
mod tests;
