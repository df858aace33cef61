use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::alert::Alert;
use crate::config::{SinkKind, SinkSettings};

/// Destination for alerts. Implementations need not be thread-safe;
/// wrap them in a [`SharedAlertSink`] to share across sources.
pub trait AlertSink: Send {
    fn deliver(&mut self, alert: &Alert) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects alerts in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAlertSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.alerts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for InMemoryAlertSink {
    fn deliver(&mut self, alert: &Alert) -> Result<()> {
        self.alerts
            .lock()
            .map_err(|_| anyhow!("in-memory alert sink poisoned"))?
            .push(alert.clone());
        Ok(())
    }
}

/// Writes each alert as one `warn!` line.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn deliver(&mut self, alert: &Alert) -> Result<()> {
        log::warn!("ALERT {}", alert.summary());
        Ok(())
    }
}

/// Newline-delimited JSON, one alert per line.
pub struct JsonLinesAlertSink<W: Write + Send> {
    out: W,
}

impl JsonLinesAlertSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow!("open alert log {}: {}", path.display(), e))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> JsonLinesAlertSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> AlertSink for JsonLinesAlertSink<W> {
    fn deliver(&mut self, alert: &Alert) -> Result<()> {
        serde_json::to_writer(&mut self.out, alert)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Alerts keyed by (source, alert id). A closing update overwrites the row it closes.
pub struct SqliteAlertSink {
    conn: Connection,
}

impl SqliteAlertSink {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut sink = Self { conn };
        sink.ensure_schema()?;
        Ok(sink)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut sink = Self {
            conn: Connection::open_in_memory()?,
        };
        sink.ensure_schema()?;
        Ok(sink)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS alerts (
              source_id TEXT NOT NULL,
              alert_id INTEGER NOT NULL,
              kind TEXT NOT NULL,
              started_at REAL NOT NULL,
              raised_at REAL NOT NULL,
              ended_at REAL,
              payload_json TEXT NOT NULL,
              PRIMARY KEY (source_id, alert_id)
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_raised ON alerts(raised_at);
            "#,
        )?;
        Ok(())
    }

    /// Stored alerts in (source, id) order.
    pub fn read_alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        let payloads = {
            let mut stmt = self.conn.prepare(
                "SELECT payload_json FROM alerts ORDER BY source_id ASC, alert_id ASC LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut payloads = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: String = row.get(0)?;
                payloads.push(payload);
            }
            payloads
        };

        let mut out = Vec::with_capacity(payloads.len());
        for payload in payloads {
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }
}

impl AlertSink for SqliteAlertSink {
    fn deliver(&mut self, alert: &Alert) -> Result<()> {
        let alert_id =
            i64::try_from(alert.id).map_err(|_| anyhow!("alert id {} exceeds i64 range", alert.id))?;
        let payload_json = serde_json::to_string(alert)?;
        self.conn.execute(
            r#"
            INSERT INTO alerts(source_id, alert_id, kind, started_at, raised_at, ended_at, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(source_id, alert_id) DO UPDATE SET
              ended_at = excluded.ended_at,
              payload_json = excluded.payload_json
            "#,
            params![
                alert.source_id,
                alert_id,
                alert.kind.as_str(),
                alert.started_at,
                alert.raised_at,
                alert.ended_at,
                payload_json
            ],
        )?;
        Ok(())
    }
}

/// Serialises deliveries from several source workers into one sink.
#[derive(Clone)]
pub struct SharedAlertSink {
    inner: Arc<Mutex<Box<dyn AlertSink>>>,
}

impl SharedAlertSink {
    pub fn new(sink: impl AlertSink + 'static) -> Self {
        Self::from_box(Box::new(sink))
    }

    pub fn from_box(sink: Box<dyn AlertSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    /// Deliver a batch under one lock so a source's alerts stay contiguous.
    pub fn deliver_all(&self, alerts: &[Alert]) -> Result<()> {
        let mut sink = self
            .inner
            .lock()
            .map_err(|_| anyhow!("alert sink lock poisoned"))?;
        for alert in alerts {
            sink.deliver(alert)?;
        }
        sink.flush()
    }

    pub fn flush(&self) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("alert sink lock poisoned"))?
            .flush()
    }
}

impl std::fmt::Debug for SharedAlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedAlertSink").finish_non_exhaustive()
    }
}

/// Build the configured sink.
pub fn open_sink(settings: &SinkSettings) -> Result<SharedAlertSink> {
    let path = settings.path.as_deref();
    let sink: Box<dyn AlertSink> = match (settings.kind, path) {
        (SinkKind::Log, _) => Box::new(LogAlertSink),
        (SinkKind::JsonLines, Some(path)) => Box::new(JsonLinesAlertSink::create(path)?),
        (SinkKind::Sqlite, Some(path)) => Box::new(SqliteAlertSink::open(path)?),
        (kind, None) => return Err(anyhow!("{:?} sink requires a path", kind)),
    };
    log::info!("alert sink: {:?}", settings.kind);
    Ok(SharedAlertSink::from_box(sink))
}
