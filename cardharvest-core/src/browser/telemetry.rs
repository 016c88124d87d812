use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::error::BrowserError;

/// Coarse classification stored with every ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureCategory {
    NavigationTimeout,
    Network,
    RateLimited,
    SetNotFound,
    AccessDenied,
    Authentication,
    Unexpected,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::NavigationTimeout => "navigation_timeout",
            FailureCategory::Network => "network",
            FailureCategory::RateLimited => "rate_limited",
            FailureCategory::SetNotFound => "set_not_found",
            FailureCategory::AccessDenied => "access_denied",
            FailureCategory::Authentication => "authentication",
            FailureCategory::Unexpected => "unexpected",
        }
    }
}

pub fn categorize(error: &BrowserError) -> FailureCategory {
    match error {
        BrowserError::Timeout(_) => FailureCategory::NavigationTimeout,
        BrowserError::Network(message) => {
            let lower = message.to_lowercase();
            if lower.contains("429") || lower.contains("too many") || lower.contains("rate limit") {
                FailureCategory::RateLimited
            } else {
                FailureCategory::Network
            }
        }
        BrowserError::Cdp(err) => {
            let text = err.to_string().to_lowercase();
            if text.contains("timeout") || text.contains("timed out") {
                FailureCategory::NavigationTimeout
            } else if text.contains("net::") {
                FailureCategory::Network
            } else {
                FailureCategory::Unexpected
            }
        }
        BrowserError::Io(_) => FailureCategory::Network,
        _ => FailureCategory::Unexpected,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RemediationAction {
    RetryScheduled { delay_seconds: u64 },
    Abort,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub category: FailureCategory,
    pub error_message: String,
    pub attempt: usize,
    pub action: RemediationAction,
}

impl FailureRecord {
    pub fn new(
        url: &str,
        category: FailureCategory,
        error_message: String,
        attempt: usize,
        action: RemediationAction,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            url: url.to_string(),
            category,
            error_message,
            attempt,
            action,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub operation: String,
    pub sets_ok: usize,
    pub sets_failed: usize,
    pub duration_ms: i64,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<TelemetryError> for BrowserError {
    fn from(error: TelemetryError) -> Self {
        BrowserError::Telemetry(error.to_string())
    }
}

/// Failure ledger: a JSON-lines file plus a SQLite copy for querying.
#[derive(Debug)]
pub struct HarvestTelemetry {
    log: Mutex<File>,
    log_path: PathBuf,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl HarvestTelemetry {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            log_path,
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS harvest_failures (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                url TEXT,
                category TEXT,
                error_message TEXT,
                attempt INTEGER,
                remediation TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_harvest_failures_ts ON harvest_failures(ts DESC);
            CREATE TABLE IF NOT EXISTS harvest_runs (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                run_id TEXT,
                operation TEXT,
                sets_ok INTEGER,
                sets_failed INTEGER,
                duration_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_harvest_runs_ts ON harvest_runs(ts DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record_failure(&self, failure: &FailureRecord) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(failure)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO harvest_failures (url, category, error_message, attempt, remediation)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                failure.url,
                failure.category.as_str(),
                failure.error_message,
                failure.attempt as i64,
                format!("{:?}", failure.action),
            ],
        )?;
        Ok(())
    }

    pub fn record_run(&self, run: &RunRecord) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO harvest_runs (run_id, operation, sets_ok, sets_failed, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.run_id.to_string(),
                run.operation,
                run.sets_ok as i64,
                run.sets_failed as i64,
                run.duration_ms,
            ],
        )?;
        Ok(())
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Writes one failure; ledger problems are logged and swallowed.
pub fn note_failure(telemetry: Option<&HarvestTelemetry>, failure: FailureRecord) {
    let Some(telemetry) = telemetry else {
        return;
    };
    if let Err(err) = telemetry.record_failure(&failure) {
        tracing::warn!(error = %err, url = %failure.url, "failed to write failure ledger");
    }
}

pub fn note_run(telemetry: Option<&HarvestTelemetry>, run: RunRecord) {
    let Some(telemetry) = telemetry else {
        return;
    };
    if let Err(err) = telemetry.record_run(&run) {
        tracing::warn!(error = %err, operation = %run.operation, "failed to write run ledger");
    }
}
