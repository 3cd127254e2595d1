//! Persists request log records to a SQLite database, enabled by
//! `ENABLE_SQLITE_LOGGING`/`DATABASE_PATH`.

use async_trait::async_trait;
use gateway_core::logging::{RequestLogRecord, RequestLogSink};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// A [`RequestLogSink`] backed by a SQLite database file.
pub struct SqliteLogSink {
    pool: SqlitePool,
}

impl SqliteLogSink {
    /// Open (creating if absent) the database at `path` and ensure the
    /// `request_logs` table exists.
    pub async fn connect(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS request_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                backend TEXT NOT NULL,
                decision_reason TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                is_fallback INTEGER NOT NULL,
                error TEXT,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RequestLogSink for SqliteLogSink {
    async fn record(&self, record: RequestLogRecord) {
        let result = sqlx::query(
            "INSERT INTO request_logs
                (backend, decision_reason, duration_ms, input_tokens, output_tokens, cost_usd, is_fallback, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.backend)
        .bind(&record.decision_reason)
        .bind(record.duration_ms as i64)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.cost_usd)
        .bind(record.is_fallback)
        .bind(&record.error)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist request log record");
        }
    }
}
