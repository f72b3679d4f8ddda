//! Sync audit log.
//!
//! One entry per run outcome. Recording never blocks the caller and never
//! fails it: entries go over a channel to a background worker, and sink
//! errors are logged and dropped.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{MergeMode, ProfileKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Succeeded,
    Failed,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Succeeded => "succeeded",
            SyncOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: ProfileKey,
    /// Absent when the run failed before any completion was attempted.
    pub mode: Option<MergeMode>,
    pub outcome: SyncOutcome,
    pub job_id: String,
    pub posts_fetched: usize,
    pub posts_normalized: usize,
    pub posts_added: usize,
    pub posts_updated: usize,
    pub total_posts: usize,
    pub error: Option<String>,
    pub logged_at: DateTime<Utc>,
}

impl SyncLogEntry {
    /// A zeroed entry; callers fill in the counters they know.
    pub fn new(key: ProfileKey, job_id: impl Into<String>, outcome: SyncOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            mode: None,
            outcome,
            job_id: job_id.into(),
            posts_fetched: 0,
            posts_normalized: 0,
            posts_added: 0,
            posts_updated: 0,
            total_posts: 0,
            error: None,
            logged_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &SyncLogEntry) -> Result<()>;
}

enum AuditCommand {
    Append(SyncLogEntry),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background audit worker. Cheap to clone.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditCommand>,
}

impl AuditLog {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    AuditCommand::Append(entry) => {
                        if let Err(e) = sink.append(&entry).await {
                            warn!(
                                platform = %entry.key.platform,
                                handle = %entry.key.handle,
                                job_id = %entry.job_id,
                                error = %e,
                                "Failed to write sync log entry"
                            );
                        }
                    }
                    AuditCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Fire-and-forget.
    pub fn record(&self, entry: SyncLogEntry) {
        if self.tx.send(AuditCommand::Append(entry)).is_err() {
            warn!("Audit worker has stopped; dropping sync log entry");
        }
    }

    /// Wait until every entry recorded before this call has reached the sink.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, entry: &SyncLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_log
                (id, platform, handle, mode, outcome, job_id, posts_fetched, posts_normalized,
                 posts_added, posts_updated, total_posts, error, logged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.id)
        .bind(entry.key.platform.as_str())
        .bind(entry.key.handle.as_str())
        .bind(entry.mode.map(|m| m.as_str()))
        .bind(entry.outcome.as_str())
        .bind(&entry.job_id)
        .bind(entry.posts_fetched as i64)
        .bind(entry.posts_normalized as i64)
        .bind(entry.posts_added as i64)
        .bind(entry.posts_updated as i64)
        .bind(entry.total_posts as i64)
        .bind(&entry.error)
        .bind(entry.logged_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditSink (tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<SyncLogEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<SyncLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &SyncLogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
