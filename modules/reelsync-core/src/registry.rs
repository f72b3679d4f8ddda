// Run registry: which scrape job, if any, is in flight for each profile.
//
// `try_start` is the dedupe point and must be a single atomic check-and-set per
// key. The Postgres backend does it in one conditional upsert so it holds across
// processes; the in-memory backend holds one lock around the map.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::types::{Handle, ProfileKey, RunOutcome, RunRecord, RunStatus};

/// Result of a start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryStart {
    /// False when an active run already owned the key.
    pub started: bool,
    /// The newly registered record, or the one that won.
    pub record: RunRecord,
}

#[async_trait]
pub trait RunRegistry: Send + Sync {
    async fn get(&self, key: &ProfileKey) -> Result<Option<RunRecord>>;

    /// Register `job_id` as the running job for `key` unless an active run
    /// already holds it, in which case that run is returned with `started = false`.
    async fn try_start(
        &self,
        key: &ProfileKey,
        job_id: &str,
        result_set_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TryStart>;

    /// Move the running record for (`key`, `job_id`) to a terminal state.
    /// Returns `None` without changing anything when no such running record exists.
    async fn resolve(
        &self,
        key: &ProfileKey,
        job_id: &str,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<RunRecord>>;

    /// Stamp the time results were last merged for the key.
    async fn mark_fetched(&self, key: &ProfileKey, at: DateTime<Utc>) -> Result<()>;
}

fn terminal_status(outcome: &RunOutcome) -> RunStatus {
    match outcome {
        RunOutcome::Succeeded { .. } => RunStatus::Succeeded,
        RunOutcome::Failed => RunStatus::Failed,
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgRunRegistry {
    pool: PgPool,
    stale_after: Option<Duration>,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    platform: String,
    handle: String,
    job_id: String,
    result_set_id: Option<String>,
    status: String,
    started_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    last_fetched_at: Option<DateTime<Utc>>,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord> {
        Ok(RunRecord {
            key: ProfileKey::new(self.platform.parse()?, Handle::parse(&self.handle)?),
            job_id: self.job_id,
            result_set_id: self.result_set_id,
            status: self.status.parse()?,
            started_at: self.started_at,
            resolved_at: self.resolved_at,
            last_fetched_at: self.last_fetched_at,
        })
    }
}

const RUN_COLUMNS: &str =
    "platform, handle, job_id, result_set_id, status, started_at, resolved_at, last_fetched_at";

impl PgRunRegistry {
    /// `stale_after`: a running record older than this no longer blocks a new start.
    pub fn new(pool: PgPool, stale_after: Option<Duration>) -> Self {
        Self { pool, stale_after }
    }
}

#[async_trait]
impl RunRegistry for PgRunRegistry {
    async fn get(&self, key: &ProfileKey) -> Result<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM scrape_runs WHERE platform = $1 AND handle = $2"
        ))
        .bind(key.platform.as_str())
        .bind(key.handle.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRow::into_record).transpose()
    }

    async fn try_start(
        &self,
        key: &ProfileKey,
        job_id: &str,
        result_set_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TryStart> {
        let stale_cutoff = self.stale_after.map(|d| now - d);

        // Atomic check-and-set: the update only fires when the existing row is
        // not an active run, so concurrent callers see exactly one winner.
        let won = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            INSERT INTO scrape_runs
                (platform, handle, job_id, result_set_id, status, started_at, resolved_at, last_fetched_at)
            VALUES ($1, $2, $3, $4, 'running', $5, NULL, NULL)
            ON CONFLICT (platform, handle) DO UPDATE
            SET job_id = EXCLUDED.job_id,
                result_set_id = EXCLUDED.result_set_id,
                status = 'running',
                started_at = EXCLUDED.started_at,
                resolved_at = NULL
            WHERE scrape_runs.status <> 'running'
               OR scrape_runs.started_at < $6
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(key.platform.as_str())
        .bind(key.handle.as_str())
        .bind(job_id)
        .bind(result_set_id)
        .bind(now)
        .bind(stale_cutoff)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = won {
            return Ok(TryStart {
                started: true,
                record: row.into_record()?,
            });
        }

        let existing = self.get(key).await?.ok_or_else(|| {
            SyncError::StoreUnavailable(format!(
                "run for {key} vanished during start"
            ))
        })?;
        Ok(TryStart {
            started: false,
            record: existing,
        })
    }

    async fn resolve(
        &self,
        key: &ProfileKey,
        job_id: &str,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<RunRecord>> {
        let status = terminal_status(&outcome);
        let result_set_id = match &outcome {
            RunOutcome::Succeeded { result_set_id } => result_set_id.clone(),
            RunOutcome::Failed => None,
        };

        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            UPDATE scrape_runs
            SET status = $4,
                result_set_id = COALESCE($5, result_set_id),
                resolved_at = $6
            WHERE platform = $1 AND handle = $2 AND job_id = $3 AND status = 'running'
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(key.platform.as_str())
        .bind(key.handle.as_str())
        .bind(job_id)
        .bind(status.as_str())
        .bind(result_set_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRow::into_record).transpose()
    }

    async fn mark_fetched(&self, key: &ProfileKey, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scrape_runs SET last_fetched_at = $3 WHERE platform = $1 AND handle = $2")
            .bind(key.platform.as_str())
            .bind(key.handle.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory (single process only)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRunRegistry {
    runs: Mutex<HashMap<ProfileKey, RunRecord>>,
    stale_after: Option<Duration>,
}

impl MemoryRunRegistry {
    pub fn new(stale_after: Option<Duration>) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            stale_after,
        }
    }
}

#[async_trait]
impl RunRegistry for MemoryRunRegistry {
    async fn get(&self, key: &ProfileKey) -> Result<Option<RunRecord>> {
        Ok(self.runs.lock().await.get(key).cloned())
    }

    async fn try_start(
        &self,
        key: &ProfileKey,
        job_id: &str,
        result_set_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TryStart> {
        let mut runs = self.runs.lock().await;

        if let Some(existing) = runs.get(key) {
            if existing.is_active(now, self.stale_after) {
                return Ok(TryStart {
                    started: false,
                    record: existing.clone(),
                });
            }
        }

        let mut record = RunRecord::running(
            key.clone(),
            job_id.to_string(),
            result_set_id.map(str::to_string),
            now,
        );
        if let Some(previous) = runs.get(key) {
            record.last_fetched_at = previous.last_fetched_at;
        }
        runs.insert(key.clone(), record.clone());

        Ok(TryStart {
            started: true,
            record,
        })
    }

    async fn resolve(
        &self,
        key: &ProfileKey,
        job_id: &str,
        outcome: RunOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<RunRecord>> {
        let mut runs = self.runs.lock().await;
        let Some(record) = runs.get_mut(key) else {
            return Ok(None);
        };
        if record.job_id != job_id || record.status != RunStatus::Running {
            return Ok(None);
        }

        record.status = terminal_status(&outcome);
        record.resolved_at = Some(now);
        if let RunOutcome::Succeeded {
            result_set_id: Some(id),
        } = outcome
        {
            record.result_set_id = Some(id);
        }
        Ok(Some(record.clone()))
    }

    async fn mark_fetched(&self, key: &ProfileKey, at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.runs.lock().await.get_mut(key) {
            record.last_fetched_at = Some(at);
        }
        Ok(())
    }
}
