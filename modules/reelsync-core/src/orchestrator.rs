//! Run lifecycle: start, poll, complete.
//!
//! Per key the state machine is `idle -> running -> {succeeded, failed}`, and a
//! new start from a terminal state re-enters `running`. Polling is caller-driven
//! and nothing in here sleeps. The only retry is re-merging after a dataset
//! write lost a version conflict.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, SyncLogEntry, SyncOutcome};
use crate::dataset::DatasetStore;
use crate::error::{Result, SyncError};
use crate::merge::{merge, MergeOutcome};
use crate::normalize::normalize_batch;
use crate::registry::RunRegistry;
use crate::scraper::{JobConfig, JobState, ScrapingService};
use crate::types::{Dataset, MergeMode, Post, ProfileKey, RunOutcome, RunRecord, RunStatus};

/// Compare-and-set retries before a completion gives up on a contended dataset.
const MAX_MERGE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Items requested from the scraper per job, and fetched per completion.
    pub results_limit: u32,
    /// A running record older than this no longer blocks a new start.
    pub stale_after: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            results_limit: 50,
            stale_after: Some(Duration::minutes(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedRun {
    /// False when an in-flight run was returned instead of launching one.
    pub started: bool,
    pub record: RunRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub key: ProfileKey,
    pub job_id: String,
    pub mode: MergeMode,
    pub posts_fetched: usize,
    pub posts_normalized: usize,
    pub posts_added: usize,
    pub posts_updated: usize,
    pub total_posts: usize,
    pub synced_at: DateTime<Utc>,
}

/// Registry view of a key. `idle` with no job fields when nothing was ever started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatusView {
    #[serde(flatten)]
    pub key: ProfileKey,
    pub status: RunStatus,
    pub job_id: Option<String>,
    pub result_set_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl RunStatusView {
    fn idle(key: ProfileKey) -> Self {
        Self {
            key,
            status: RunStatus::Idle,
            job_id: None,
            result_set_id: None,
            started_at: None,
            resolved_at: None,
            last_fetched_at: None,
        }
    }
}

impl From<RunRecord> for RunStatusView {
    fn from(record: RunRecord) -> Self {
        Self {
            key: record.key,
            status: record.status,
            job_id: Some(record.job_id),
            result_set_id: record.result_set_id,
            started_at: Some(record.started_at),
            resolved_at: record.resolved_at,
            last_fetched_at: record.last_fetched_at,
        }
    }
}

/// One async mutex per key, created on first use.
///
/// Entries nobody holds or waits on are dropped on the next lookup, so the map
/// only ever contains keys with work in flight.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<ProfileKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn for_key(&self, key: &ProfileKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only handed out under this std mutex, so a count of one
        // means no caller can still reach the entry.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct Orchestrator {
    scraper: Arc<dyn ScrapingService>,
    datasets: Arc<dyn DatasetStore>,
    runs: Arc<dyn RunRegistry>,
    audit: AuditLog,
    settings: SyncSettings,
    start_locks: KeyedLocks,
    complete_locks: KeyedLocks,
}

impl Orchestrator {
    pub fn new(
        scraper: Arc<dyn ScrapingService>,
        datasets: Arc<dyn DatasetStore>,
        runs: Arc<dyn RunRegistry>,
        audit: AuditLog,
        settings: SyncSettings,
    ) -> Self {
        Self {
            scraper,
            datasets,
            runs,
            audit,
            settings,
            start_locks: KeyedLocks::default(),
            complete_locks: KeyedLocks::default(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Launch a scrape for `key` unless one is already in flight.
    pub async fn start_run(&self, key: &ProfileKey) -> Result<StartedRun> {
        let lock = self.start_locks.for_key(key);
        let _guard = lock.lock().await;

        if let Some(existing) = self.runs.get(key).await? {
            if existing.is_active(Utc::now(), self.settings.stale_after) {
                info!(
                    platform = %key.platform,
                    handle = %key.handle,
                    job_id = %existing.job_id,
                    "Run already in flight, not launching another"
                );
                return Ok(StartedRun {
                    started: false,
                    record: existing,
                });
            }
            if existing.status == RunStatus::Running {
                self.expire_stale_run(key, &existing).await?;
            }
        }

        let config = JobConfig {
            results_limit: self.settings.results_limit,
        };
        let job = self.scraper.launch_job(key, &config).await.map_err(|e| {
            warn!(platform = %key.platform, handle = %key.handle, error = %e, "Failed to launch scrape job");
            SyncError::service(e)
        })?;

        let attempt = match self
            .runs
            .try_start(key, &job.job_id, job.result_set_id.as_deref(), Utc::now())
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                self.abort_orphan(key, &job.job_id).await;
                return Err(e);
            }
        };

        if attempt.started {
            info!(
                platform = %key.platform,
                handle = %key.handle,
                job_id = %job.job_id,
                results_limit = config.results_limit,
                "Scrape job launched"
            );
        } else {
            // Another process registered a run between our read and our launch.
            info!(
                platform = %key.platform,
                handle = %key.handle,
                job_id = %attempt.record.job_id,
                "Lost start race to another run"
            );
            self.abort_orphan(key, &job.job_id).await;
        }

        Ok(StartedRun {
            started: attempt.started,
            record: attempt.record,
        })
    }

    /// Fail a running record that outlived `stale_after` and stop its job.
    async fn expire_stale_run(&self, key: &ProfileKey, stale: &RunRecord) -> Result<()> {
        let resolved = self
            .runs
            .resolve(key, &stale.job_id, RunOutcome::Failed, Utc::now())
            .await?;
        // None: a poll resolved it or another process replaced it meanwhile.
        if resolved.is_none() {
            return Ok(());
        }

        let minutes = self
            .settings
            .stale_after
            .map(|d| d.num_minutes())
            .unwrap_or_default();
        warn!(
            platform = %key.platform,
            handle = %key.handle,
            job_id = %stale.job_id,
            started_at = %stale.started_at,
            stale_after_minutes = minutes,
            "Expiring stale scrape run"
        );
        let mut entry = SyncLogEntry::new(key.clone(), &stale.job_id, SyncOutcome::Failed);
        entry.error = Some(format!("stale after {minutes} minutes"));
        self.audit.record(entry);

        self.abort_orphan(key, &stale.job_id).await;
        Ok(())
    }

    async fn abort_orphan(&self, key: &ProfileKey, job_id: &str) {
        if let Err(e) = self.scraper.abort_job(job_id).await {
            warn!(
                platform = %key.platform,
                handle = %key.handle,
                job_id,
                error = %e,
                "Failed to abort scrape job"
            );
        }
    }

    /// Refresh the stored run from the scraping service.
    pub async fn poll_run(&self, key: &ProfileKey) -> Result<RunRecord> {
        let record = self
            .runs
            .get(key)
            .await?
            .ok_or_else(|| SyncError::NoRun(key.clone()))?;

        if record.status != RunStatus::Running {
            return Ok(record);
        }

        let status = self
            .scraper
            .job_status(&record.job_id)
            .await
            .map_err(SyncError::service)?;

        let outcome = match status.state {
            JobState::Running => {
                debug!(
                    platform = %key.platform,
                    handle = %key.handle,
                    job_id = %record.job_id,
                    status = %status.raw_status,
                    "Scrape job still running"
                );
                return Ok(record);
            }
            JobState::Succeeded => RunOutcome::Succeeded {
                result_set_id: status.result_set_id,
            },
            JobState::Failed => RunOutcome::Failed,
        };
        let failed = outcome == RunOutcome::Failed;

        let Some(resolved) = self
            .runs
            .resolve(key, &record.job_id, outcome, Utc::now())
            .await?
        else {
            // A concurrent poll or a newer start got there first.
            return self
                .runs
                .get(key)
                .await?
                .ok_or_else(|| SyncError::NoRun(key.clone()));
        };

        if failed {
            warn!(
                platform = %key.platform,
                handle = %key.handle,
                job_id = %resolved.job_id,
                status = %status.raw_status,
                "Scrape job failed"
            );
            let mut entry = SyncLogEntry::new(key.clone(), &resolved.job_id, SyncOutcome::Failed);
            entry.error = Some(format!("scrape job ended with status {}", status.raw_status));
            self.audit.record(entry);
        } else {
            info!(
                platform = %key.platform,
                handle = %key.handle,
                job_id = %resolved.job_id,
                "Scrape job succeeded"
            );
        }

        Ok(resolved)
    }

    /// Fetch a succeeded run's results and merge them into the dataset.
    pub async fn complete_run(&self, key: &ProfileKey, mode: MergeMode) -> Result<SyncReport> {
        let lock = self.complete_locks.for_key(key);
        let _guard = lock.lock().await;

        let record = self
            .runs
            .get(key)
            .await?
            .ok_or_else(|| SyncError::NoRun(key.clone()))?;

        let result_set_id = match (&record.status, &record.result_set_id) {
            (RunStatus::Succeeded, Some(id)) => id.clone(),
            _ => {
                return Err(SyncError::RunNotReady {
                    key: key.clone(),
                    status: record.status,
                })
            }
        };

        let mut entry = SyncLogEntry::new(key.clone(), &record.job_id, SyncOutcome::Succeeded);
        entry.mode = Some(mode);

        match self.sync(key, &record, &result_set_id, mode, &mut entry).await {
            Ok(report) => {
                entry.logged_at = Utc::now();
                self.audit.record(entry);
                Ok(report)
            }
            Err(e) => {
                warn!(
                    platform = %key.platform,
                    handle = %key.handle,
                    job_id = %record.job_id,
                    mode = %mode,
                    error = %e,
                    "Sync failed"
                );
                entry.outcome = SyncOutcome::Failed;
                entry.error = Some(e.to_string());
                entry.logged_at = Utc::now();
                self.audit.record(entry);
                Err(e)
            }
        }
    }

    async fn sync(
        &self,
        key: &ProfileKey,
        record: &RunRecord,
        result_set_id: &str,
        mode: MergeMode,
        entry: &mut SyncLogEntry,
    ) -> Result<SyncReport> {
        let raw = self
            .scraper
            .fetch_result_items(result_set_id, self.settings.results_limit)
            .await
            .map_err(SyncError::service)?;
        entry.posts_fetched = raw.len();

        let posts = normalize_batch(key.platform, &raw);
        entry.posts_normalized = posts.len();
        if posts.len() < raw.len() {
            debug!(
                platform = %key.platform,
                handle = %key.handle,
                dropped = raw.len() - posts.len(),
                "Dropped unusable or duplicate items"
            );
        }

        let (now, MergeOutcome { dataset, added, updated }) =
            self.merge_and_store(key, mode, posts).await?;

        entry.posts_added = added;
        entry.posts_updated = updated;
        entry.total_posts = dataset.total_posts;

        if let Err(e) = self.runs.mark_fetched(key, now).await {
            warn!(platform = %key.platform, handle = %key.handle, error = %e, "Failed to stamp last fetch time");
        }

        info!(
            platform = %key.platform,
            handle = %key.handle,
            job_id = %record.job_id,
            mode = %mode,
            fetched = entry.posts_fetched,
            added,
            updated,
            total = dataset.total_posts,
            "Dataset synced"
        );

        Ok(SyncReport {
            key: key.clone(),
            job_id: record.job_id.clone(),
            mode,
            posts_fetched: entry.posts_fetched,
            posts_normalized: entry.posts_normalized,
            posts_added: added,
            posts_updated: updated,
            total_posts: dataset.total_posts,
            synced_at: now,
        })
    }

    /// Read, merge and compare-and-set write until the write lands on the
    /// version that was read. A conflict means another completion for the key
    /// (possibly in another process) stored first, so the merge is redone on
    /// top of its result.
    async fn merge_and_store(
        &self,
        key: &ProfileKey,
        mode: MergeMode,
        posts: Vec<Post>,
    ) -> Result<(DateTime<Utc>, MergeOutcome)> {
        for attempt in 1..=MAX_MERGE_ATTEMPTS {
            let (existing, expected) = match self.datasets.load(key).await? {
                Some(stored) => (stored.value, Some(stored.version)),
                None => (Dataset::empty(key.clone()), None),
            };

            let now = Utc::now();
            let outcome = merge(mode, existing, posts.clone(), now);
            if self.datasets.write_if(&outcome.dataset, expected).await? {
                return Ok((now, outcome));
            }
            debug!(
                platform = %key.platform,
                handle = %key.handle,
                attempt,
                "Dataset changed during merge, merging again"
            );
        }
        Err(SyncError::StoreUnavailable(format!(
            "dataset for {key} kept changing; gave up after {MAX_MERGE_ATTEMPTS} merge attempts"
        )))
    }

    /// Registry read only; never calls the scraping service.
    pub async fn run_status(&self, key: &ProfileKey) -> Result<RunStatusView> {
        Ok(match self.runs.get(key).await? {
            Some(record) => record.into(),
            None => RunStatusView::idle(key.clone()),
        })
    }

    pub async fn dataset(&self, key: &ProfileKey) -> Result<Option<Dataset>> {
        self.datasets.read(key).await
    }
}
