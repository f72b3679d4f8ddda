//! The external scraping service, as seen by the orchestrator.
//!
//! Every method either returns real data or an error. An unreachable service
//! is never reported as an empty result.

use anyhow::Result;
use apify_client::{
    ApifyClient, InstagramReelScraperInput, RunStatus as ApifyRunStatus, TikTokProfileScraperInput,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::types::{Platform, ProfileKey};

/// Per-job input knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConfig {
    /// How many recent items the actor should return.
    pub results_limit: u32,
}

/// Identifiers for a freshly launched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedJob {
    pub job_id: String,
    pub result_set_id: Option<String>,
}

/// The service's status vocabulary, collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// Raw status string as reported, for logs and audit text.
    pub raw_status: String,
    pub result_set_id: Option<String>,
}

#[async_trait]
pub trait ScrapingService: Send + Sync {
    async fn launch_job(&self, key: &ProfileKey, config: &JobConfig) -> Result<LaunchedJob>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatus>;

    async fn fetch_result_items(&self, result_set_id: &str, limit: u32) -> Result<Vec<Value>>;

    async fn abort_job(&self, job_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Apify adapter (production)
// ---------------------------------------------------------------------------

/// Which Apify actor scrapes each platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIds {
    pub tiktok: String,
    pub instagram: String,
}

impl Default for ActorIds {
    fn default() -> Self {
        Self {
            tiktok: apify_client::TIKTOK_SCRAPER.to_string(),
            instagram: apify_client::INSTAGRAM_REEL_SCRAPER.to_string(),
        }
    }
}

pub struct ApifyScraper {
    client: ApifyClient,
    actors: ActorIds,
}

impl ApifyScraper {
    pub fn new(client: ApifyClient, actors: ActorIds) -> Self {
        Self { client, actors }
    }
}

/// Map Apify's run status onto the three states the orchestrator tracks.
pub fn job_state(status: &ApifyRunStatus) -> JobState {
    match status {
        ApifyRunStatus::Succeeded => JobState::Succeeded,
        ApifyRunStatus::Failed | ApifyRunStatus::TimedOut | ApifyRunStatus::Aborted => {
            JobState::Failed
        }
        ApifyRunStatus::Ready
        | ApifyRunStatus::Running
        | ApifyRunStatus::TimingOut
        | ApifyRunStatus::Aborting => JobState::Running,
        ApifyRunStatus::Other(raw) => {
            warn!(status = %raw, "Unrecognized Apify run status, treating as running");
            JobState::Running
        }
    }
}

#[async_trait]
impl ScrapingService for ApifyScraper {
    async fn launch_job(&self, key: &ProfileKey, config: &JobConfig) -> Result<LaunchedJob> {
        let handle = key.handle.as_str();
        let run = match key.platform {
            Platform::TikTok => {
                let input = TikTokProfileScraperInput::new(handle, config.results_limit);
                self.client.start_run(&self.actors.tiktok, &input).await?
            }
            Platform::Instagram => {
                let input = InstagramReelScraperInput {
                    username: vec![handle.to_string()],
                    results_limit: config.results_limit,
                };
                self.client.start_run(&self.actors.instagram, &input).await?
            }
        };

        Ok(LaunchedJob {
            job_id: run.id,
            result_set_id: Some(run.default_dataset_id),
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let run = self.client.get_run(job_id).await?;
        Ok(JobStatus {
            state: job_state(&run.run_status()),
            raw_status: run.status,
            result_set_id: Some(run.default_dataset_id),
        })
    }

    async fn fetch_result_items(&self, result_set_id: &str, limit: u32) -> Result<Vec<Value>> {
        Ok(self
            .client
            .get_dataset_items(result_set_id, Some(limit))
            .await?)
    }

    async fn abort_job(&self, job_id: &str) -> Result<()> {
        self.client.abort_run(job_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apify_vocabulary_collapses_to_three_states() {
        let cases = [
            ("READY", JobState::Running),
            ("RUNNING", JobState::Running),
            ("TIMING-OUT", JobState::Running),
            ("ABORTING", JobState::Running),
            ("SUCCEEDED", JobState::Succeeded),
            ("FAILED", JobState::Failed),
            ("TIMED-OUT", JobState::Failed),
            ("ABORTED", JobState::Failed),
            ("SOMETHING-NEW", JobState::Running),
        ];
        for (raw, expected) in cases {
            assert_eq!(job_state(&ApifyRunStatus::from_api(raw)), expected, "{raw}");
        }
    }
}
