use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Input for the clockworks/tiktok-scraper actor (profile-based).
#[derive(Debug, Clone, Serialize)]
pub struct TikTokProfileScraperInput {
    pub profiles: Vec<String>,
    #[serde(rename = "resultsPerPage")]
    pub results_per_page: u32,
    #[serde(rename = "shouldDownloadVideos")]
    pub should_download_videos: bool,
    #[serde(rename = "shouldDownloadCovers")]
    pub should_download_covers: bool,
}

impl TikTokProfileScraperInput {
    /// Metrics-only input: no media downloads.
    pub fn new(handle: &str, results_per_page: u32) -> Self {
        Self {
            profiles: vec![handle.to_string()],
            results_per_page,
            should_download_videos: false,
            should_download_covers: false,
        }
    }
}

/// Input for the apify/instagram-reel-scraper actor.
#[derive(Debug, Clone, Serialize)]
pub struct InstagramReelScraperInput {
    pub username: Vec<String>,
    #[serde(rename = "resultsLimit")]
    pub results_limit: u32,
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunData {
    pub fn run_status(&self) -> RunStatus {
        RunStatus::from_api(&self.status)
    }
}

/// Apify's run status vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    TimingOut,
    TimedOut,
    Aborting,
    Aborted,
    Other(String),
}

impl RunStatus {
    pub fn from_api(status: &str) -> Self {
        match status {
            "READY" => RunStatus::Ready,
            "RUNNING" => RunStatus::Running,
            "SUCCEEDED" => RunStatus::Succeeded,
            "FAILED" => RunStatus::Failed,
            "TIMING-OUT" => RunStatus::TimingOut,
            "TIMED-OUT" => RunStatus::TimedOut,
            "ABORTING" => RunStatus::Aborting,
            "ABORTED" => RunStatus::Aborted,
            other => RunStatus::Other(other.to_string()),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }

    /// Terminal states that produced no usable result.
    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::TimedOut | RunStatus::Aborted)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_succeeded() || self.is_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitional_statuses_are_not_terminal() {
        for s in ["READY", "RUNNING", "TIMING-OUT", "ABORTING"] {
            assert!(!RunStatus::from_api(s).is_terminal(), "{s}");
        }
    }

    #[test]
    fn failure_statuses() {
        for s in ["FAILED", "TIMED-OUT", "ABORTED"] {
            let status = RunStatus::from_api(s);
            assert!(status.is_failed(), "{s}");
            assert!(status.is_terminal(), "{s}");
        }
    }

    #[test]
    fn unknown_status_is_preserved() {
        assert_eq!(
            RunStatus::from_api("PAUSED"),
            RunStatus::Other("PAUSED".to_string())
        );
    }

    #[test]
    fn run_data_parses_api_payload() {
        let run: RunData = serde_json::from_value(serde_json::json!({
            "id": "run1",
            "status": "SUCCEEDED",
            "defaultDatasetId": "ds1",
            "startedAt": "2024-05-01T10:00:00.000Z",
            "finishedAt": null,
            "buildId": "ignored"
        }))
        .unwrap();
        assert_eq!(run.default_dataset_id, "ds1");
        assert!(run.run_status().is_succeeded());
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn tiktok_input_uses_actor_field_names() {
        let input = TikTokProfileScraperInput::new("nick", 25);
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["profiles"][0], "nick");
        assert_eq!(json["resultsPerPage"], 25);
        assert_eq!(json["shouldDownloadVideos"], false);
    }
}
