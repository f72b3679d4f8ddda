//! Pure Apify REST API client.
//!
//! A minimal client for the Apify platform API. Supports starting actor runs,
//! reading and aborting runs, and fetching dataset results. Polling cadence is
//! left to the caller: `get_run` is a single status lookup.
//!
//! # Example
//!
//! ```rust,ignore
//! use apify_client::{ApifyClient, TikTokProfileScraperInput, TIKTOK_SCRAPER};
//!
//! let client = ApifyClient::new("your-api-token".into());
//!
//! let input = TikTokProfileScraperInput::new("nick", 30);
//! let run = client.start_run(TIKTOK_SCRAPER, &input).await?;
//! let run = client.get_run(&run.id).await?;
//! if run.run_status().is_succeeded() {
//!     let items: Vec<serde_json::Value> =
//!         client.get_dataset_items(&run.default_dataset_id, Some(30)).await?;
//! }
//! ```

pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{InstagramReelScraperInput, RunData, RunStatus, TikTokProfileScraperInput};

use serde::de::DeserializeOwned;
use serde::Serialize;
use types::ApiResponse;

pub const DEFAULT_BASE_URL: &str = "https://api.apify.com/v2";

/// Actor ID for clockworks/tiktok-scraper.
pub const TIKTOK_SCRAPER: &str = "GdWCkxBtKWOsKjdch";

/// Actor ID for apify/instagram-reel-scraper.
pub const INSTAGRAM_REEL_SCRAPER: &str = "xMc5Ga1oCONPmWJIa";

#[derive(Clone)]
pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Point the client at a different API root (proxies, tests).
    pub fn with_base_url(token: String, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Start an actor run with an arbitrary JSON input. Returns immediately with run metadata.
    pub async fn start_run<I: Serialize + ?Sized>(&self, actor_id: &str, input: &I) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;

        let resp = ensure_success(resp).await?;
        let api_resp: ApiResponse<RunData> = resp.json().await?;
        tracing::debug!(actor_id, run_id = %api_resp.data.id, "Apify run started");
        Ok(api_resp.data)
    }

    /// Look up a run's current state. Does not wait for it to finish.
    pub async fn get_run(&self, run_id: &str) -> Result<RunData> {
        let url = format!("{}/actor-runs/{}", self.base_url, run_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let resp = ensure_success(resp).await?;
        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Ask Apify to abort a run. Aborting a finished run is reported as an API error.
    pub async fn abort_run(&self, run_id: &str) -> Result<RunData> {
        let url = format!("{}/actor-runs/{}/abort", self.base_url, run_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let resp = ensure_success(resp).await?;
        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Fetch dataset items from a run's dataset, optionally capped at `limit`.
    pub async fn get_dataset_items<T: DeserializeOwned>(
        &self,
        dataset_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<T>> {
        let mut url = format!("{}/datasets/{}/items?format=json&clean=true", self.base_url, dataset_id);
        if let Some(limit) = limit {
            url.push_str(&format!("&limit={limit}"));
        }

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let resp = ensure_success(resp).await?;
        let items: Vec<T> = resp.json().await?;
        tracing::debug!(dataset_id, count = items.len(), "Fetched dataset items");
        Ok(items)
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ApifyError::Unauthorized {
            status: status.as_u16(),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApifyError::Api {
        status: status.as_u16(),
        message: body,
    })
}
