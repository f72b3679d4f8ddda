use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

// =============================================================================
// Platform / Handle / ProfileKey
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiktok" | "tt" => Ok(Platform::TikTok),
            "instagram" | "ig" => Ok(Platform::Instagram),
            _ => Err(SyncError::UnknownPlatform(s.to_string())),
        }
    }
}

static RE_TIKTOK_PROFILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.|m\.)?tiktok\.com/@([A-Za-z0-9_.]+)").unwrap()
});
static RE_INSTAGRAM_PROFILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:www\.)?instagram\.com/([A-Za-z0-9_.]+)").unwrap()
});
static RE_HANDLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9._]{1,64}$").unwrap());

/// A platform username: lowercase, no leading `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Accepts `nick`, `@Nick`, or a profile URL such as `https://www.tiktok.com/@nick`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let raw = RE_TIKTOK_PROFILE
            .captures(trimmed)
            .or_else(|| RE_INSTAGRAM_PROFILE.captures(trimmed))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(trimmed);

        let name = raw.strip_prefix('@').unwrap_or(raw).to_lowercase();
        if !RE_HANDLE.is_match(&name) {
            return Err(SyncError::InvalidHandle(input.to_string()));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The sharding key for all per-account state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey {
    pub platform: Platform,
    pub handle: Handle,
}

impl ProfileKey {
    pub fn new(platform: Platform, handle: Handle) -> Self {
        Self { platform, handle }
    }

    pub fn parse(platform: &str, handle: &str) -> Result<Self> {
        Ok(Self::new(platform.parse()?, Handle::parse(handle)?))
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:@{}", self.platform, self.handle)
    }
}

// =============================================================================
// Posts & datasets
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub play_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub share_count: u64,
    pub save_count: u64,
}

impl Metrics {
    fn accumulate(&mut self, other: &Metrics) {
        self.play_count = self.play_count.saturating_add(other.play_count);
        self.like_count = self.like_count.saturating_add(other.like_count);
        self.comment_count = self.comment_count.saturating_add(other.comment_count);
        self.share_count = self.share_count.saturating_add(other.share_count);
        self.save_count = self.save_count.saturating_add(other.save_count);
    }
}

/// One piece of content, normalized across platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Platform-native id, or the content URL when the platform gave none.
    pub id: String,
    pub url: Option<String>,
    pub caption: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub metrics: Metrics,
}

/// The persisted post collection for one (platform, handle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(flatten)]
    pub key: ProfileKey,
    /// Newest first.
    pub posts: Vec<Post>,
    pub total_posts: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Dataset {
    pub fn empty(key: ProfileKey) -> Self {
        Self {
            key,
            posts: Vec::new(),
            total_posts: 0,
            last_synced_at: None,
        }
    }

    /// Summed metrics across every post.
    pub fn totals(&self) -> Metrics {
        let mut totals = Metrics::default();
        for post in &self.posts {
            totals.accumulate(&post.metrics);
        }
        totals
    }

    pub fn get(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }
}

// =============================================================================
// Runs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(RunStatus::Idle),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(SyncError::StoreUnavailable(format!(
                "unrecognized run status {other:?}"
            ))),
        }
    }
}

/// Orchestration state for one key's most recent scrape job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub key: ProfileKey,
    pub job_id: String,
    pub result_set_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn running(
        key: ProfileKey,
        job_id: String,
        result_set_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            job_id,
            result_set_id,
            status: RunStatus::Running,
            started_at: now,
            resolved_at: None,
            last_fetched_at: None,
        }
    }

    /// Running and not yet past the staleness threshold (if any).
    pub fn is_active(&self, now: DateTime<Utc>, stale_after: Option<Duration>) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        match stale_after {
            Some(threshold) => now - self.started_at < threshold,
            None => true,
        }
    }
}

/// Terminal result reported by the scraping service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { result_set_id: Option<String> },
    Failed,
}

// =============================================================================
// Merge mode
// =============================================================================

/// Caller intent for a completion; never inferred from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    /// Add unseen posts, leave known posts alone.
    AppendNewPosts,
    /// Overwrite metrics of known posts, append unseen ones, drop nothing.
    RefreshCounts,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::AppendNewPosts => "append-new-posts",
            MergeMode::RefreshCounts => "refresh-counts",
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "append-new-posts" | "append" => Ok(MergeMode::AppendNewPosts),
            "refresh-counts" | "refresh" => Ok(MergeMode::RefreshCounts),
            _ => Err(SyncError::UnknownMergeMode(s.to_string())),
        }
    }
}
