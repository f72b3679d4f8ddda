use anyhow::{Context, Result};
use chrono::Duration;

use crate::orchestrator::SyncSettings;
use crate::scraper::ActorIds;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Scraping
    pub apify_api_key: String,
    pub apify_base_url: Option<String>,
    pub tiktok_actor_id: String,
    pub instagram_actor_id: String,
    pub results_limit: u32,

    // Run registry
    /// Minutes after which a running record stops blocking new starts. 0 disables.
    pub stale_run_minutes: u32,

    // Database (absent = in-memory stores)
    pub database_url: Option<String>,

    // Server
    pub api_host: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|name| std::env::var(name).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = ActorIds::default();

        Ok(Self {
            apify_api_key: var("APIFY_API_KEY").context("APIFY_API_KEY must be set")?,
            apify_base_url: var("APIFY_BASE_URL"),
            tiktok_actor_id: var("TIKTOK_ACTOR_ID").unwrap_or(defaults.tiktok),
            instagram_actor_id: var("INSTAGRAM_ACTOR_ID").unwrap_or(defaults.instagram),
            results_limit: parse_or("RESULTS_LIMIT", var("RESULTS_LIMIT"), 50)?,
            stale_run_minutes: parse_or("STALE_RUN_MINUTES", var("STALE_RUN_MINUTES"), 30)?,
            database_url: var("DATABASE_URL"),
            api_host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: parse_or("API_PORT", var("API_PORT"), 3000)?,
        })
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_run_minutes > 0).then(|| Duration::minutes(i64::from(self.stale_run_minutes)))
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            results_limit: self.results_limit,
            stale_after: self.stale_after(),
        }
    }

    pub fn actor_ids(&self) -> ActorIds {
        ActorIds {
            tiktok: self.tiktok_actor_id.clone(),
            instagram: self.instagram_actor_id.clone(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{}...({} chars)", head, val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) => preview(v),
                None => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  APIFY_API_KEY: {}", preview(&self.apify_api_key));
        tracing::info!("  APIFY_BASE_URL: {}", self.apify_base_url.as_deref().unwrap_or("<default>"));
        tracing::info!("  TIKTOK_ACTOR_ID: {}", self.tiktok_actor_id);
        tracing::info!("  INSTAGRAM_ACTOR_ID: {}", self.instagram_actor_id);
        tracing::info!("  RESULTS_LIMIT: {}", self.results_limit);
        tracing::info!("  STALE_RUN_MINUTES: {}", self.stale_run_minutes);
        tracing::info!("  DATABASE_URL: {}", preview_opt(&self.database_url));
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => v.parse().with_context(|| format!("{name} has invalid value {v:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn api_key_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("APIFY_API_KEY"));
        assert!(config(&[("APIFY_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn defaults_apply() {
        let c = config(&[("APIFY_API_KEY", "apify_api_xyz")]).unwrap();
        assert_eq!(c.results_limit, 50);
        assert_eq!(c.stale_after(), Some(Duration::minutes(30)));
        assert_eq!(c.bind_addr(), "0.0.0.0:3000");
        assert!(c.database_url.is_none());
        assert_eq!(c.actor_ids(), ActorIds::default());
    }

    #[test]
    fn zero_minutes_disables_staleness() {
        let c = config(&[("APIFY_API_KEY", "k"), ("STALE_RUN_MINUTES", "0")]).unwrap();
        assert_eq!(c.stale_after(), None);
        assert_eq!(c.sync_settings().stale_after, None);
    }

    #[test]
    fn overrides_are_parsed() {
        let c = config(&[
            ("APIFY_API_KEY", "k"),
            ("RESULTS_LIMIT", "20"),
            ("API_PORT", "8080"),
            ("TIKTOK_ACTOR_ID", "me/tiktok"),
        ])
        .unwrap();
        assert_eq!(c.sync_settings().results_limit, 20);
        assert_eq!(c.api_port, 8080);
        assert_eq!(c.actor_ids().tiktok, "me/tiktok");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config(&[("APIFY_API_KEY", "k"), ("RESULTS_LIMIT", "many")]).unwrap_err();
        assert!(err.to_string().contains("RESULTS_LIMIT"));
    }
}
