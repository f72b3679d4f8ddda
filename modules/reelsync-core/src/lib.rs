pub mod audit;
pub mod config;
pub mod dataset;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod scraper;
pub mod types;

pub use audit::{AuditLog, AuditSink, MemoryAuditSink, PgAuditSink, SyncLogEntry, SyncOutcome};
pub use config::Config;
pub use dataset::{DatasetStore, MemoryDatasetStore, PgDatasetStore, Versioned};
pub use error::{Result, SyncError};
pub use merge::{merge, MergeOutcome};
pub use normalize::{normalize, normalize_batch};
pub use orchestrator::{Orchestrator, RunStatusView, StartedRun, SyncReport, SyncSettings};
pub use registry::{MemoryRunRegistry, PgRunRegistry, RunRegistry, TryStart};
pub use scraper::{
    ActorIds, ApifyScraper, JobConfig, JobState, JobStatus, LaunchedJob, ScrapingService,
};
pub use types::*;

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
