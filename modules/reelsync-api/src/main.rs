use std::sync::Arc;

use anyhow::Result;
use apify_client::ApifyClient;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reelsync_api::{app, AppState};
use reelsync_core::{
    ApifyScraper, AuditLog, AuditSink, Config, DatasetStore, MemoryAuditSink,
    MemoryDatasetStore, MemoryRunRegistry, Orchestrator, PgAuditSink, PgDatasetStore,
    PgRunRegistry, RunRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reelsync=info".parse()?))
        .init();

    let config = Config::from_env()?;

    let client = match &config.apify_base_url {
        Some(url) => ApifyClient::with_base_url(config.apify_api_key.clone(), url),
        None => ApifyClient::new(config.apify_api_key.clone()),
    };
    let scraper = Arc::new(ApifyScraper::new(client, config.actor_ids()));

    let (datasets, runs, sink): (Arc<dyn DatasetStore>, Arc<dyn RunRegistry>, Arc<dyn AuditSink>) =
        match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                info!("Connected to database");

                reelsync_core::migrate(&pool).await?;
                info!("Migrations complete");

                (
                    Arc::new(PgDatasetStore::new(pool.clone())),
                    Arc::new(PgRunRegistry::new(pool.clone(), config.stale_after())),
                    Arc::new(PgAuditSink::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory stores (single process, lost on restart)");
                (
                    Arc::new(MemoryDatasetStore::new()),
                    Arc::new(MemoryRunRegistry::new(config.stale_after())),
                    Arc::new(MemoryAuditSink::new()),
                )
            }
        };

    let audit = AuditLog::spawn(sink);
    let orchestrator = Orchestrator::new(scraper, datasets, runs, audit.clone(), config.sync_settings());

    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
    });

    let addr = config.bind_addr();
    info!("reelsync API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    audit.flush().await;
    info!("Shut down");

    Ok(())
}
