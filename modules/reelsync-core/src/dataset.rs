// Dataset persistence: one full document per (platform, handle).
// All merge logic happens before `write_if`. Each stored document carries a
// version, and writes are compare-and-set against the version that was read,
// so concurrent read-merge-write cycles from any number of processes never
// silently overwrite each other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{Dataset, Post, ProfileKey};

/// A stored document plus the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// `None` when nothing has ever been written for the key.
    async fn load(&self, key: &ProfileKey) -> Result<Option<Versioned<Dataset>>>;

    /// Store `dataset` only if the stored version is still `expected`
    /// (`None`: no document may exist yet). Returns false when another writer
    /// got there first; nothing is written in that case.
    async fn write_if(&self, dataset: &Dataset, expected: Option<i64>) -> Result<bool>;

    async fn read(&self, key: &ProfileKey) -> Result<Option<Dataset>> {
        Ok(self.load(key).await?.map(|v| v.value))
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgDatasetStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct DatasetRow {
    posts: Json<Vec<Post>>,
    total_posts: i64,
    last_synced_at: Option<DateTime<Utc>>,
    version: i64,
}

impl PgDatasetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatasetStore for PgDatasetStore {
    async fn load(&self, key: &ProfileKey) -> Result<Option<Versioned<Dataset>>> {
        let row = sqlx::query_as::<_, DatasetRow>(
            r#"
            SELECT posts, total_posts, last_synced_at, version
            FROM datasets
            WHERE platform = $1 AND handle = $2
            "#,
        )
        .bind(key.platform.as_str())
        .bind(key.handle.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Versioned {
            value: Dataset {
                key: key.clone(),
                posts: r.posts.0,
                total_posts: r.total_posts.max(0) as usize,
                last_synced_at: r.last_synced_at,
            },
            version: r.version,
        }))
    }

    async fn write_if(&self, dataset: &Dataset, expected: Option<i64>) -> Result<bool> {
        let sql = match expected {
            None => {
                r#"
                INSERT INTO datasets (platform, handle, posts, total_posts, last_synced_at, version, updated_at)
                VALUES ($1, $2, $3, $4, $5, 1, now())
                ON CONFLICT (platform, handle) DO NOTHING
                "#
            }
            Some(_) => {
                r#"
                UPDATE datasets
                SET posts = $3,
                    total_posts = $4,
                    last_synced_at = $5,
                    version = version + 1,
                    updated_at = now()
                WHERE platform = $1 AND handle = $2 AND version = $6
                "#
            }
        };

        let mut query = sqlx::query(sql)
            .bind(dataset.key.platform.as_str())
            .bind(dataset.key.handle.as_str())
            .bind(Json(&dataset.posts))
            .bind(dataset.total_posts as i64)
            .bind(dataset.last_synced_at);
        if let Some(version) = expected {
            query = query.bind(version);
        }
        let result = query.execute(&self.pool).await?;

        Ok(result.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// In-memory (tests, database-less deployments)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryDatasetStore {
    datasets: RwLock<HashMap<ProfileKey, Versioned<Dataset>>>,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn load(&self, key: &ProfileKey) -> Result<Option<Versioned<Dataset>>> {
        Ok(self.datasets.read().await.get(key).cloned())
    }

    async fn write_if(&self, dataset: &Dataset, expected: Option<i64>) -> Result<bool> {
        let mut datasets = self.datasets.write().await;
        let current = datasets.get(&dataset.key).map(|v| v.version);
        if current != expected {
            return Ok(false);
        }
        datasets.insert(
            dataset.key.clone(),
            Versioned {
                value: dataset.clone(),
                version: current.unwrap_or(0) + 1,
            },
        );
        Ok(true)
    }
}
