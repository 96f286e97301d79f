// ABOUTME: Data-store and cache status capability trait.
// ABOUTME: Availability and capacity reads for the health battery.

use async_trait::async_trait;

/// Availability and free capacity of the primary data store.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseStatus {
    pub available: bool,
    pub free_storage_pct: f64,
}

/// Availability and memory pressure of the cache layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatus {
    pub available: bool,
    pub memory_used_pct: f64,
}

/// Read-only status queries against the backing stores.
#[async_trait]
pub trait StoreOps: Send + Sync {
    async fn database_status(&self, identifier: &str) -> Result<DatabaseStatus, StoreError>;

    async fn cache_status(&self, cluster_id: &str) -> Result<CacheStatus, StoreError>;
}

/// Errors from store status queries.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store not found: {0}")]
    NotFound(String),

    #[error("store status query failed: {0}")]
    QueryFailed(String),
}
