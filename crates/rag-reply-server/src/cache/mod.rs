//! Tenant-scoped read-through cache
//!
//! Backends: redis (shared), in-process DashMap, or disabled. The store stays the
//! source of truth; the cache only ever saves latency.

pub mod backend;
mod read_through;

pub use backend::{CacheBackend, DisabledBackend, MemoryBackend, RedisBackend};
pub use read_through::{CacheHealth, Namespace, TenantCache};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{CacheBackendKind, CacheConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Backend selected by `cache.backend`. An unreachable redis is not a startup
/// failure: it degrades to the disabled backend.
pub async fn connect_backend(config: &CacheConfig) -> Arc<dyn CacheBackend> {
    match config.backend {
        CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
        CacheBackendKind::Disabled => Arc::new(DisabledBackend),
        CacheBackendKind::Redis if config.redis_url.trim().is_empty() => {
            warn!("cache.redis_url is empty, running without cache");
            Arc::new(DisabledBackend)
        }
        CacheBackendKind::Redis => {
            let connect = RedisBackend::connect(&config.redis_url, config.scan_count);
            match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                Ok(Ok(backend)) => {
                    info!(prefix = %config.key_prefix, "Redis cache enabled");
                    Arc::new(backend)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Redis unavailable, running without cache");
                    Arc::new(DisabledBackend)
                }
                Err(_) => {
                    warn!("Redis connection timed out, running without cache");
                    Arc::new(DisabledBackend)
                }
            }
        }
    }
}
