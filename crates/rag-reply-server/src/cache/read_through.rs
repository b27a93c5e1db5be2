use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::database::{KnowledgeSummary, Store, TenantConfig};
use crate::error::{CacheError, StoreError};

/// Per-tenant cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Config,
    Knowledge,
    RagContext,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Knowledge => "faqs",
            Self::RagContext => "rag",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheHealth {
    pub backend: &'static str,
    pub reachable: bool,
    pub latency_ms: Option<f64>,
}

/// Read-through cache in front of the store.
///
/// Every key lives under `{prefix}:tenant:{id}:`. Backend failures are logged
/// and turned into misses, so callers only ever see store errors.
#[derive(Clone)]
pub struct TenantCache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    ttl_config: Duration,
    ttl_knowledge: Duration,
    op_timeout: Duration,
}

impl TenantCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            prefix: config.key_prefix.clone(),
            ttl_config: Duration::from_secs(config.ttl_config_secs),
            ttl_knowledge: Duration::from_secs(config.ttl_knowledge_secs),
            op_timeout: config.op_timeout(),
        }
    }

    pub fn tenant_prefix(&self, tenant_id: &str) -> String {
        format!("{}:tenant:{}:", self.prefix, tenant_id)
    }

    pub fn key(&self, tenant_id: &str, namespace: Namespace, key: &str) -> String {
        format!("{}{}:{}", self.tenant_prefix(tenant_id), namespace.as_str(), key)
    }

    async fn guarded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.op_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout)?
    }

    /// Cached value, `None` on miss or on any backend failure.
    pub async fn get<T: DeserializeOwned>(
        &self,
        tenant_id: &str,
        namespace: Namespace,
        key: &str,
    ) -> Option<T> {
        let full_key = self.key(tenant_id, namespace, key);
        let raw = match self.guarded(self.backend.get(&full_key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed, falling back to store");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %full_key, error = %e, "Dropping undecodable cache entry");
                None
            }
        }
    }

    /// Best-effort write.
    pub async fn set<T: Serialize>(
        &self,
        tenant_id: &str,
        namespace: Namespace,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        let full_key = self.key(tenant_id, namespace, key);
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache payload not serializable");
                return;
            }
        };

        if let Err(e) = self.guarded(self.backend.set(&full_key, &payload, ttl)).await {
            warn!(key = %full_key, error = %e, "Cache write failed");
        }
    }

    async fn read_through<T, F, Fut>(
        &self,
        tenant_id: &str,
        namespace: Namespace,
        ttl: Duration,
        load: F,
    ) -> Result<Option<T>, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, StoreError>>,
    {
        if let Some(hit) = self.get(tenant_id, namespace, "v1").await {
            debug!(tenant_id, namespace = namespace.as_str(), "Cache hit");
            return Ok(Some(hit));
        }

        let loaded = load().await?;
        if let Some(value) = &loaded {
            self.set(tenant_id, namespace, "v1", value, ttl).await;
        }
        Ok(loaded)
    }

    /// Tenant configuration; unknown tenants are not cached.
    pub async fn tenant_config(
        &self,
        store: &dyn Store,
        tenant_id: &str,
    ) -> Result<Option<TenantConfig>, StoreError> {
        self.read_through(tenant_id, Namespace::Config, self.ttl_config, || {
            store.load_tenant_config(tenant_id)
        })
        .await
    }

    pub async fn knowledge(
        &self,
        store: &dyn Store,
        tenant_id: &str,
    ) -> Result<Vec<KnowledgeSummary>, StoreError> {
        let entries = self
            .read_through(tenant_id, Namespace::Knowledge, self.ttl_knowledge, || async {
                store.list_knowledge(tenant_id).await.map(Some)
            })
            .await?;
        Ok(entries.unwrap_or_default())
    }

    /// Evict a tenant's namespace, or the whole tenant subtree when `namespace` is `None`.
    /// Never fails: eviction errors are logged.
    pub async fn invalidate(&self, tenant_id: &str, namespace: Option<Namespace>) {
        let prefix = match namespace {
            Some(ns) => format!("{}{}:", self.tenant_prefix(tenant_id), ns.as_str()),
            None => self.tenant_prefix(tenant_id),
        };

        match self.guarded(self.backend.delete_prefix(&prefix)).await {
            Ok(removed) => debug!(tenant_id, removed, "Cache invalidated"),
            Err(e) => warn!(tenant_id, error = %e, "Cache invalidation failed"),
        }
    }

    pub async fn health(&self) -> CacheHealth {
        let started = Instant::now();
        let result = self.guarded(self.backend.ping()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        CacheHealth {
            backend: self.backend.name(),
            reachable: result.is_ok(),
            latency_ms: result.is_ok().then_some(latency_ms),
        }
    }
}
