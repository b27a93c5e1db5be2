use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::cache::TenantCache;
use crate::database::{normalize_tenant_id, Store, TenantConfig};
use crate::error::StoreError;
use crate::models::Channel;
use crate::services::conversation::{ConversationSession, SessionState};

/// Maps a channel identity to the tenant it belongs to.
#[derive(Clone)]
pub struct TenantResolver {
    store: Arc<dyn Store>,
    cache: TenantCache,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn Store>, cache: TenantCache) -> Self {
        Self { store, cache }
    }

    /// Channel binding first, then the external id itself as a (legacy) tenant id.
    /// `None` when no tenant matches.
    pub async fn resolve_tenant(
        &self,
        channel: Channel,
        external_id: &str,
    ) -> Result<Option<TenantConfig>, StoreError> {
        let external_id = external_id.trim();
        let tenant_id = match self.store.find_tenant_by_channel(channel, external_id).await? {
            Some(id) => id,
            None => match normalize_tenant_id(external_id) {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        self.cache.tenant_config(self.store.as_ref(), &tenant_id).await
    }
}

/// One async mutex per (tenant, sender).
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of the key. Released when the guard drops.
    pub async fn lock(&self, tenant_id: &str, sender: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry((tenant_id.to_string(), sender.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub session: ConversationSession,
    /// An active wizard timed out and was reset to idle.
    pub expired: bool,
}

/// Session lookup plus the per-key serialization point.
pub struct SessionRegistry {
    store: Arc<dyn Store>,
    timeout: Duration,
    locks: KeyedLocks,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn Store>, timeout_secs: i64) -> Self {
        Self {
            store,
            timeout: Duration::seconds(timeout_secs.max(0)),
            locks: KeyedLocks::new(),
        }
    }

    pub async fn lock(&self, tenant_id: &str, sender: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(tenant_id, sender).await
    }

    pub fn prune_locks(&self) -> usize {
        let removed = self.locks.prune();
        if removed > 0 {
            debug!(removed, remaining = self.locks.len(), "Pruned idle session locks");
        }
        removed
    }

    /// Never returns a missing session. Call while holding the key's lock.
    pub async fn resolve_session(
        &self,
        tenant_id: &str,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedSession, StoreError> {
        let session = self.store.load_or_create_session(tenant_id, sender, now).await?;

        if session.is_expired(now, self.timeout) {
            info!(
                tenant_id,
                sender,
                state = session.state.tag(),
                "Session timed out, resetting to idle"
            );
            return Ok(ResolvedSession {
                session: session.with_state(SessionState::Idle, None, now),
                expired: true,
            });
        }

        Ok(ResolvedSession {
            session,
            expired: false,
        })
    }
}
