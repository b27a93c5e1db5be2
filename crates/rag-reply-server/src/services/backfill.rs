use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::cache::{Namespace, TenantCache};
use crate::database::{KnowledgeEntry, Store};
use crate::error::StoreError;
use crate::services::embedding_service::EmbeddingProvider;

/// Embeds knowledge entries created without a vector.
///
/// Runs walk the pending entries by id and wrap around once the tail is
/// reached, so entries that keep failing never hold back the ones after them.
pub struct EmbeddingBackfill {
    store: Arc<dyn Store>,
    cache: TenantCache,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    cursor: AtomicI64,
}

impl EmbeddingBackfill {
    pub fn new(
        store: Arc<dyn Store>,
        cache: TenantCache,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            cache,
            embedder,
            batch_size: batch_size.max(1),
            cursor: AtomicI64::new(0),
        }
    }

    /// Embed up to one batch of entries missing a vector, optionally for one tenant.
    /// Per-entry failures are logged and skipped. Returns how many were updated.
    pub async fn backfill_missing_embeddings(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let pending = self.next_batch(tenant_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!(count = pending.len(), tenant_id = ?tenant_id, "Backfilling knowledge embeddings");
        let mut updated = 0;
        let mut touched = BTreeSet::new();

        for entry in pending {
            let input = format!("{}\n\n{}", entry.question, entry.answer);
            let embedding = match self.embedder.embed(&input).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    error!(entry_id = entry.id, tenant_id = %entry.tenant_id, error = %e, "Embedding backfill failed");
                    continue;
                }
            };
            if let Err(e) = self.store.set_embedding(entry.id, &embedding).await {
                error!(entry_id = entry.id, tenant_id = %entry.tenant_id, error = %e, "Storing backfilled embedding failed");
                continue;
            }
            updated += 1;
            touched.insert(entry.tenant_id);
        }

        for tenant in &touched {
            self.cache.invalidate(tenant, Some(Namespace::Knowledge)).await;
        }

        info!(updated, tenants = touched.len(), "Embedding backfill completed");
        Ok(updated)
    }

    async fn next_batch(&self, tenant_id: Option<&str>) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let after = self.cursor.load(Ordering::SeqCst);
        let mut batch = self
            .store
            .entries_missing_embedding(tenant_id, after, self.batch_size)
            .await?;
        if batch.is_empty() && after > 0 {
            batch = self
                .store
                .entries_missing_embedding(tenant_id, 0, self.batch_size)
                .await?;
        }

        let next = match batch.last() {
            Some(last) if batch.len() == self.batch_size => last.id,
            _ => 0,
        };
        self.cursor.store(next, Ordering::SeqCst);
        Ok(batch)
    }
}
