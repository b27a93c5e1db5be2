//! Usage ledger: token accounting rows per exchange.
//!
//! Rows normally ride in the exchange transaction (`ExchangeWrite::usage`).
//! When that transaction fails, `record_all` writes them on their own so the
//! accounting survives; duplicates are absorbed by the `(message_ref, direction)`
//! uniqueness constraint.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::database::{NewUsageRecord, Store, UsageDirection, UsageStatus};
use crate::services::rag_service::UsageDraft;

fn saturating_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub struct UsageLedger {
    store: Arc<dyn Store>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Inbound row (always zero tokens) plus the outbound row carrying the draft.
    pub fn exchange_records(
        tenant_id: &str,
        message_ref: &str,
        trace_id: &str,
        draft: &UsageDraft,
    ) -> Vec<NewUsageRecord> {
        let inbound = NewUsageRecord {
            tenant_id: tenant_id.to_string(),
            message_ref: message_ref.to_string(),
            direction: UsageDirection::Inbound,
            prompt_tokens: 0,
            completion_tokens: 0,
            model: String::new(),
            trace_id: Some(trace_id.to_string()),
            status: UsageStatus::Ok,
        };
        let outbound = NewUsageRecord {
            direction: UsageDirection::Outbound,
            prompt_tokens: saturating_i32(draft.prompt_tokens),
            completion_tokens: saturating_i32(draft.completion_tokens),
            model: draft.model.clone(),
            status: draft.status,
            ..inbound.clone()
        };
        vec![inbound, outbound]
    }

    /// Write one row, retrying once. Returns whether the row is now stored
    /// (a row already present counts). A second failure is logged as an
    /// accounting gap and never propagated.
    pub async fn record(&self, record: &NewUsageRecord) -> bool {
        for attempt in 1..=2u32 {
            match self.store.insert_usage(record).await {
                Ok(inserted) => {
                    debug!(
                        tenant_id = %record.tenant_id,
                        message_ref = %record.message_ref,
                        direction = record.direction.as_str(),
                        inserted,
                        "Usage recorded"
                    );
                    return true;
                }
                Err(e) if attempt == 1 => {
                    warn!(
                        tenant_id = %record.tenant_id,
                        message_ref = %record.message_ref,
                        error = %e,
                        "Usage write failed, retrying once"
                    );
                }
                Err(e) => {
                    error!(
                        tenant_id = %record.tenant_id,
                        message_ref = %record.message_ref,
                        direction = record.direction.as_str(),
                        prompt_tokens = record.prompt_tokens,
                        completion_tokens = record.completion_tokens,
                        total_tokens = record.total_tokens(),
                        status = record.status.as_str(),
                        error = %e,
                        "Accounting gap: usage row lost"
                    );
                }
            }
        }
        false
    }

    /// Number of rows stored.
    pub async fn record_all(&self, records: &[NewUsageRecord]) -> usize {
        let mut stored = 0;
        for record in records {
            if self.record(record).await {
                stored += 1;
            }
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;

    fn draft() -> UsageDraft {
        UsageDraft {
            prompt_tokens: 210,
            completion_tokens: 35,
            model: "gpt-4.1-nano".into(),
            status: UsageStatus::Ok,
        }
    }

    #[test]
    fn test_exchange_records_shape() {
        let records = UsageLedger::exchange_records("t1", "wamid.1", "trace-9", &draft());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].direction, UsageDirection::Inbound);
        assert_eq!(records[0].total_tokens(), 0);
        assert_eq!(records[1].direction, UsageDirection::Outbound);
        assert_eq!(records[1].total_tokens(), 245);
        assert_eq!(records[1].trace_id.as_deref(), Some("trace-9"));

        let failed = UsageLedger::exchange_records("t1", "wamid.2", "trace-9", &UsageDraft::failed());
        assert_eq!(failed[1].status, UsageStatus::Failed);
        assert_eq!(failed[1].total_tokens(), 0);
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let ledger = UsageLedger::new(store.clone());
        let records = UsageLedger::exchange_records("t1", "wamid.1", "trace-1", &draft());

        assert_eq!(ledger.record_all(&records).await, 2);
        assert_eq!(ledger.record_all(&records).await, 2);
        assert_eq!(store.usage().len(), 2);
    }

    #[tokio::test]
    async fn test_single_failure_is_retried() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_usage_inserts(1);
        let ledger = UsageLedger::new(store.clone());
        let records = UsageLedger::exchange_records("t1", "wamid.1", "trace-1", &draft());

        assert!(ledger.record(&records[1]).await);
        assert_eq!(store.usage().len(), 1);
    }

    #[tokio::test]
    async fn test_second_failure_is_an_accounting_gap() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_usage_inserts(2);
        let ledger = UsageLedger::new(store.clone());
        let records = UsageLedger::exchange_records("t1", "wamid.1", "trace-1", &draft());

        assert!(!ledger.record(&records[1]).await);
        assert!(store.usage().is_empty());
    }
}
