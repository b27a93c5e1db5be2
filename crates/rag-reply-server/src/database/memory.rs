//! In-memory `Store` used by the test suite.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::models::*;
use super::repository::Store;
use crate::error::StoreError;
use crate::models::{Channel, MessageKey};
use crate::services::conversation::ConversationSession;
use crate::utils::similarity::cosine_similarity;

#[derive(Debug, Clone)]
pub struct StoredAppointment {
    pub id: i64,
    pub appointment: NewAppointment,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    channels: HashMap<(Channel, String), String>,
    tenants: HashMap<String, TenantConfig>,
    faqs: Vec<KnowledgeEntry>,
    messages: Vec<NewMessage>,
    sessions: HashMap<(String, String), ConversationSession>,
    blocks: Vec<UnavailabilityBlock>,
    appointments: Vec<StoredAppointment>,
    usage: Vec<NewUsageRecord>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn has_delivery(&self, key: &MessageKey) -> bool {
        self.messages.iter().any(|m| {
            m.tenant_id == key.tenant_id
                && m.channel == key.channel
                && m.sender == key.sender
                && m.channel_message_id.as_deref() == Some(key.channel_message_id.as_str())
        })
    }

    fn has_usage(&self, record: &NewUsageRecord) -> bool {
        self.usage.iter().any(|u| {
            u.tenant_id == record.tenant_id
                && u.message_ref == record.message_ref
                && u.direction == record.direction
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    pub tenant_reads: AtomicUsize,
    pub knowledge_reads: AtomicUsize,
    pub session_loads: AtomicUsize,
    failing_commits: AtomicUsize,
    failing_usage_inserts: AtomicUsize,
    stale_sessions: AtomicUsize,
    session_gate: Mutex<Option<SessionGate>>,
    offline: AtomicBool,
}

/// Holds the next session load until released.
#[derive(Clone, Default)]
pub struct SessionGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- seeding -----

    pub fn add_tenant(&self, config: TenantConfig) {
        let mut tables = self.tables.lock().unwrap();
        for binding in &config.channels {
            tables
                .channels
                .insert((binding.channel, binding.external_id.clone()), config.id.clone());
        }
        tables.tenants.insert(config.id.clone(), config);
    }

    pub fn update_tenant(&self, config: TenantConfig) {
        self.add_tenant(config);
    }

    pub fn add_knowledge(
        &self,
        tenant_id: &str,
        question: &str,
        answer: &str,
        embedding: Option<Vec<f32>>,
    ) -> i64 {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_id();
        tables.faqs.push(KnowledgeEntry {
            id,
            tenant_id: tenant_id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            embedding,
        });
        id
    }

    pub fn add_appointment(&self, appointment: NewAppointment) -> i64 {
        let mut tables = self.tables.lock().unwrap();
        let id = tables.next_id();
        tables.appointments.push(StoredAppointment { id, appointment });
        id
    }

    pub fn put_session(&self, session: ConversationSession) {
        let mut tables = self.tables.lock().unwrap();
        tables
            .sessions
            .insert((session.tenant_id.clone(), session.sender.clone()), session);
    }

    // ----- failure injection -----

    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_usage_inserts(&self, count: usize) {
        self.failing_usage_inserts.store(count, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }

    /// The next session load parks until `release` is notified.
    pub fn gate_next_session_load(&self) -> SessionGate {
        let gate = SessionGate::default();
        *self.session_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// The next `n` session loads are followed by a concurrent writer bumping
    /// the stored version, so their commit loses the compare-and-swap.
    pub fn bump_after_next_session_loads(&self, n: usize) {
        self.stale_sessions.store(n, Ordering::SeqCst);
    }

    // ----- inspection -----

    pub fn messages(&self) -> Vec<NewMessage> {
        self.tables.lock().unwrap().messages.clone()
    }

    pub fn usage(&self) -> Vec<NewUsageRecord> {
        self.tables.lock().unwrap().usage.clone()
    }

    pub fn blocks(&self) -> Vec<UnavailabilityBlock> {
        self.tables.lock().unwrap().blocks.clone()
    }

    pub fn appointments(&self) -> Vec<StoredAppointment> {
        self.tables.lock().unwrap().appointments.clone()
    }

    pub fn session(&self, tenant_id: &str, sender: &str) -> Option<ConversationSession> {
        self.tables
            .lock()
            .unwrap()
            .sessions
            .get(&(tenant_id.to_string(), sender.to_string()))
            .cloned()
    }

    pub fn embedding_of(&self, entry_id: i64) -> Option<Vec<f32>> {
        self.tables
            .lock()
            .unwrap()
            .faqs
            .iter()
            .find(|entry| entry.id == entry_id)
            .and_then(|entry| entry.embedding.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn find_tenant_by_channel(
        &self,
        channel: Channel,
        external_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.channels.get(&(channel, external_id.to_string())).cloned())
    }

    async fn load_tenant_config(&self, tenant_id: &str) -> Result<Option<TenantConfig>, StoreError> {
        self.check_online()?;
        self.tenant_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().tenants.get(tenant_id).cloned())
    }

    async fn list_knowledge(&self, tenant_id: &str) -> Result<Vec<KnowledgeSummary>, StoreError> {
        self.check_online()?;
        self.knowledge_reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .faqs
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| KnowledgeSummary {
                id: entry.id,
                question: entry.question.clone(),
                answer: entry.answer.clone(),
                searchable: entry.embedding.is_some(),
            })
            .collect())
    }

    async fn search_knowledge(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().unwrap();
        let mut scored: Vec<ScoredEntry> = tables
            .faqs
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .filter_map(|entry| {
                let vector = entry.embedding.as_ref()?;
                let score = cosine_similarity(vector, embedding)?;
                Some(ScoredEntry {
                    entry: KnowledgeSummary {
                        id: entry.id,
                        question: entry.question.clone(),
                        answer: entry.answer.clone(),
                        searchable: true,
                    },
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn entries_missing_embedding(
        &self,
        tenant_id: Option<&str>,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .faqs
            .iter()
            .filter(|entry| entry.embedding.is_none() && entry.id > after_id)
            .filter(|entry| tenant_id.map_or(true, |id| entry.tenant_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_embedding(&self, entry_id: i64, embedding: &[f32]) -> Result<(), StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(entry) = tables.faqs.iter_mut().find(|entry| entry.id == entry_id) {
            entry.embedding = Some(embedding.to_vec());
        }
        Ok(())
    }

    async fn message_exists(&self, key: &MessageKey) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(self.tables.lock().unwrap().has_delivery(key))
    }

    async fn recent_messages(
        &self,
        tenant_id: &str,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().unwrap();
        let thread: Vec<HistoryMessage> = tables
            .messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.sender == sender)
            .map(|m| HistoryMessage {
                role: m.role,
                text: m.text.clone(),
                ts: m.ts,
            })
            .collect();
        let skip = thread.len().saturating_sub(limit);
        Ok(thread.into_iter().skip(skip).collect())
    }

    async fn load_or_create_session(
        &self,
        tenant_id: &str,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession, StoreError> {
        self.check_online()?;
        self.session_loads.fetch_add(1, Ordering::SeqCst);
        let loaded = {
            let mut tables = self.tables.lock().unwrap();
            let stored = tables
                .sessions
                .entry((tenant_id.to_string(), sender.to_string()))
                .or_insert_with(|| ConversationSession::idle(tenant_id, sender, now));
            let loaded = stored.clone();
            if Self::take_failure(&self.stale_sessions) {
                stored.version += 1;
            }
            loaded
        };

        let gate = self.session_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        Ok(loaded)
    }

    async fn overlapping_unavailability(
        &self,
        tenant_id: &str,
        starts_on: NaiveDate,
        ends_on: NaiveDate,
    ) -> Result<Vec<UnavailabilityBlock>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .blocks
            .iter()
            .filter(|b| b.tenant_id == tenant_id && b.starts_on <= ends_on && b.ends_on >= starts_on)
            .cloned()
            .collect())
    }

    async fn slot_taken(&self, tenant_id: &str, starts_at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.appointments.iter().any(|stored| {
            stored.appointment.tenant_id == tenant_id
                && stored.appointment.starts_at == starts_at
                && stored.appointment.status != AppointmentStatus::Cancelled
        }))
    }

    async fn commit_exchange(&self, write: &ExchangeWrite) -> Result<ExchangeCommit, StoreError> {
        self.check_online()?;
        if Self::take_failure(&self.failing_commits) {
            return Err(unavailable());
        }

        let mut tables = self.tables.lock().unwrap();

        let inbound = &write.inbound;
        let duplicate = inbound.channel_message_id.as_ref().is_some_and(|id| {
            tables.has_delivery(&MessageKey {
                tenant_id: inbound.tenant_id.clone(),
                channel: inbound.channel,
                sender: inbound.sender.clone(),
                channel_message_id: id.clone(),
            })
        });
        if duplicate {
            return Ok(ExchangeCommit::Duplicate);
        }

        // Validate everything before touching the tables so a failure leaves no trace.
        if let Some(session) = &write.session {
            let key = (session.tenant_id.clone(), session.sender.clone());
            let current = tables.sessions.get(&key).map(|s| s.version).unwrap_or(0);
            if current != session.version {
                return Err(StoreError::VersionConflict {
                    tenant_id: session.tenant_id.clone(),
                    sender: session.sender.clone(),
                });
            }
        }
        if let ExchangeEffect::Appointment(appointment) = &write.effect {
            let taken = tables.appointments.iter().any(|stored| {
                stored.appointment.tenant_id == appointment.tenant_id
                    && stored.appointment.starts_at == appointment.starts_at
                    && stored.appointment.status != AppointmentStatus::Cancelled
            });
            if taken {
                return Err(StoreError::SlotTaken);
            }
        }

        tables.messages.push(write.inbound.clone());

        if let Some(session) = &write.session {
            let mut saved = session.clone();
            saved.version += 1;
            tables
                .sessions
                .insert((saved.tenant_id.clone(), saved.sender.clone()), saved);
        }

        let effect_id = match &write.effect {
            ExchangeEffect::None => None,
            ExchangeEffect::Unavailability(block) => {
                let id = tables.next_id();
                tables.blocks.push(UnavailabilityBlock {
                    id,
                    tenant_id: block.tenant_id.clone(),
                    owner_phone: block.owner_phone.clone(),
                    starts_on: block.starts_on,
                    ends_on: block.ends_on,
                });
                Some(id)
            }
            ExchangeEffect::Appointment(appointment) => {
                let id = tables.next_id();
                tables.appointments.push(StoredAppointment {
                    id,
                    appointment: appointment.clone(),
                });
                Some(id)
            }
        };

        tables.messages.push(write.outbound.clone());
        for record in &write.usage {
            if !tables.has_usage(record) {
                tables.usage.push(record.clone());
            }
        }

        Ok(ExchangeCommit::Committed { effect_id })
    }

    async fn insert_usage(&self, record: &NewUsageRecord) -> Result<bool, StoreError> {
        self.check_online()?;
        if Self::take_failure(&self.failing_usage_inserts) {
            return Err(unavailable());
        }
        let mut tables = self.tables.lock().unwrap();
        if tables.has_usage(record) {
            return Ok(false);
        }
        tables.usage.push(record.clone());
        Ok(true)
    }
}
