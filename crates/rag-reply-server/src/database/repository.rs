use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pgvector::Vector;
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, warn};

use super::models::{
    ChannelCredential, ExchangeCommit, ExchangeEffect, ExchangeWrite, HistoryMessage,
    KnowledgeEntry, KnowledgeSummary, LanguagePolicy, MessageRole, NewMessage, NewUsageRecord,
    ScoredEntry, TenantConfig, TenantRow, UnavailabilityBlock,
};
use super::DbPool;
use crate::error::StoreError;
use crate::models::{Channel, MessageKey};
use crate::services::conversation::{ConversationSession, SessionState};
use crate::utils::similarity::score_from_distance;

/// Relational store used by the pipeline. The only source of truth.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Tenant id bound to a channel identity, if any.
    async fn find_tenant_by_channel(
        &self,
        channel: Channel,
        external_id: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn load_tenant_config(&self, tenant_id: &str) -> Result<Option<TenantConfig>, StoreError>;

    async fn list_knowledge(&self, tenant_id: &str) -> Result<Vec<KnowledgeSummary>, StoreError>;

    /// Searchable entries nearest to `embedding`, best first.
    async fn search_knowledge(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError>;

    /// Entries without a vector and an id above `after_id`, in id order.
    async fn entries_missing_embedding(
        &self,
        tenant_id: Option<&str>,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, StoreError>;

    async fn set_embedding(&self, entry_id: i64, embedding: &[f32]) -> Result<(), StoreError>;

    /// Whether the inbound delivery identified by `key` was already committed.
    async fn message_exists(&self, key: &MessageKey) -> Result<bool, StoreError>;

    /// Latest messages of a thread, oldest first.
    async fn recent_messages(
        &self,
        tenant_id: &str,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, StoreError>;

    /// Stored session, created idle on first observation.
    async fn load_or_create_session(
        &self,
        tenant_id: &str,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession, StoreError>;

    async fn overlapping_unavailability(
        &self,
        tenant_id: &str,
        starts_on: NaiveDate,
        ends_on: NaiveDate,
    ) -> Result<Vec<UnavailabilityBlock>, StoreError>;

    /// Whether a non-cancelled appointment holds the slot.
    async fn slot_taken(&self, tenant_id: &str, starts_at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Write the whole exchange in one transaction.
    ///
    /// `StoreError::SlotTaken` and `StoreError::VersionConflict` roll everything back.
    async fn commit_exchange(&self, write: &ExchangeWrite) -> Result<ExchangeCommit, StoreError>;

    /// Insert one usage row. `false` when it was already recorded.
    async fn insert_usage(&self, record: &NewUsageRecord) -> Result<bool, StoreError>;
}

#[derive(FromRow)]
struct SessionRow {
    tenant_id: String,
    sender: String,
    state: String,
    pending_start: Option<NaiveDate>,
    pending_end: Option<NaiveDate>,
    lang: Option<String>,
    last_activity: DateTime<Utc>,
    version: i64,
}

impl TryFrom<SessionRow> for ConversationSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let state = SessionState::from_parts(&row.state, row.pending_start, row.pending_end)
            .ok_or_else(|| {
                StoreError::Invalid(format!(
                    "session {}/{} has inconsistent state '{}'",
                    row.tenant_id, row.sender, row.state
                ))
            })?;

        Ok(Self {
            tenant_id: row.tenant_id,
            sender: row.sender,
            state,
            lang: row.lang,
            last_activity: row.last_activity,
            version: row.version,
        })
    }
}

pub struct PgRepository {
    pub pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_message(
        tx: &mut Transaction<'_, Postgres>,
        message: &NewMessage,
    ) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO messages
                   (tenant_id, channel, sender, role, text, channel_message_id,
                    prompt_tokens, completion_tokens, ts)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (tenant_id, channel, sender, channel_message_id) DO NOTHING
               RETURNING id"#,
        )
        .bind(&message.tenant_id)
        .bind(message.channel.as_str())
        .bind(&message.sender)
        .bind(message.role.as_str())
        .bind(&message.text)
        .bind(&message.channel_message_id)
        .bind(message.prompt_tokens)
        .bind(message.completion_tokens)
        .bind(message.ts)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(id)
    }

    async fn save_session(
        tx: &mut Transaction<'_, Postgres>,
        session: &ConversationSession,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE conversation_sessions
               SET state = $3, pending_start = $4, pending_end = $5, lang = $6,
                   last_activity = $7, version = version + 1
               WHERE tenant_id = $1 AND sender = $2 AND version = $8"#,
        )
        .bind(&session.tenant_id)
        .bind(&session.sender)
        .bind(session.state.tag())
        .bind(session.state.pending_start())
        .bind(session.state.pending_end())
        .bind(&session.lang)
        .bind(session.last_activity)
        .bind(session.version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict {
                tenant_id: session.tenant_id.clone(),
                sender: session.sender.clone(),
            });
        }
        Ok(())
    }

    async fn insert_usage_in(
        executor: &mut sqlx::PgConnection,
        record: &NewUsageRecord,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO usage
                   (tenant_id, message_ref, direction, prompt_tokens, completion_tokens,
                    total_tokens, model, trace_id, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (tenant_id, message_ref, direction) DO NOTHING"#,
        )
        .bind(&record.tenant_id)
        .bind(&record.message_ref)
        .bind(record.direction.as_str())
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.total_tokens())
        .bind(&record.model)
        .bind(&record.trace_id)
        .bind(record.status.as_str())
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Store for PgRepository {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(self.pool.get_pool()).await?;
        Ok(())
    }

    async fn find_tenant_by_channel(
        &self,
        channel: Channel,
        external_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let tenant_id = sqlx::query_scalar::<_, String>(
            "SELECT tenant_id FROM tenant_channels WHERE channel = $1 AND external_id = $2",
        )
        .bind(channel.as_str())
        .bind(external_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(tenant_id)
    }

    async fn load_tenant_config(&self, tenant_id: &str) -> Result<Option<TenantConfig>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, system_prompt, language_policy, ai_enabled FROM tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let owner_phones = sqlx::query_scalar::<_, String>(
            "SELECT phone_number FROM owner_contacts WHERE tenant_id = $1 ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        let channel_rows = sqlx::query_as::<_, (String, String, Option<String>)>(
            r#"SELECT channel, external_id, credential FROM tenant_channels
               WHERE tenant_id = $1 ORDER BY channel, external_id"#,
        )
        .bind(tenant_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        let mut channels = Vec::with_capacity(channel_rows.len());
        for (channel, external_id, credential) in channel_rows {
            match Channel::parse(&channel) {
                Some(channel) => channels.push(ChannelCredential {
                    channel,
                    external_id,
                    credential,
                }),
                None => warn!(tenant_id, channel = %channel, "Ignoring unknown channel binding"),
            }
        }

        Ok(Some(TenantConfig {
            id: row.id,
            system_prompt: row.system_prompt,
            language_policy: LanguagePolicy::from(row.language_policy),
            ai_enabled: row.ai_enabled,
            owner_phones: owner_phones
                .iter()
                .map(|phone| super::models::normalize_phone(phone))
                .collect(),
            channels,
        }))
    }

    async fn list_knowledge(&self, tenant_id: &str) -> Result<Vec<KnowledgeSummary>, StoreError> {
        let entries = sqlx::query_as::<_, KnowledgeSummary>(
            r#"SELECT id, question, answer, (embedding IS NOT NULL) AS searchable
               FROM faqs WHERE tenant_id = $1 ORDER BY id"#,
        )
        .bind(tenant_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(entries)
    }

    async fn search_knowledge(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        #[derive(FromRow)]
        struct ScoredRow {
            id: i64,
            question: String,
            answer: String,
            distance: f64,
        }

        let rows = sqlx::query_as::<_, ScoredRow>(
            r#"SELECT id, question, answer, (embedding <=> $2)::float8 AS distance
               FROM faqs
               WHERE tenant_id = $1 AND embedding IS NOT NULL
               ORDER BY embedding <=> $2, id
               LIMIT $3"#,
        )
        .bind(tenant_id)
        .bind(Vector::from(embedding.to_vec()))
        .bind(limit as i64)
        .persistent(false)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!(tenant_id, found = rows.len(), "Knowledge search");

        Ok(rows
            .into_iter()
            .map(|row| ScoredEntry {
                score: score_from_distance(row.distance),
                entry: KnowledgeSummary {
                    id: row.id,
                    question: row.question,
                    answer: row.answer,
                    searchable: true,
                },
            })
            .collect())
    }

    async fn entries_missing_embedding(
        &self,
        tenant_id: Option<&str>,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            r#"SELECT id, tenant_id, question, answer FROM faqs
               WHERE embedding IS NULL AND id > $2
                 AND ($1::text IS NULL OR tenant_id = $1)
               ORDER BY id
               LIMIT $3"#,
        )
        .bind(tenant_id)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, tenant_id, question, answer)| KnowledgeEntry {
                id,
                tenant_id,
                question,
                answer,
                embedding: None,
            })
            .collect())
    }

    async fn set_embedding(&self, entry_id: i64, embedding: &[f32]) -> Result<(), StoreError> {
        sqlx::query("UPDATE faqs SET embedding = $2 WHERE id = $1")
            .bind(entry_id)
            .bind(Vector::from(embedding.to_vec()))
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    async fn message_exists(&self, key: &MessageKey) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM messages
                   WHERE tenant_id = $1 AND channel = $2 AND sender = $3
                     AND channel_message_id = $4)"#,
        )
        .bind(&key.tenant_id)
        .bind(key.channel.as_str())
        .bind(&key.sender)
        .bind(&key.channel_message_id)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(exists)
    }

    async fn recent_messages(
        &self,
        tenant_id: &str,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            r#"SELECT role, text, ts FROM messages
               WHERE tenant_id = $1 AND sender = $2
               ORDER BY ts DESC, id DESC
               LIMIT $3"#,
        )
        .bind(tenant_id)
        .bind(sender)
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(role, text, ts)| HistoryMessage {
                role: MessageRole::parse(&role),
                text,
                ts,
            })
            .collect())
    }

    async fn load_or_create_session(
        &self,
        tenant_id: &str,
        sender: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession, StoreError> {
        sqlx::query(
            r#"INSERT INTO conversation_sessions (tenant_id, sender, state, last_activity, version)
               VALUES ($1, $2, 'idle', $3, 0)
               ON CONFLICT (tenant_id, sender) DO NOTHING"#,
        )
        .bind(tenant_id)
        .bind(sender)
        .bind(now)
        .execute(self.pool.get_pool())
        .await?;

        let row = sqlx::query_as::<_, SessionRow>(
            r#"SELECT tenant_id, sender, state, pending_start, pending_end, lang,
                      last_activity, version
               FROM conversation_sessions
               WHERE tenant_id = $1 AND sender = $2"#,
        )
        .bind(tenant_id)
        .bind(sender)
        .fetch_one(self.pool.get_pool())
        .await?;

        ConversationSession::try_from(row)
    }

    async fn overlapping_unavailability(
        &self,
        tenant_id: &str,
        starts_on: NaiveDate,
        ends_on: NaiveDate,
    ) -> Result<Vec<UnavailabilityBlock>, StoreError> {
        let blocks = sqlx::query_as::<_, UnavailabilityBlock>(
            r#"SELECT id, tenant_id, owner_phone, starts_on, ends_on
               FROM unavailability
               WHERE tenant_id = $1 AND starts_on <= $3 AND ends_on >= $2
               ORDER BY starts_on, id"#,
        )
        .bind(tenant_id)
        .bind(starts_on)
        .bind(ends_on)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(blocks)
    }

    async fn slot_taken(&self, tenant_id: &str, starts_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let taken = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM appointments
                   WHERE tenant_id = $1 AND starts_at = $2 AND status <> 'cancelled')"#,
        )
        .bind(tenant_id)
        .bind(starts_at)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(taken)
    }

    async fn commit_exchange(&self, write: &ExchangeWrite) -> Result<ExchangeCommit, StoreError> {
        let mut transaction = self.pool.get_pool().begin().await?;

        // Dropping the transaction on any early return rolls it back.
        if Self::insert_message(&mut transaction, &write.inbound).await?.is_none() {
            return Ok(ExchangeCommit::Duplicate);
        }

        if let Some(session) = &write.session {
            Self::save_session(&mut transaction, session).await?;
        }

        let effect_id = match &write.effect {
            ExchangeEffect::None => None,
            ExchangeEffect::Unavailability(block) => {
                let id = sqlx::query_scalar::<_, i64>(
                    r#"INSERT INTO unavailability (tenant_id, owner_phone, starts_on, ends_on)
                       VALUES ($1, $2, $3, $4)
                       RETURNING id"#,
                )
                .bind(&block.tenant_id)
                .bind(&block.owner_phone)
                .bind(block.starts_on)
                .bind(block.ends_on)
                .fetch_one(&mut *transaction)
                .await?;
                Some(id)
            }
            ExchangeEffect::Appointment(appointment) => {
                let id = sqlx::query_scalar::<_, i64>(
                    r#"INSERT INTO appointments
                           (tenant_id, customer_phone, starts_at, status, calendar_ref)
                       VALUES ($1, $2, $3, $4, $5)
                       ON CONFLICT DO NOTHING
                       RETURNING id"#,
                )
                .bind(&appointment.tenant_id)
                .bind(&appointment.customer_phone)
                .bind(appointment.starts_at)
                .bind(appointment.status.as_str())
                .bind(&appointment.calendar_ref)
                .fetch_optional(&mut *transaction)
                .await?;
                Some(id.ok_or(StoreError::SlotTaken)?)
            }
        };

        Self::insert_message(&mut transaction, &write.outbound).await?;

        for record in &write.usage {
            Self::insert_usage_in(&mut *transaction, record).await?;
        }

        transaction.commit().await?;
        Ok(ExchangeCommit::Committed { effect_id })
    }

    async fn insert_usage(&self, record: &NewUsageRecord) -> Result<bool, StoreError> {
        let mut conn = self.pool.get_pool().acquire().await?;
        Self::insert_usage_in(&mut *conn, record).await
    }
}
