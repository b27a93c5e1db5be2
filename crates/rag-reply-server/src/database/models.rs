use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::Channel;
use crate::services::conversation::ConversationSession;

// ===== TENANT =====

/// Reply language policy configured per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LanguagePolicy {
    /// Detect from the channel hint or the message text.
    Auto,
    /// Always answer in this language code.
    Fixed(String),
}

impl From<String> for LanguagePolicy {
    fn from(raw: String) -> Self {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() || normalized == "auto" {
            Self::Auto
        } else {
            Self::Fixed(normalized)
        }
    }
}

impl From<LanguagePolicy> for String {
    fn from(policy: LanguagePolicy) -> Self {
        match policy {
            LanguagePolicy::Auto => "auto".to_string(),
            LanguagePolicy::Fixed(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCredential {
    pub channel: Channel,
    pub external_id: String,
    pub credential: Option<String>,
}

/// Tenant configuration as cached by the read-through layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    pub system_prompt: String,
    pub language_policy: LanguagePolicy,
    pub ai_enabled: bool,
    /// Normalized phone numbers allowed to run owner-only flows.
    pub owner_phones: Vec<String>,
    pub channels: Vec<ChannelCredential>,
}

impl TenantConfig {
    pub fn is_owner(&self, sender: &str) -> bool {
        let normalized = normalize_phone(sender);
        self.owner_phones.iter().any(|phone| *phone == normalized)
    }
}

/// Canonical tenant id from legacy numeric or padded forms.
pub fn normalize_tenant_id(raw: &str) -> Option<String> {
    let normalized = raw.trim();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_string())
    }
}

/// Keep a leading `+`, drop everything that is not a digit.
pub fn normalize_phone(value: &str) -> String {
    let cleaned = value.trim();
    let digits: String = cleaned.chars().filter(|c| c.is_ascii_digit()).collect();
    if cleaned.starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: String,
    pub system_prompt: String,
    pub language_policy: String,
    pub ai_enabled: bool,
}

// ===== KNOWLEDGE =====

#[derive(Debug, Clone)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub tenant_id: String,
    pub question: String,
    pub answer: String,
    pub embedding: Option<Vec<f32>>,
}

/// Cached view of a knowledge entry (embeddings stay in the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct KnowledgeSummary {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub searchable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: KnowledgeSummary,
    pub score: f32,
}

// ===== MESSAGES =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Inbound,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "assistant" {
            Self::Assistant
        } else {
            Self::Inbound
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub tenant_id: String,
    pub channel: Channel,
    pub sender: String,
    pub role: MessageRole,
    pub text: String,
    pub channel_message_id: Option<String>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub text: String,
    pub ts: DateTime<Utc>,
}

// ===== UNAVAILABILITY =====

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UnavailabilityBlock {
    pub id: i64,
    pub tenant_id: String,
    pub owner_phone: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

impl UnavailabilityBlock {
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.starts_on <= day && day <= self.ends_on
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnavailability {
    pub tenant_id: String,
    pub owner_phone: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

// ===== APPOINTMENTS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub tenant_id: String,
    pub customer_phone: String,
    pub starts_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub calendar_ref: Option<String>,
}

// ===== USAGE =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageDirection {
    Inbound,
    Outbound,
}

impl UsageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Outcome marker stored with every usage row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Ok,
    Failed,
    Skipped,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUsageRecord {
    pub tenant_id: String,
    /// `MessageKey::reference` of the inbound message of the exchange.
    pub message_ref: String,
    pub direction: UsageDirection,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub model: String,
    pub trace_id: Option<String>,
    pub status: UsageStatus,
}

impl NewUsageRecord {
    pub fn total_tokens(&self) -> i32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

// ===== UNIT OF WORK =====

/// Domain row created alongside the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEffect {
    None,
    Unavailability(NewUnavailability),
    Appointment(NewAppointment),
}

/// Everything one inbound message writes, committed atomically.
#[derive(Debug, Clone)]
pub struct ExchangeWrite {
    pub inbound: NewMessage,
    pub outbound: NewMessage,
    pub usage: Vec<NewUsageRecord>,
    /// Session to persist with compare-and-swap on its version.
    pub session: Option<ConversationSession>,
    pub effect: ExchangeEffect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCommit {
    Committed { effect_id: Option<i64> },
    /// The inbound channel message id was already stored.
    Duplicate,
}
