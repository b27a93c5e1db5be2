use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Wizard state with the payload collected so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingStartDate,
    AwaitingEndDate { start: NaiveDate },
    AwaitingConfirmation { start: NaiveDate, end: NaiveDate },
}

impl SessionState {
    /// Persisted state tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingStartDate => "awaiting_start_date",
            Self::AwaitingEndDate { .. } => "awaiting_end_date",
            Self::AwaitingConfirmation { .. } => "awaiting_confirmation",
        }
    }

    /// Rebuild from a stored row. `None` when the payload does not match the tag.
    pub fn from_parts(
        tag: &str,
        pending_start: Option<NaiveDate>,
        pending_end: Option<NaiveDate>,
    ) -> Option<Self> {
        match (tag, pending_start, pending_end) {
            ("idle", _, _) => Some(Self::Idle),
            ("awaiting_start_date", _, _) => Some(Self::AwaitingStartDate),
            ("awaiting_end_date", Some(start), _) => Some(Self::AwaitingEndDate { start }),
            ("awaiting_confirmation", Some(start), Some(end)) => {
                Some(Self::AwaitingConfirmation { start, end })
            }
            _ => None,
        }
    }

    pub fn pending_start(&self) -> Option<NaiveDate> {
        match self {
            Self::AwaitingEndDate { start } | Self::AwaitingConfirmation { start, .. } => {
                Some(*start)
            }
            _ => None,
        }
    }

    pub fn pending_end(&self) -> Option<NaiveDate> {
        match self {
            Self::AwaitingConfirmation { end, .. } => Some(*end),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Conversation session keyed by (tenant, sender).
///
/// `version` is the stored row version; writes compare-and-swap on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    pub tenant_id: String,
    pub sender: String,
    pub state: SessionState,
    pub lang: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub version: i64,
}

impl ConversationSession {
    pub fn idle(tenant_id: impl Into<String>, sender: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            sender: sender.into(),
            state: SessionState::Idle,
            lang: None,
            last_activity: now,
            version: 0,
        }
    }

    /// Active session whose last activity is older than `timeout`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.state.is_active() && now - self.last_activity > timeout
    }

    /// Same row, new state. The version is bumped by the store on commit.
    pub fn with_state(&self, state: SessionState, lang: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            state,
            lang,
            last_activity: now,
            ..self.clone()
        }
    }
}
