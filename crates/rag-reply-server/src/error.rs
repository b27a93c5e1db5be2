//! Domain errors

use thiserror::Error;

/// Relational store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Session {tenant_id}/{sender} was modified concurrently")]
    VersionConflict { tenant_id: String, sender: String },

    #[error("Slot already taken")]
    SlotTaken,

    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// Cache backend failures. Never surfaced past the cache layer.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timed out")]
    Timeout,

    #[error("Cache backend disabled")]
    Disabled,

    #[error("Cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the external embedding / language-model providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider call timed out")]
    Timeout,

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Timeouts, connection failures, throttling and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Http { status, .. } => should_retry_status(*status),
            Self::Malformed(_) | Self::NotConfigured(_) => false,
        }
    }
}

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 409 || status == 425 || status == 429 || status >= 500
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Coarse error classes driving the user-visible behaviour of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    TransientExternal,
    PermanentExternal,
    Persistence,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Tenant not found for {channel}:{external_id}")]
    TenantNotFound { channel: String, external_id: String },

    #[error("Malformed inbound event: {0}")]
    MalformedEvent(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TenantNotFound { .. } | Self::MalformedEvent(_) => ErrorKind::NotFound,
            Self::Provider(err) if err.is_transient() => ErrorKind::TransientExternal,
            Self::Provider(_) => ErrorKind::PermanentExternal,
            Self::Store(_) => ErrorKind::Persistence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_classification() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Http { status: 503, body: String::new() }.is_transient());
        assert!(ProviderError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!ProviderError::Http { status: 401, body: String::new() }.is_transient());
        assert!(!ProviderError::Malformed("no choices".into()).is_transient());
    }

    #[test]
    fn test_pipeline_kinds() {
        let not_found = PipelineError::TenantNotFound {
            channel: "whatsapp".into(),
            external_id: "123".into(),
        };
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(
            PipelineError::from(ProviderError::Timeout).kind(),
            ErrorKind::TransientExternal
        );
        assert_eq!(
            PipelineError::from(ProviderError::Http { status: 401, body: String::new() }).kind(),
            ErrorKind::PermanentExternal
        );
        assert_eq!(
            PipelineError::from(StoreError::SlotTaken).kind(),
            ErrorKind::Persistence
        );
    }
}
