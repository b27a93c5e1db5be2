use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ===== INBOUND =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Telegram,
    Instagram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Instagram => "instagram",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "whatsapp" => Some(Self::Whatsapp),
            "telegram" => Some(Self::Telegram),
            "instagram" => Some(Self::Instagram),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized event produced by the channel adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub channel: Channel,
    pub external_tenant_id: String,
    pub sender_id: String,
    pub text: String,
    pub channel_message_id: String,
    pub timestamp: DateTime<Utc>,
    /// Language reported by the channel, if any (e.g. Telegram `language_code`).
    #[serde(default)]
    pub language_hint: Option<String>,
}

impl InboundEvent {
    /// Dedup identity of this delivery within `tenant_id`.
    pub fn key(&self, tenant_id: &str) -> MessageKey {
        MessageKey {
            tenant_id: tenant_id.to_string(),
            channel: self.channel,
            sender: self.sender_id.trim().to_string(),
            channel_message_id: self.channel_message_id.trim().to_string(),
        }
    }

    /// First blank required field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.external_tenant_id.trim().is_empty() {
            Some("external_tenant_id")
        } else if self.sender_id.trim().is_empty() {
            Some("sender_id")
        } else if self.channel_message_id.trim().is_empty() {
            Some("channel_message_id")
        } else if self.text.trim().is_empty() {
            Some("text")
        } else {
            None
        }
    }
}

// ===== OUTBOUND =====

/// Channel message ids are only unique per chat (Telegram numbers them per
/// conversation), so a delivery is identified within tenant, channel and sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub tenant_id: String,
    pub channel: Channel,
    pub sender: String,
    pub channel_message_id: String,
}

impl MessageKey {
    /// `channel:sender:id`, the reference stored on usage rows.
    pub fn reference(&self) -> String {
        format!("{}:{}:{}", self.channel, self.sender, self.channel_message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundReply {
    pub text: String,
    pub lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl OutboundReply {
    pub fn text(text: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
            attachment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Malformed,
    TenantNotFound,
    Duplicate,
}

/// Result of `handle_inbound`. Never an error: failures become a reply or a drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Processed and persisted.
    Replied(OutboundReply),
    /// Fallback reply after a persistence failure; the transport should redeliver.
    Degraded(OutboundReply),
    /// No reply is sent.
    Dropped(DropReason),
}

impl InboundOutcome {
    pub fn reply(&self) -> Option<&OutboundReply> {
        match self {
            Self::Replied(reply) | Self::Degraded(reply) => Some(reply),
            Self::Dropped(_) => None,
        }
    }

    pub fn should_acknowledge(&self) -> bool {
        !matches!(self, Self::Degraded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> InboundEvent {
        InboundEvent {
            channel: Channel::Whatsapp,
            external_tenant_id: "phone-1".into(),
            sender_id: "+33600000000".into(),
            text: text.into(),
            channel_message_id: "wamid.1".into(),
            timestamp: Utc::now(),
            language_hint: None,
        }
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(event("hello").missing_field(), None);
        assert_eq!(event("   ").missing_field(), Some("text"));
    }

    #[test]
    fn test_key_is_scoped_to_chat() {
        let mut other_chat = event("hello");
        other_chat.sender_id = " +33611111111 ".into();

        let key = event("hello").key("salon");
        assert_eq!(key.reference(), "whatsapp:+33600000000:wamid.1");
        assert_ne!(key, other_chat.key("salon"));
        assert_ne!(key, event("hello").key("barber"));
        assert_eq!(other_chat.key("salon").sender, "+33611111111");
    }

    #[test]
    fn test_deserialize_without_hint() {
        let raw = r#"{
            "channel": "telegram",
            "external_tenant_id": "bot-7",
            "sender_id": "42",
            "text": "hi",
            "channel_message_id": "tg-1",
            "timestamp": "2024-12-01T10:00:00Z"
        }"#;
        let parsed: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.channel, Channel::Telegram);
        assert!(parsed.language_hint.is_none());
    }

    #[test]
    fn test_outcome_acknowledgement() {
        let reply = OutboundReply::text("sorry", "en");
        assert!(InboundOutcome::Replied(reply.clone()).should_acknowledge());
        assert!(!InboundOutcome::Degraded(reply).should_acknowledge());
        assert!(InboundOutcome::Dropped(DropReason::Duplicate).reply().is_none());
    }
}
