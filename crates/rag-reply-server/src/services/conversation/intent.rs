use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use super::types::SessionState;
use crate::services::booking::parse_booking;

/// Who claims an inbound message. Precedence follows declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// A trigger word (re)starts the wizard, even mid-flow. Its language is
    /// picked up by `trigger_language` during language selection.
    StartWizard,
    /// An active wizard consumes the message.
    ContinueWizard,
    Booking { starts_at: DateTime<Utc> },
    Retrieval,
}

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    triggers: HashMap<String, String>,
}

impl IntentClassifier {
    pub fn new(trigger_words: &BTreeMap<String, String>) -> Self {
        Self {
            triggers: trigger_words
                .iter()
                .map(|(word, lang)| (word.trim().to_lowercase(), lang.to_lowercase()))
                .collect(),
        }
    }

    /// Language of the trigger word when the whole message is one.
    pub fn trigger_language(&self, text: &str) -> Option<&str> {
        let word = text.trim().to_lowercase();
        if word.contains(char::is_whitespace) {
            return None;
        }
        self.triggers.get(&word).map(String::as_str)
    }

    pub fn classify(&self, text: &str, state: &SessionState, now: DateTime<Utc>) -> Intent {
        if self.trigger_language(text).is_some() {
            return Intent::StartWizard;
        }
        if state.is_active() {
            return Intent::ContinueWizard;
        }
        if let Some(starts_at) = parse_booking(text, now) {
            return Intent::Booking { starts_at };
        }
        Intent::Retrieval
    }
}
