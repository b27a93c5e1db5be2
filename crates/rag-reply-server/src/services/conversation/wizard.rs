//! Vacation wizard transitions. Pure: no I/O, no clock.

use chrono::NaiveDate;

use super::dates::{resolve_end, resolve_start};
use super::types::SessionState;
use crate::services::i18n::PhraseKey;

const YES_TOKENS: &[&str] = &["✅", "✔", "✔️", "yes", "oui", "да", "sí", "ja", "si"];
const NO_TOKENS: &[&str] = &["❌", "✖", "✕", "no", "non", "нет", "nein"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
}

pub fn parse_confirmation(text: &str) -> Option<Confirmation> {
    let cleaned = text.trim().trim_end_matches(|c: char| c == '!' || c == '.').to_lowercase();
    if YES_TOKENS.contains(&cleaned.as_str()) || text.contains('✅') {
        Some(Confirmation::Yes)
    } else if NO_TOKENS.contains(&cleaned.as_str()) || text.contains('❌') {
        Some(Confirmation::No)
    } else {
        None
    }
}

/// Result of feeding one message to an active wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardStep {
    pub next: SessionState,
    pub reply: PhraseKey,
    pub args: Vec<(&'static str, String)>,
    /// Block to persist, set only on a positive confirmation.
    pub commit: Option<(NaiveDate, NaiveDate)>,
}

impl WizardStep {
    fn reply(next: SessionState, reply: PhraseKey) -> Self {
        Self {
            next,
            reply,
            args: Vec::new(),
            commit: None,
        }
    }

    fn with_arg(mut self, name: &'static str, value: String) -> Self {
        self.args.push((name, value));
        self
    }

    /// Whether the step changed the wizard state.
    pub fn transitioned(&self, from: SessionState) -> bool {
        self.next != from
    }
}

/// First step after a trigger word.
pub fn start() -> WizardStep {
    WizardStep::reply(SessionState::AwaitingStartDate, PhraseKey::VacationAskStart)
}

/// Advance an active wizard. `None` when the session is idle.
///
/// Invalid input keeps the current state and re-prompts.
pub fn advance(state: SessionState, text: &str, today: NaiveDate) -> Option<WizardStep> {
    let step = match state {
        SessionState::Idle => return None,
        SessionState::AwaitingStartDate => match resolve_start(text, today) {
            Some(start) => WizardStep::reply(
                SessionState::AwaitingEndDate { start },
                PhraseKey::VacationAskEnd,
            ),
            None => WizardStep::reply(state, PhraseKey::VacationInvalidStart),
        },
        SessionState::AwaitingEndDate { start } => match resolve_end(text, start) {
            Some(end) if end >= start => WizardStep::reply(
                SessionState::AwaitingConfirmation { start, end },
                PhraseKey::VacationConfirm,
            )
            .with_arg("start", start.to_string())
            .with_arg("end", end.to_string()),
            Some(_) => WizardStep::reply(state, PhraseKey::VacationEndBeforeStart)
                .with_arg("start", start.to_string()),
            None => WizardStep::reply(state, PhraseKey::VacationInvalidEnd),
        },
        SessionState::AwaitingConfirmation { start, end } => match parse_confirmation(text) {
            Some(Confirmation::Yes) => WizardStep {
                commit: Some((start, end)),
                ..WizardStep::reply(SessionState::Idle, PhraseKey::VacationSaved)
            },
            Some(Confirmation::No) => {
                WizardStep::reply(SessionState::Idle, PhraseKey::VacationCancelled)
            }
            None => WizardStep::reply(state, PhraseKey::VacationInvalidConfirm),
        },
    };
    Some(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 12, 1)
    }

    #[test]
    fn test_full_round_trip() {
        let step = start();
        assert_eq!(step.next, SessionState::AwaitingStartDate);

        let step = advance(step.next, "24/12/2024", today()).unwrap();
        assert_eq!(step.next, SessionState::AwaitingEndDate { start: date(2024, 12, 24) });
        assert_eq!(step.reply, PhraseKey::VacationAskEnd);

        let step = advance(step.next, "08/01/2025", today()).unwrap();
        assert_eq!(
            step.next,
            SessionState::AwaitingConfirmation {
                start: date(2024, 12, 24),
                end: date(2025, 1, 8)
            }
        );
        assert_eq!(
            step.args,
            vec![("start", "2024-12-24".to_string()), ("end", "2025-01-08".to_string())]
        );

        let step = advance(step.next, "✅", today()).unwrap();
        assert_eq!(step.next, SessionState::Idle);
        assert_eq!(step.commit, Some((date(2024, 12, 24), date(2025, 1, 8))));
    }

    #[test]
    fn test_end_before_start_keeps_state() {
        let state = SessionState::AwaitingEndDate { start: date(2024, 12, 24) };
        let step = advance(state, "20/12/2024", today()).unwrap();
        assert_eq!(step.next, state);
        assert_eq!(step.reply, PhraseKey::VacationEndBeforeStart);
        assert!(step.commit.is_none());
        assert!(!step.transitioned(state));
    }

    #[test]
    fn test_unparseable_input_reprompts() {
        let step = advance(SessionState::AwaitingStartDate, "next week", today()).unwrap();
        assert_eq!(step.next, SessionState::AwaitingStartDate);
        assert_eq!(step.reply, PhraseKey::VacationInvalidStart);

        let confirming = SessionState::AwaitingConfirmation {
            start: date(2024, 12, 24),
            end: date(2024, 12, 26),
        };
        let step = advance(confirming, "maybe", today()).unwrap();
        assert_eq!(step.next, confirming);
        assert_eq!(step.reply, PhraseKey::VacationInvalidConfirm);
    }

    #[test]
    fn test_negative_confirmation_discards() {
        let confirming = SessionState::AwaitingConfirmation {
            start: date(2024, 12, 24),
            end: date(2024, 12, 26),
        };
        let step = advance(confirming, "Non", today()).unwrap();
        assert_eq!(step.next, SessionState::Idle);
        assert_eq!(step.reply, PhraseKey::VacationCancelled);
        assert!(step.commit.is_none());
    }

    #[test]
    fn test_idle_is_not_claimed() {
        assert!(advance(SessionState::Idle, "24/12/2024", today()).is_none());
    }

    #[test]
    fn test_confirmation_tokens() {
        assert_eq!(parse_confirmation(" OUI! "), Some(Confirmation::Yes));
        assert_eq!(parse_confirmation("да"), Some(Confirmation::Yes));
        assert_eq!(parse_confirmation("✔️"), Some(Confirmation::Yes));
        assert_eq!(parse_confirmation("ok ✅"), Some(Confirmation::Yes));
        assert_eq!(parse_confirmation("nein"), Some(Confirmation::No));
        assert_eq!(parse_confirmation("✕"), Some(Confirmation::No));
        assert_eq!(parse_confirmation("perhaps"), None);
    }
}
