use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::database::{AppointmentStatus, NewAppointment, Store};
use crate::error::StoreError;
use crate::models::{Attachment, OutboundReply};
use crate::services::i18n::{PhraseKey, Translator};
use crate::utils::ics::generate_ics;

const APPOINTMENT_MINUTES: i64 = 60;

static BOOK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|\s)(?:book|réserver|reserver|rdv)\s+(\d{1,2})[/-](\d{1,2})\s+(\d{1,2}):(\d{2})\b")
        .expect("valid booking pattern")
});

/// Requested slot from a message like `book 14/03 09:30` (day first, UTC).
/// The current year is used, or the next one when the moment has passed.
/// Impossible dates or times yield `None`.
pub fn parse_booking(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = BOOK_RE.captures(text)?;
    // dd/mm, never mm/dd: matches the `%d/%m` used in every reply
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let hour: u32 = caps.get(3)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(4)?.as_str().parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let at_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day).map(|date| date.and_time(time).and_utc())
    };

    match at_year(now.year()) {
        Some(starts_at) if starts_at >= now => Some(starts_at),
        _ => at_year(now.year() + 1),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingDecision {
    Accept(NewAppointment),
    /// A non-cancelled appointment already holds the slot.
    Conflict,
    /// The day falls inside an unavailability block.
    Unavailable,
}

/// Check the slot against existing appointments and unavailability.
pub async fn evaluate_booking(
    store: &dyn Store,
    tenant_id: &str,
    customer: &str,
    starts_at: DateTime<Utc>,
) -> Result<BookingDecision, StoreError> {
    let day = starts_at.date_naive();
    let blocks = store.overlapping_unavailability(tenant_id, day, day).await?;
    if !blocks.is_empty() {
        debug!(tenant_id, %starts_at, "Booking falls in unavailability");
        return Ok(BookingDecision::Unavailable);
    }

    if store.slot_taken(tenant_id, starts_at).await? {
        info!(tenant_id, %starts_at, "Booking slot already taken");
        return Ok(BookingDecision::Conflict);
    }

    Ok(BookingDecision::Accept(NewAppointment {
        tenant_id: tenant_id.to_string(),
        customer_phone: customer.to_string(),
        starts_at,
        status: AppointmentStatus::Pending,
        calendar_ref: None,
    }))
}

pub fn booking_reply(
    translator: &Translator,
    decision: &BookingDecision,
    starts_at: DateTime<Utc>,
    lang: &str,
) -> OutboundReply {
    let dt = starts_at.format("%d/%m %H:%M").to_string();
    match decision {
        BookingDecision::Accept(_) => {
            let text = translator.render(PhraseKey::BookingConfirmed, lang, &[("dt", &dt)]);
            OutboundReply {
                text,
                lang: lang.to_string(),
                attachment: Some(Attachment {
                    file_name: "appointment.ics".to_string(),
                    mime_type: "text/calendar".to_string(),
                    content: generate_ics("Appointment", starts_at, APPOINTMENT_MINUTES),
                }),
            }
        }
        BookingDecision::Conflict => OutboundReply::text(
            translator.render(PhraseKey::BookingConflict, lang, &[("dt", &dt)]),
            lang,
        ),
        BookingDecision::Unavailable => {
            let day = starts_at.format("%d/%m").to_string();
            OutboundReply::text(
                translator.render(PhraseKey::BookingUnavailable, lang, &[("dt", &day)]),
                lang,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::{ExchangeCommit, ExchangeEffect, ExchangeWrite, MessageRole, NewMessage};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_booking_day_first() {
        let at = parse_booking("Hi, book 14/03 09:30 please", now()).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap());

        let fr = parse_booking("RDV 14-03 9:30", now()).unwrap();
        assert_eq!(fr, at);
        assert!(parse_booking("réserver 14/03 09:30", now()).is_some());
    }

    #[test]
    fn test_past_moment_rolls_to_next_year() {
        let at = parse_booking("book 01/02 10:00", now()).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_non_bookings() {
        assert_eq!(parse_booking("book 31/02 10:00", now()), None);
        assert_eq!(parse_booking("book 03/14 10:00", now()), None);
        assert_eq!(parse_booking("book 14/03 25:00", now()), None);
        assert_eq!(parse_booking("facebook 14/03 10:00", now()), None);
        assert_eq!(parse_booking("what are your hours?", now()), None);
    }

    #[tokio::test]
    async fn test_evaluate_conflict_and_unavailable() {
        let store = MemoryStore::new();
        let slot = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();

        match evaluate_booking(&store, "t1", "+331", slot).await.unwrap() {
            BookingDecision::Accept(appointment) => {
                assert_eq!(appointment.status, AppointmentStatus::Pending)
            }
            other => panic!("unexpected {:?}", other),
        }

        store.add_appointment(NewAppointment {
            tenant_id: "t1".into(),
            customer_phone: "+332".into(),
            starts_at: slot,
            status: AppointmentStatus::Pending,
            calendar_ref: None,
        });
        assert_eq!(
            evaluate_booking(&store, "t1", "+331", slot).await.unwrap(),
            BookingDecision::Conflict
        );
        // other tenants are unaffected
        assert!(matches!(
            evaluate_booking(&store, "t2", "+331", slot).await.unwrap(),
            BookingDecision::Accept(_)
        ));

        let block = crate::database::NewUnavailability {
            tenant_id: "t3".into(),
            owner_phone: "+339".into(),
            starts_on: slot.date_naive(),
            ends_on: slot.date_naive(),
        };
        let commit = store
            .commit_exchange(&ExchangeWrite {
                inbound: NewMessage {
                    tenant_id: "t3".into(),
                    channel: crate::models::Channel::Whatsapp,
                    sender: "+339".into(),
                    role: MessageRole::Inbound,
                    text: "✅".into(),
                    channel_message_id: Some("m-1".into()),
                    prompt_tokens: None,
                    completion_tokens: None,
                    ts: now(),
                },
                outbound: NewMessage {
                    tenant_id: "t3".into(),
                    channel: crate::models::Channel::Whatsapp,
                    sender: "+339".into(),
                    role: MessageRole::Assistant,
                    text: "Saved".into(),
                    channel_message_id: None,
                    prompt_tokens: None,
                    completion_tokens: None,
                    ts: now(),
                },
                usage: vec![],
                session: None,
                effect: ExchangeEffect::Unavailability(block),
            })
            .await
            .unwrap();
        assert!(matches!(commit, ExchangeCommit::Committed { .. }));
        assert_eq!(
            evaluate_booking(&store, "t3", "+331", slot).await.unwrap(),
            BookingDecision::Unavailable
        );
    }

    #[test]
    fn test_accept_reply_carries_calendar() {
        let translator = Translator::new("en");
        let slot = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let decision = BookingDecision::Accept(NewAppointment {
            tenant_id: "t1".into(),
            customer_phone: "+331".into(),
            starts_at: slot,
            status: AppointmentStatus::Pending,
            calendar_ref: None,
        });

        let reply = booking_reply(&translator, &decision, slot, "en");
        assert_eq!(reply.text, "✅ Booked for 14/03 09:30. You'll get a reminder.");
        let attachment = reply.attachment.unwrap();
        assert_eq!(attachment.mime_type, "text/calendar");
        assert!(attachment.content.contains("DTSTART:20250314T093000Z"));

        let conflict = booking_reply(&translator, &BookingDecision::Conflict, slot, "fr");
        assert!(conflict.text.contains("14/03 09:30"));
        assert!(conflict.attachment.is_none());
    }
}
