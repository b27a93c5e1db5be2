use chrono::{DateTime, Duration, Utc};
use icalendar::{Calendar, Component, Event, EventLike};
use uuid::Uuid;

/// Single-event VCALENDAR attached to booking confirmations.
pub fn generate_ics(summary: &str, starts_at: DateTime<Utc>, duration_min: i64) -> String {
    let event = Event::new()
        .uid(&format!("{}@rag-reply-server", Uuid::new_v4()))
        .timestamp(Utc::now())
        .summary(summary)
        .starts(starts_at)
        .ends(starts_at + Duration::minutes(duration_min))
        .done();

    Calendar::new().push(event).done().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_bounds() {
        let start = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let body = generate_ics("Appointment", start, 60);
        assert!(body.starts_with("BEGIN:VCALENDAR"));
        assert!(body.contains("DTSTART:20250314T093000Z"));
        assert!(body.contains("DTEND:20250314T103000Z"));
        assert!(body.contains("SUMMARY:Appointment"));
    }

    #[test]
    fn test_event_is_importable() {
        let start = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        let body = generate_ics("Appointment", start, 30);
        assert!(body.contains("\r\nUID:"));
        assert!(body.contains("\r\nDTSTAMP:"));
        assert!(body.contains("@rag-reply-server"));
        assert_ne!(body, generate_ics("Appointment", start, 30));
    }
}
