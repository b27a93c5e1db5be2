use chrono::{Datelike, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,4})[/.\-](\d{1,2})(?:[/.\-](\d{1,4}))?$").expect("valid date pattern")
});

/// A date typed by the user. `has_year` is false for `DD/MM` style input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    pub date: NaiveDate,
    pub has_year: bool,
}

/// Accepts `YYYY/MM/DD`, `DD/MM/YYYY`, `MM/DD/YYYY`, `DD/MM` and `MM/DD` with
/// `/`, `.` or `-` separators. Day-first wins when both readings are valid.
/// Year-less input takes `reference_year`.
pub fn parse_date(raw: &str, reference_year: i32) -> Option<ParsedDate> {
    let caps = DATE_RE.captures(raw.trim())?;
    let first_raw = caps.get(1)?.as_str();
    let first: u32 = first_raw.parse().ok()?;
    let second: u32 = caps.get(2)?.as_str().parse().ok()?;
    let third_raw = caps.get(3).map(|m| m.as_str());

    if first_raw.len() == 4 {
        // YYYY/MM/DD
        let day: u32 = third_raw.filter(|d| d.len() <= 2)?.parse().ok()?;
        let date = NaiveDate::from_ymd_opt(first as i32, second, day)?;
        return Some(ParsedDate { date, has_year: true });
    }
    if first_raw.len() > 2 {
        return None;
    }

    let (year, has_year) = match third_raw {
        Some(year) if year.len() == 4 => (year.parse().ok()?, true),
        Some(_) => return None,
        None => (reference_year, false),
    };

    NaiveDate::from_ymd_opt(year, second, first)
        .or_else(|| NaiveDate::from_ymd_opt(year, first, second))
        .map(|date| ParsedDate { date, has_year })
}

/// Same day one year later (Feb 29 clamps to Feb 28).
pub fn next_year(date: NaiveDate) -> NaiveDate {
    date.checked_add_months(Months::new(12)).unwrap_or(date)
}

/// Start date for the wizard: year-less dates already past roll to next year.
pub fn resolve_start(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let parsed = parse_date(raw, today.year())?;
    if !parsed.has_year && parsed.date < today {
        Some(next_year(parsed.date))
    } else {
        Some(parsed.date)
    }
}

/// End date for the wizard: year-less dates before `start` roll to the following year.
pub fn resolve_end(raw: &str, start: NaiveDate) -> Option<NaiveDate> {
    let parsed = parse_date(raw, start.year())?;
    if !parsed.has_year && parsed.date < start {
        Some(next_year(parsed.date))
    } else {
        Some(parsed.date)
    }
}
