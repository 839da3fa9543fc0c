//! Time utilities: the sheet's date formats and timezone-aware "today".

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::{Result, TaskbotError};

/// Deadline cells and prompt dates.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Created-at cells.
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";

pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| TaskbotError::validation(format!("invalid timezone: {tz}")))
}

/// Current local time in `tz`.
pub fn local_now(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_timestamp(now: &DateTime<Tz>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Validate a model-supplied deadline and re-pad it to `dd.mm.yyyy`.
///
/// Returns `None` for blanks and anything that is not a real calendar date.
pub fn normalize_deadline(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .filter(|d| (1000..=9999).contains(&d.year()))
        .map(format_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalizes_single_digit_day_and_month() {
        assert_eq!(normalize_deadline("5.3.2026").as_deref(), Some("05.03.2026"));
        assert_eq!(normalize_deadline(" 15.02.2025 ").as_deref(), Some("15.02.2025"));
    }

    #[test]
    fn rejects_short_years() {
        assert_eq!(normalize_deadline("20.10.26"), None);
        assert_eq!(normalize_deadline("20.10.026"), None);
        assert_eq!(normalize_deadline("20.10.2026").as_deref(), Some("20.10.2026"));
    }

    #[test]
    fn rejects_non_dates() {
        assert_eq!(normalize_deadline(""), None);
        assert_eq!(normalize_deadline("к пятнице"), None);
        assert_eq!(normalize_deadline("31.02.2026"), None);
        assert_eq!(normalize_deadline("2026-02-20"), None);
    }

    #[test]
    fn timestamp_uses_local_wall_clock() {
        let tz = parse_timezone("Europe/Moscow").unwrap();
        let utc = Utc.with_ymd_and_hms(2026, 2, 19, 21, 30, 0).unwrap();
        let local = utc.with_timezone(&tz);
        assert_eq!(format_timestamp(&local), "20.02.2026 00:30");
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
