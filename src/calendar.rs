// UTC calendar helpers. "Now" always comes from the reducer timestamp;
// views read the date persisted in the calendar_day row instead.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use spacetimedb::Timestamp;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Request-scoped clock
#[derive(Debug, Clone, PartialEq)]
pub struct Clock {
    pub now: DateTime<Utc>,
}

impl Clock {
    pub fn from_micros(micros: i64) -> Self {
        Self {
            now: DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default(),
        }
    }

    pub fn from_timestamp(ts: Timestamp) -> Self {
        Self::from_micros(ts.to_micros_since_unix_epoch())
    }

    /// Midnight UTC of `date`
    pub fn on(date: NaiveDate) -> Self {
        Self {
            now: date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    pub fn today_key(&self) -> String {
        format_date(self.today())
    }

    pub fn week_start(&self) -> NaiveDate {
        week_start(self.today())
    }

    /// ISO-8601 with millisecond precision, e.g. 2026-10-16T09:30:00.000Z
    pub fn now_iso(&self) -> String {
        self.now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }
}

/// Monday on or before `date`. Sunday maps to the Monday six days earlier.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let back = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(value: &str) -> NaiveDate {
        parse_date(value).unwrap()
    }

    #[test]
    fn test_week_start_every_weekday() {
        // 2026-10-12 is a Monday
        let cases = [
            ("2026-10-12", "2026-10-12", "Monday is its own week start"),
            ("2026-10-13", "2026-10-12", "Tuesday"),
            ("2026-10-14", "2026-10-12", "Wednesday"),
            ("2026-10-16", "2026-10-12", "Friday"),
            ("2026-10-17", "2026-10-12", "Saturday"),
            ("2026-10-18", "2026-10-12", "Sunday goes back 6 days, not forward"),
            ("2026-10-19", "2026-10-19", "next Monday starts a new week"),
        ];
        for (today, expected, description) in cases {
            assert_eq!(format_date(week_start(d(today))), expected, "{}", description);
        }
    }

    #[test]
    fn test_week_start_across_year_boundary() {
        // 2027-01-03 is a Sunday
        assert_eq!(format_date(week_start(d("2027-01-03"))), "2026-12-28");
    }

    #[test]
    fn test_clock_from_micros() {
        // 2026-10-18T23:59:59Z, a Sunday, one second before the Monday reset
        let clock = Clock::from_micros(1_792_367_999_000_000);
        assert_eq!(clock.today_key(), "2026-10-18");
        assert_eq!(format_date(clock.week_start()), "2026-10-12");
        assert_eq!(clock.now_iso(), "2026-10-18T23:59:59.000Z");

        let monday = Clock::from_micros(1_792_368_000_000_000);
        assert_eq!(monday.today_key(), "2026-10-19");
        assert_eq!(format_date(monday.week_start()), "2026-10-19");
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("2026-13-01").is_none());
        assert!(parse_date("yesterday").is_none());
    }
}
