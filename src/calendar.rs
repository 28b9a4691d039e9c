use chrono::{Datelike, NaiveDate};

/// Day-of-week in the timetable grid's 1-based convention: 1=Sunday..7=Saturday.
pub fn day_of_week_of(date: NaiveDate) -> i64 {
    i64::from(date.weekday().num_days_from_sunday()) + 1
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn valid_day_of_week(dow: i64) -> bool {
    (1..=7).contains(&dow)
}
