//! Accrual limit windows: calendar day, ISO week (Monday start), calendar
//! month, all in UTC.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
    Daily,
    Weekly,
    Monthly,
}

impl LimitWindow {
    pub const ALL: [LimitWindow; 3] = [
        LimitWindow::Daily,
        LimitWindow::Weekly,
        LimitWindow::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitWindow::Daily => "daily",
            LimitWindow::Weekly => "weekly",
            LimitWindow::Monthly => "monthly",
        }
    }

    /// UTC instant this window opened, for a given `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = NaiveTime::MIN;
        let date = now.date_naive();
        let start_date = match self {
            LimitWindow::Daily => date,
            LimitWindow::Weekly => date.week(Weekday::Mon).first_day(),
            LimitWindow::Monthly => date.with_day(1).expect("day 1 always valid"),
        };
        DateTime::from_naive_utc_and_offset(start_date.and_time(midnight), Utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_starts_are_calendar_aligned() {
        // 2026-08-19 was a Wednesday.
        let now = Utc.with_ymd_and_hms(2026, 8, 19, 15, 30, 0).unwrap();
        assert_eq!(
            LimitWindow::Daily.start(now),
            Utc.with_ymd_and_hms(2026, 8, 19, 0, 0, 0).unwrap()
        );
        assert_eq!(
            LimitWindow::Weekly.start(now),
            Utc.with_ymd_and_hms(2026, 8, 17, 0, 0, 0).unwrap()
        );
        assert_eq!(
            LimitWindow::Monthly.start(now),
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
        );
    }
}
