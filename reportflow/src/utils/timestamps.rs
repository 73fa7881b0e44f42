//! Local-time helpers for run stamps, log file names and daily slots.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone};

/// Format of the run time written into placeholder rows.
pub const RUN_STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of log file names.
pub const LOG_FILE_FORMAT: &str = "%Y_%m_%d_%H_%M_%S.log";

/// Renders a run stamp.
#[must_use]
pub fn run_stamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(RUN_STAMP_FORMAT).to_string()
}

/// Name of the log file for a process started at `at`.
#[must_use]
pub fn log_file_name(at: &DateTime<Local>) -> String {
    at.format(LOG_FILE_FORMAT).to_string()
}

/// First occurrence of `slot` strictly after `after`.
#[must_use]
pub fn next_daily(after: NaiveDateTime, slot: NaiveTime) -> NaiveDateTime {
    let today = after.date().and_time(slot);
    if today > after {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_next_daily_later_today() {
        let slot = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
        assert_eq!(next_daily(at(8, 0), slot), at(14, 30));
    }

    #[test]
    fn test_next_daily_rolls_over() {
        let slot = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let next = next_daily(at(8, 0), slot);
        assert_eq!(next, at(8, 0) + ChronoDuration::days(1));
    }

    #[test]
    fn test_stamps() {
        let utc = Utc.with_ymd_and_hms(2024, 5, 1, 8, 5, 9).unwrap();
        assert_eq!(run_stamp(&utc), "2024-05-01 08:05:09");

        let local = Local.with_ymd_and_hms(2024, 5, 1, 8, 5, 9).unwrap();
        assert_eq!(log_file_name(&local), "2024_05_01_08_05_09.log");
    }
}
