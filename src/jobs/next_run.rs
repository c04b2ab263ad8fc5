use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Datelike};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum NextRunError {
    #[error("invalid time of day: {0}")]
    InvalidTime(String),
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("no allowed day within the search horizon")]
    NoAllowedDay,
}

/// Computes the next UTC instant a schedule should fire.
///
/// The candidate is `time_local` on `from`'s calendar date in `timezone`.
/// When that instant is not strictly after `from`, or its weekday is not in
/// `allowed_weekdays` (0 = Sunday), the search advances one day at a time.
/// Eight days cover every weekday set plus the wrap, so a miss after that
/// means no day is allowed.
pub fn compute_next_run(
    time_local: &str,
    timezone: &str,
    allowed_weekdays: &[u8],
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>, NextRunError> {
    let time = NaiveTime::parse_from_str(time_local, "%H:%M")
        .map_err(|_| NextRunError::InvalidTime(time_local.to_string()))?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| NextRunError::InvalidTimezone(timezone.to_string()))?;

    let mut date = from.with_timezone(&tz).date_naive();
    for _ in 0..8 {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        if allowed_weekdays.contains(&weekday) {
            // earliest() is None inside a spring-forward gap; that wall
            // clock never happens, so the day is skipped.
            if let Some(local) = tz.from_local_datetime(&date.and_time(time)).earliest() {
                let candidate = local.with_timezone(&Utc);
                if candidate > from {
                    return Ok(candidate);
                }
            }
        }
        date += Duration::days(1);
    }

    Err(NextRunError::NoAllowedDay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse::<DateTime<Utc>>().unwrap()
    }

    const ALL_DAYS: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];
    const WEEKDAYS: [u8; 5] = [1, 2, 3, 4, 5];

    #[test]
    fn same_day_when_time_still_ahead() {
        // 06:59 local in Buenos Aires (UTC-3) is 09:59Z; the 07:00 slot is
        // still ahead on the same date.
        let from = utc("2024-03-04T09:59:00Z");
        let next = compute_next_run("07:00", "America/Argentina/Buenos_Aires", &ALL_DAYS, from)
            .unwrap();
        assert_eq!(next, utc("2024-03-04T10:00:00Z"));
    }

    #[test]
    fn next_day_when_time_already_passed() {
        let from = utc("2024-03-04T10:01:00Z");
        let next = compute_next_run("07:00", "America/Argentina/Buenos_Aires", &ALL_DAYS, from)
            .unwrap();
        assert_eq!(next, utc("2024-03-05T10:00:00Z"));
    }

    #[test]
    fn exact_fire_instant_rolls_forward() {
        // Strictly-after: recomputing from the instant that just fired must
        // land on the next allowed day, not the same instant again.
        let from = utc("2024-03-04T10:00:00Z");
        let next = compute_next_run("07:00", "America/Argentina/Buenos_Aires", &WEEKDAYS, from)
            .unwrap();
        assert_eq!(next, utc("2024-03-05T10:00:00Z"));
    }

    #[test]
    fn skips_to_allowed_weekday() {
        // 2024-03-08 is a Friday; weekdays-only pushes a Friday-evening
        // recompute across the weekend to Monday.
        let from = utc("2024-03-08T23:00:00Z");
        let next =
            compute_next_run("07:00", "America/Argentina/Buenos_Aires", &WEEKDAYS, from).unwrap();
        assert_eq!(next, utc("2024-03-11T10:00:00Z"));
        assert_eq!(
            next.with_timezone(&chrono_tz::America::Argentina::Buenos_Aires)
                .weekday()
                .num_days_from_sunday(),
            1
        );
    }

    #[test]
    fn sunday_only_schedule() {
        let from = utc("2024-03-04T12:00:00Z"); // Monday
        let next =
            compute_next_run("08:00", "America/Argentina/Buenos_Aires", &[0], from).unwrap();
        assert_eq!(next, utc("2024-03-10T11:00:00Z"));
    }

    #[test]
    fn dst_gap_skips_to_next_day() {
        // 2024-03-10 02:30 does not exist in America/New_York; the schedule
        // lands on the 11th at the same wall clock (now UTC-4).
        let from = utc("2024-03-10T01:00:00Z");
        let next = compute_next_run("02:30", "America/New_York", &ALL_DAYS, from).unwrap();
        assert_eq!(next, utc("2024-03-11T06:30:00Z"));
    }

    #[test]
    fn dst_offset_shift_keeps_wall_clock() {
        // Before the March 2024 transition 07:00 New York is 12:00Z, after
        // it is 11:00Z.
        let before = compute_next_run(
            "07:00",
            "America/New_York",
            &ALL_DAYS,
            utc("2024-03-09T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(before, utc("2024-03-09T12:00:00Z"));
        let after = compute_next_run(
            "07:00",
            "America/New_York",
            &ALL_DAYS,
            utc("2024-03-10T20:00:00Z"),
        )
        .unwrap();
        assert_eq!(after, utc("2024-03-11T11:00:00Z"));
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let from = utc("2024-06-01T00:00:00Z");
        let a = compute_next_run("07:00", "Europe/Madrid", &WEEKDAYS, from).unwrap();
        let b = compute_next_run("07:00", "Europe/Madrid", &WEEKDAYS, from).unwrap();
        assert_eq!(a, b);
        assert!(a > from);
    }

    #[test]
    fn empty_weekday_set_errors() {
        let from = utc("2024-03-04T10:00:00Z");
        let err = compute_next_run("07:00", "America/Argentina/Buenos_Aires", &[], from)
            .unwrap_err();
        assert_eq!(err, NextRunError::NoAllowedDay);
    }

    #[test]
    fn bad_inputs_error() {
        let from = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        assert!(matches!(
            compute_next_run("25:00", "UTC", &ALL_DAYS, from),
            Err(NextRunError::InvalidTime(_))
        ));
        assert!(matches!(
            compute_next_run("07:00", "Mars/Olympus", &ALL_DAYS, from),
            Err(NextRunError::InvalidTimezone(_))
        ));
    }
}
