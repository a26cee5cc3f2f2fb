//! Wall-clock scheduling of the daily report.

use std::future::Future;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

/// Next instant strictly after `now` whose local time in `tz` is `at`.
///
/// A local time skipped by a DST jump resolves to one hour later; an
/// ambiguous one resolves to its earlier occurrence.
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let local_today = now.with_timezone(&tz).date_naive();

    (0..3)
        .filter_map(|offset| local_today.checked_add_signed(Duration::days(offset)))
        .filter_map(|date| resolve_local(tz, date.and_time(at)))
        .find(|candidate| *candidate > now)
        .unwrap_or_else(|| now + Duration::days(1))
}

/// Next slot after `now` and after `last_slot`, the slot that already ran.
///
/// The wait is slept on the monotonic clock, so a wall clock stepped back
/// after a run would otherwise offer the same slot again.
pub fn next_slot(
    now: DateTime<Utc>,
    last_slot: Option<DateTime<Utc>>,
    at: NaiveTime,
    tz: Tz,
) -> DateTime<Utc> {
    let floor = last_slot.map_or(now, |last| last.max(now));
    next_run_after(floor, at, tz)
}

fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => Some(instant.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => match tz.from_local_datetime(&(local + Duration::hours(1))) {
            LocalResult::Single(instant) | LocalResult::Ambiguous(instant, _) => {
                Some(instant.with_timezone(&Utc))
            }
            LocalResult::None => None,
        },
    }
}

/// Run `job` every day at `at` local time, forever
pub async fn run_daily<F, Fut>(at: NaiveTime, tz: Tz, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut last_slot = None;
    loop {
        let now = Utc::now();
        let next = next_slot(now, last_slot, at, tz);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next.with_timezone(&tz), "Daily job scheduled");
        tokio::time::sleep(wait).await;
        last_slot = Some(next);

        if let Err(e) = job().await {
            error!(error = %e, "Daily job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_later_today() {
        let at = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        // 12:00 in Moscow (UTC+3)
        let next = next_run_after(utc(2026, 10, 17, 9, 0), at, chrono_tz::Europe::Moscow);
        assert_eq!(next, utc(2026, 10, 17, 18, 0));
    }

    #[test]
    fn test_rolls_over_to_tomorrow() {
        let at = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        let next = next_run_after(utc(2026, 10, 17, 18, 0), at, chrono_tz::Europe::Moscow);
        assert_eq!(next, utc(2026, 10, 18, 18, 0));
    }

    #[test]
    fn test_local_date_differs_from_utc_date() {
        let at = NaiveTime::from_hms_opt(1, 0, 0).unwrap();
        // 23:30 UTC is already 02:30 next day in Moscow
        let next = next_run_after(utc(2026, 10, 17, 23, 30), at, chrono_tz::Europe::Moscow);
        assert_eq!(next, utc(2026, 10, 18, 22, 0));
    }

    #[test]
    fn test_clock_stepped_back_does_not_repeat_the_slot() {
        let at = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        let slot = utc(2026, 10, 17, 18, 0);
        // woke at the slot, then NTP moved the wall clock 30 seconds back
        let now = slot - Duration::seconds(30);

        assert_eq!(next_run_after(now, at, chrono_tz::Europe::Moscow), slot);
        assert_eq!(
            next_slot(now, Some(slot), at, chrono_tz::Europe::Moscow),
            utc(2026, 10, 18, 18, 0)
        );
    }

    #[test]
    fn test_first_slot_ignores_missing_history() {
        let at = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        let now = utc(2026, 10, 17, 9, 0);
        assert_eq!(
            next_slot(now, None, at, chrono_tz::Europe::Moscow),
            utc(2026, 10, 17, 18, 0)
        );
    }

    #[test]
    fn test_dst_gap_moves_one_hour_later() {
        let at = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        // 02:30 does not exist in Berlin on 2026-03-29
        let next = next_run_after(utc(2026, 3, 28, 12, 0), at, chrono_tz::Europe::Berlin);
        assert_eq!(next, utc(2026, 3, 29, 1, 30));
    }
}
