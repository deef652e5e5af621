//! Trigger time computation.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::ScheduleConfig;

/// Step used to walk forward out of a DST gap.
const GAP_STEP_MINUTES: i64 = 15;

/// Longest DST gap we walk through before giving up on local resolution.
const MAX_GAP_MINUTES: i64 = 4 * 60;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Compute the next trigger strictly after `now`.
///
/// With a fixed hour this is the next `HH:00` local time in the configured
/// timezone. Otherwise it is `now + interval_hours`.
pub fn compute_next_trigger(now: DateTime<Utc>, config: &ScheduleConfig) -> DateTime<Utc> {
    match config.fixed_hour() {
        Some(hour) => next_local_hour(now, hour, config.timezone()),
        None => now + Duration::hours(i64::from(config.interval_hours())),
    }
}

fn next_local_hour(now: DateTime<Utc>, hour: u32, tz: Tz) -> DateTime<Utc> {
    let local_today = now.with_timezone(&tz).date_naive();

    let mut day = local_today;
    // Two days covers "today already passed" plus one spare for a skipped
    // local hour that resolves past midnight.
    for _ in 0..3 {
        if let Some(naive) = day.and_hms_opt(hour, 0, 0) {
            let candidate = resolve_local(&tz, naive);
            if candidate > now {
                return candidate;
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    now + Duration::days(1)
}

/// Map a local wall-clock time to UTC.
///
/// Ambiguous times (clocks going back) take the earlier instant. Nonexistent
/// times (clocks going forward) move to the first representable local time.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    let mut offset = 0;
    while offset <= MAX_GAP_MINUTES {
        let shifted = naive + Duration::minutes(offset);
        match tz.from_local_datetime(&shifted) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => offset += GAP_STEP_MINUTES,
        }
    }
    Utc.from_utc_datetime(&naive)
}
