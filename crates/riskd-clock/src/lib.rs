//! The daily reset schedule: resolving a configured local reset time to UTC
//! instants, DST-safely.
//!
//! The engine treats `now` as a value it's handed, not something it reads —
//! every function here takes `now`/`date` as a parameter rather than calling
//! `Utc::now()` itself, so the dispatch loop can drive it off an event's own
//! timestamp and a test can drive it off a fixture's.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Policy describing when the daily reset fires: a local time-of-day in a
/// named timezone (`timezone`/`daily_reset_local_time` in config, defaulting
/// to 17:00).
#[derive(Debug, Clone, Copy)]
pub struct DailyResetSchedule {
    pub timezone: Tz,
    pub local_time: NaiveTime,
}

impl DailyResetSchedule {
    pub fn new(timezone: Tz, local_time: NaiveTime) -> Self {
        DailyResetSchedule { timezone, local_time }
    }

    /// Resolve `local_time` on `date` in `timezone` to a UTC instant,
    /// DST-safely. A spring-forward gap (the local time never occurs) rolls
    /// forward to the first instant after the gap; a fall-back ambiguity
    /// (the local time occurs twice) resolves to the earlier occurrence, so
    /// the reset never fires twice for one wall-clock crossing.
    fn resolve(&self, date: chrono::NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(self.local_time);
        match self.timezone.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
            chrono::LocalResult::Ambiguous(earlier, _later) => earlier.with_timezone(&Utc),
            chrono::LocalResult::None => {
                // Spring-forward gap: walk forward minute by minute until a
                // valid local instant is found. Gaps are at most a couple of
                // hours wide in every real-world zone.
                let mut probe = naive;
                for _ in 0..240 {
                    probe += chrono::Duration::minutes(1);
                    if let chrono::LocalResult::Single(dt) =
                        self.timezone.from_local_datetime(&probe)
                    {
                        return dt.with_timezone(&Utc);
                    }
                }
                // Unreachable for any real IANA zone; fail closed to `now`
                // semantics by returning the naive instant interpreted as UTC
                // rather than panicking the event loop.
                Utc.from_utc_datetime(&naive)
            }
        }
    }

    /// The most recent scheduled reset instant at or before `now`.
    pub fn most_recent_reset_at_or_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_now = now.with_timezone(&self.timezone);
        let today_reset = self.resolve(local_now.date_naive());
        if today_reset <= now {
            today_reset
        } else {
            self.resolve(local_now.date_naive() - chrono::Duration::days(1))
        }
    }

    /// The next scheduled reset instant strictly after `now` — used to
    /// compute a daily-limit lockout's expiry ("until next 17:00 local").
    pub fn next_reset_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let most_recent = self.most_recent_reset_at_or_before(now);
        if most_recent > now {
            most_recent
        } else {
            let local_now = now.with_timezone(&self.timezone);
            self.resolve(local_now.date_naive() + chrono::Duration::days(1))
        }
    }

    /// Whether a daily reset has been scheduled since `last_reset` as of
    /// `now` — the per-minute crossing check run every minute against the
    /// configured timezone and reset time.
    pub fn crossed_since(&self, last_reset: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let scheduled = self.most_recent_reset_at_or_before(now);
        match last_reset {
            None => true,
            Some(last) => scheduled > last,
        }
    }
}
