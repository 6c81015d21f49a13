//! Trigger builder — turns a parsed schedule plus a timezone name into a
//! concrete next-fire-time rule the engine can evaluate.
//!
//! Timezone resolution never fails: an unknown zone name falls back to a
//! fixed UTC offset (tzdata is not guaranteed on small devices), logged as
//! a warning and invisible to the owner.

use chrono::{
    DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;

use crate::schedule::Schedule;

/// A resolved timezone: a real IANA zone, or the fixed-offset fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl ResolvedZone {
    /// Calendar date of `at` as seen in this zone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_datetime(at).date()
    }

    /// Wall-clock time of `at` as seen in this zone.
    pub fn local_datetime(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            ResolvedZone::Named(tz) => at.with_timezone(tz).naive_local(),
            ResolvedZone::Fixed(off) => at.with_timezone(off).naive_local(),
        }
    }

    /// Interpret a local wall-clock time in this zone. Ambiguous local
    /// times (DST fold) take the earlier instant; nonexistent local times
    /// (DST gap) yield None.
    fn from_local(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            ResolvedZone::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            ResolvedZone::Fixed(off) => off
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Resolve an IANA zone name, falling back to a fixed UTC offset.
/// Scheduling must never be refused just because tzdata is missing.
pub fn resolve_zone(name: &str, fallback_offset_hours: i32) -> ResolvedZone {
    match name.parse::<Tz>() {
        Ok(tz) => ResolvedZone::Named(tz),
        Err(_) => {
            // Out-of-range offsets collapse to UTC rather than failing.
            let offset = fallback_offset_hours
                .checked_mul(3600)
                .and_then(FixedOffset::east_opt)
                .unwrap_or_else(|| chrono::Offset::fix(&Utc));
            tracing::warn!(
                "⚠️ Unknown timezone '{}', falling back to fixed offset UTC{:+}h",
                name,
                fallback_offset_hours
            );
            ResolvedZone::Fixed(offset)
        }
    }
}

/// A concrete, engine-consumable firing rule.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fire at hour:minute:00 local on the given weekdays, forever.
    Weekly {
        days: Vec<Weekday>,
        at: NaiveTime,
        zone: ResolvedZone,
    },
    /// Fire once at an absolute instant, then the trigger is exhausted.
    Once { at: DateTime<Utc> },
}

impl Trigger {
    /// Build a trigger for a schedule in the given resolved zone.
    pub fn build(schedule: &Schedule, zone: ResolvedZone) -> Self {
        match schedule {
            Schedule::Weekday { at } => Trigger::Weekly {
                days: vec![
                    Weekday::Mon,
                    Weekday::Tue,
                    Weekday::Wed,
                    Weekday::Thu,
                    Weekday::Fri,
                ],
                at: *at,
                zone,
            },
            Schedule::Weekend { at } => Trigger::Weekly {
                days: vec![Weekday::Sat, Weekday::Sun],
                at: *at,
                zone,
            },
            Schedule::Everyday { at } => Trigger::Weekly {
                days: vec![
                    Weekday::Mon,
                    Weekday::Tue,
                    Weekday::Wed,
                    Weekday::Thu,
                    Weekday::Fri,
                    Weekday::Sat,
                    Weekday::Sun,
                ],
                at: *at,
                zone,
            },
            Schedule::Days { days, at } => Trigger::Weekly {
                days: days.clone(),
                at: *at,
                zone,
            },
            Schedule::Once { date, at } => {
                let naive = date.and_time(*at);
                // A local time swallowed by a DST gap shifts one hour later
                // rather than silently never firing.
                let instant = zone
                    .from_local(naive)
                    .or_else(|| zone.from_local(naive + chrono::Duration::hours(1)))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive));
                Trigger::Once { at: instant }
            }
        }
    }

    /// Next fire instant strictly after `after`, or None if exhausted.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Once { at } => (*at > after).then_some(*at),
            Trigger::Weekly { days, at, zone } => {
                let start = zone.local_date(after);
                // 8 days covers a full week plus a DST-gap skip.
                for offset in 0..=8u64 {
                    let date = start.checked_add_days(Days::new(offset))?;
                    if !days.contains(&date.weekday()) {
                        continue;
                    }
                    if let Some(instant) = zone.from_local(date.and_time(*at))
                        && instant > after
                    {
                        return Some(instant);
                    }
                }
                None
            }
        }
    }

    /// One-shot triggers are removed from the engine after firing.
    pub fn is_once(&self) -> bool {
        matches!(self, Trigger::Once { .. })
    }
}
