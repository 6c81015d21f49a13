//! Schedule grammar parser.
//!
//! Five `@`-delimited forms, keyword case-insensitive:
//!
//! ```text
//! WEEKDAY@HH:MM              Mon-Fri at HH:MM
//! WEEKEND@HH:MM              Sat-Sun at HH:MM
//! EVERYDAY@HH:MM             all seven days (alias: DAILY@HH:MM)
//! DAYS@mon,thu@HH:MM         explicit day set, at least one day
//! ONCE@YYYY-MM-DD@HH:MM      a single absolute occurrence
//! ```
//!
//! HH:MM is strict 24-hour with zero padding; dates are strict calendar
//! dates. No past/future check on ONCE dates — a past one-shot is the
//! engine's misfire policy to decide, not a syntax error.

use std::fmt;

use chrono::{NaiveDate, NaiveTime, Weekday};
use thiserror::Error;

use minder_core::MinderError;

const SUPPORTED_FORMS: &str = "WEEKDAY@HH:MM, WEEKEND@HH:MM, EVERYDAY@HH:MM (or DAILY@HH:MM), \
     DAYS@mon,tue,...@HH:MM, ONCE@YYYY-MM-DD@HH:MM";

/// Why a schedule string failed to parse. The messages double as the
/// guidance shown to the owner, so they name the expected form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unknown schedule '{0}'. Supported forms: {SUPPORTED_FORMS}")]
    UnknownKeyword(String),

    #[error("{keyword} takes the form {expected} ({found} fields given)")]
    FieldCount {
        keyword: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("invalid time '{0}'. Use 24-hour HH:MM, e.g. 08:00")]
    BadTime(String),

    #[error("invalid date '{0}'. Use YYYY-MM-DD, e.g. 2026-01-20")]
    BadDate(String),

    #[error("unknown day '{0}'. Use mon, tue, wed, thu, fri, sat, sun")]
    BadDay(String),

    #[error("DAYS needs at least one day, e.g. DAYS@mon,thu@08:00")]
    EmptyDays,
}

impl From<ScheduleError> for MinderError {
    fn from(e: ScheduleError) -> Self {
        MinderError::Schedule(e.to_string())
    }
}

/// Parsed, typed schedule descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Weekday { at: NaiveTime },
    Weekend { at: NaiveTime },
    Everyday { at: NaiveTime },
    /// De-duplicated, stored in Mon..Sun order regardless of input order.
    Days { days: Vec<Weekday>, at: NaiveTime },
    Once { date: NaiveDate, at: NaiveTime },
}

impl Schedule {
    /// Parse a trimmed schedule grammar string.
    pub fn parse(input: &str) -> Result<Self, ScheduleError> {
        let input = input.trim();
        let fields: Vec<&str> = input.split('@').collect();
        // Keyword first: an exact token match keeps EVERYDAY/DAILY from ever
        // being taken for DAYS.
        let keyword = fields[0].trim().to_ascii_uppercase();

        match keyword.as_str() {
            "WEEKDAY" | "WEEKEND" | "EVERYDAY" | "DAILY" => {
                if fields.len() != 2 {
                    return Err(ScheduleError::FieldCount {
                        keyword: simple_keyword_name(&keyword),
                        expected: "KEYWORD@HH:MM",
                        found: fields.len(),
                    });
                }
                let at = parse_hhmm(fields[1])?;
                Ok(match keyword.as_str() {
                    "WEEKDAY" => Schedule::Weekday { at },
                    "WEEKEND" => Schedule::Weekend { at },
                    _ => Schedule::Everyday { at },
                })
            }
            "DAYS" => {
                if fields.len() != 3 {
                    return Err(ScheduleError::FieldCount {
                        keyword: "DAYS",
                        expected: "DAYS@mon,tue,...@HH:MM",
                        found: fields.len(),
                    });
                }
                let days = parse_day_set(fields[1])?;
                let at = parse_hhmm(fields[2])?;
                Ok(Schedule::Days { days, at })
            }
            "ONCE" => {
                if fields.len() != 3 {
                    return Err(ScheduleError::FieldCount {
                        keyword: "ONCE",
                        expected: "ONCE@YYYY-MM-DD@HH:MM",
                        found: fields.len(),
                    });
                }
                let date = parse_date(fields[1])?;
                let at = parse_hhmm(fields[2])?;
                Ok(Schedule::Once { date, at })
            }
            _ => Err(ScheduleError::UnknownKeyword(input.to_string())),
        }
    }

    /// One-shot schedules retire themselves after firing.
    pub fn is_once(&self) -> bool {
        matches!(self, Schedule::Once { .. })
    }

    /// Time-of-day this schedule fires at.
    pub fn time(&self) -> NaiveTime {
        match self {
            Schedule::Weekday { at }
            | Schedule::Weekend { at }
            | Schedule::Everyday { at }
            | Schedule::Days { at, .. }
            | Schedule::Once { at, .. } => *at,
        }
    }
}

impl fmt::Display for Schedule {
    /// Canonical rendering: upper-case keyword, lower-case sorted day
    /// tokens. Re-parsing the output yields an equal descriptor.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Weekday { at } => write!(f, "WEEKDAY@{}", at.format("%H:%M")),
            Schedule::Weekend { at } => write!(f, "WEEKEND@{}", at.format("%H:%M")),
            Schedule::Everyday { at } => write!(f, "EVERYDAY@{}", at.format("%H:%M")),
            Schedule::Days { days, at } => {
                let tokens: Vec<&str> = days.iter().map(|d| day_token(*d)).collect();
                write!(f, "DAYS@{}@{}", tokens.join(","), at.format("%H:%M"))
            }
            Schedule::Once { date, at } => {
                write!(f, "ONCE@{}@{}", date.format("%Y-%m-%d"), at.format("%H:%M"))
            }
        }
    }
}

fn simple_keyword_name(keyword: &str) -> &'static str {
    match keyword {
        "WEEKDAY" => "WEEKDAY",
        "WEEKEND" => "WEEKEND",
        "DAILY" => "DAILY",
        _ => "EVERYDAY",
    }
}

/// Strict zero-padded 24-hour HH:MM.
fn parse_hhmm(field: &str) -> Result<NaiveTime, ScheduleError> {
    let t = field.trim();
    let bytes = t.as_bytes();
    let ok = bytes.len() == 5
        && bytes[2] == b':'
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[3].is_ascii_digit()
        && bytes[4].is_ascii_digit();
    if !ok {
        return Err(ScheduleError::BadTime(t.to_string()));
    }
    let hour: u32 = t[0..2].parse().map_err(|_| ScheduleError::BadTime(t.to_string()))?;
    let minute: u32 = t[3..5].parse().map_err(|_| ScheduleError::BadTime(t.to_string()))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| ScheduleError::BadTime(t.to_string()))
}

/// Strict YYYY-MM-DD calendar date.
fn parse_date(field: &str) -> Result<NaiveDate, ScheduleError> {
    let t = field.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d").map_err(|_| ScheduleError::BadDate(t.to_string()))
}

fn parse_day_set(field: &str) -> Result<Vec<Weekday>, ScheduleError> {
    let mut days: Vec<Weekday> = Vec::new();
    for token in field.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let day = parse_day(token)?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(ScheduleError::EmptyDays);
    }
    days.sort_by_key(|d| d.num_days_from_monday());
    Ok(days)
}

fn parse_day(token: &str) -> Result<Weekday, ScheduleError> {
    match token.to_ascii_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        _ => Err(ScheduleError::BadDay(token.to_string())),
    }
}

fn day_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_simple_forms() {
        assert_eq!(
            Schedule::parse("WEEKDAY@08:00").unwrap(),
            Schedule::Weekday { at: hm(8, 0) }
        );
        assert_eq!(
            Schedule::parse("weekend@21:30").unwrap(),
            Schedule::Weekend { at: hm(21, 30) }
        );
        assert_eq!(
            Schedule::parse("EVERYDAY@06:15").unwrap(),
            Schedule::Everyday { at: hm(6, 15) }
        );
        // DAILY is an alias for EVERYDAY
        assert_eq!(
            Schedule::parse("daily@06:15").unwrap(),
            Schedule::Everyday { at: hm(6, 15) }
        );
    }

    #[test]
    fn test_parse_days() {
        let parsed = Schedule::parse("DAYS@tue,fri@20:00").unwrap();
        assert_eq!(
            parsed,
            Schedule::Days {
                days: vec![Weekday::Tue, Weekday::Fri],
                at: hm(20, 0)
            }
        );
        // order-insensitive, duplicates collapse
        assert_eq!(parsed, Schedule::parse("days@FRI,tue,fri@20:00").unwrap());
    }

    #[test]
    fn test_parse_once() {
        assert_eq!(
            Schedule::parse("ONCE@2026-01-20@09:00").unwrap(),
            Schedule::Once {
                date: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
                at: hm(9, 0)
            }
        );
    }

    #[test]
    fn test_bad_hour_and_minute() {
        assert_eq!(
            Schedule::parse("WEEKDAY@25:00"),
            Err(ScheduleError::BadTime("25:00".into()))
        );
        assert_eq!(
            Schedule::parse("WEEKDAY@08:60"),
            Err(ScheduleError::BadTime("08:60".into()))
        );
        // zero padding required
        assert_eq!(
            Schedule::parse("WEEKDAY@8:00"),
            Err(ScheduleError::BadTime("8:00".into()))
        );
    }

    #[test]
    fn test_wrong_field_count() {
        // DAYS with the time omitted — 2 fields instead of 3
        assert!(matches!(
            Schedule::parse("DAYS@tue"),
            Err(ScheduleError::FieldCount { keyword: "DAYS", .. })
        ));
        assert!(matches!(
            Schedule::parse("WEEKDAY@08:00@extra"),
            Err(ScheduleError::FieldCount { keyword: "WEEKDAY", .. })
        ));
        assert!(matches!(
            Schedule::parse("ONCE@09:00"),
            Err(ScheduleError::FieldCount { keyword: "ONCE", .. })
        ));
    }

    #[test]
    fn test_bad_day_token() {
        assert_eq!(
            Schedule::parse("DAYS@xyz@08:00"),
            Err(ScheduleError::BadDay("xyz".into()))
        );
    }

    #[test]
    fn test_empty_day_set() {
        assert_eq!(Schedule::parse("DAYS@@08:00"), Err(ScheduleError::EmptyDays));
        assert_eq!(Schedule::parse("DAYS@ , @08:00"), Err(ScheduleError::EmptyDays));
    }

    #[test]
    fn test_bad_date() {
        assert_eq!(
            Schedule::parse("ONCE@2026-13-01@08:00"),
            Err(ScheduleError::BadDate("2026-13-01".into()))
        );
        assert_eq!(
            Schedule::parse("ONCE@2026-02-30@08:00"),
            Err(ScheduleError::BadDate("2026-02-30".into()))
        );
    }

    #[test]
    fn test_unknown_keyword_lists_forms() {
        let err = Schedule::parse("HOURLY@08:00").unwrap_err();
        let msg = err.to_string();
        for form in ["WEEKDAY", "WEEKEND", "EVERYDAY", "DAYS", "ONCE"] {
            assert!(msg.contains(form), "missing {form} in: {msg}");
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for input in [
            "WEEKDAY@08:00",
            "WEEKEND@21:30",
            "everyday@06:15",
            "DAYS@fri,tue,FRI@20:00",
            "ONCE@2026-01-20@09:00",
        ] {
            let parsed = Schedule::parse(input).unwrap();
            let reparsed = Schedule::parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed);
        }
        // canonical day order
        assert_eq!(
            Schedule::parse("DAYS@fri,tue@20:00").unwrap().to_string(),
            "DAYS@tue,fri@20:00"
        );
    }

    #[test]
    fn test_is_once() {
        assert!(Schedule::parse("ONCE@2026-01-20@09:00").unwrap().is_once());
        assert!(!Schedule::parse("WEEKDAY@08:00").unwrap().is_once());
    }
}
