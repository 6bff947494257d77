//! Precision-preserving timestamps (Date, Time, DateTime).
//!
//! FHIRPath/FHIR timestamps may be truncated to year, year-month, full date,
//! and so on. Rendering a parsed value via `to_string` and re-parsing it
//! must yield an equal value, so the parsed precision has to survive on the
//! value itself, not just be inferred from formatting.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimePrecision {
    Hour,
    Minute,
    Second,
    Millisecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateTimePrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

#[derive(Debug, Clone, Copy)]
pub struct DateValue {
    pub value: NaiveDate,
    pub precision: DatePrecision,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeValue {
    pub value: NaiveTime,
    pub precision: TimePrecision,
}

/// A `DateTime` literal. `tz_offset` is `None` when the source text carried
/// no timezone (FHIRPath leaves such values incomparable against an
/// explicitly-zoned one unless precision truncates the comparison away).
#[derive(Debug, Clone, Copy)]
pub struct DateTimeValue {
    pub value: DateTime<FixedOffset>,
    pub precision: DateTimePrecision,
    pub tz_offset: Option<i32>,
}

impl DateValue {
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        match s.len() {
            4 => Some(Self {
                value: NaiveDate::parse_from_str(&format!("{s}-01-01"), "%Y-%m-%d").ok()?,
                precision: DatePrecision::Year,
            }),
            7 => Some(Self {
                value: NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok()?,
                precision: DatePrecision::Month,
            }),
            10 => Some(Self {
                value: NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?,
                precision: DatePrecision::Day,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.precision {
            DatePrecision::Year => write!(f, "{}", self.value.format("%Y")),
            DatePrecision::Month => write!(f, "{}", self.value.format("%Y-%m")),
            DatePrecision::Day => write!(f, "{}", self.value.format("%Y-%m-%d")),
        }
    }
}

impl PartialEq for DateValue {
    fn eq(&self, other: &Self) -> bool {
        self.precision == other.precision && self.value == other.value
    }
}

impl DateValue {
    /// `None` when precisions differ: FHIRPath treats such comparisons as undefined.
    pub fn partial_cmp_precise(&self, other: &Self) -> Option<Ordering> {
        if self.precision != other.precision {
            return None;
        }
        Some(self.value.cmp(&other.value))
    }
}

impl TimeValue {
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let precision = if s.contains('.') {
            TimePrecision::Millisecond
        } else if s.matches(':').count() >= 2 {
            TimePrecision::Second
        } else if s.contains(':') {
            TimePrecision::Minute
        } else {
            TimePrecision::Hour
        };
        let value = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .or_else(|_| NaiveTime::parse_from_str(s, "%H"))
            .ok()?;
        Some(Self { value, precision })
    }

    pub fn partial_cmp_precise(&self, other: &Self) -> Option<Ordering> {
        if self.precision != other.precision {
            return None;
        }
        Some(self.value.cmp(&other.value))
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.precision {
            TimePrecision::Hour => write!(f, "{}", self.value.format("%H")),
            TimePrecision::Minute => write!(f, "{}", self.value.format("%H:%M")),
            TimePrecision::Second => write!(f, "{}", self.value.format("%H:%M:%S")),
            TimePrecision::Millisecond => write!(
                f,
                "{}.{:03}",
                self.value.format("%H:%M:%S"),
                self.value.nanosecond() / 1_000_000
            ),
        }
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.precision == other.precision && self.value == other.value
    }
}

fn format_offset(offset_secs: i32) -> String {
    if offset_secs == 0 {
        return "Z".to_string();
    }
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let abs = offset_secs.unsigned_abs();
    format!("{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
}

impl DateTimeValue {
    /// Parse a `DATE` or `DATETIME` FHIRPath literal (date-only values are
    /// widened to a dateTime at the matching precision, per common FHIRPath
    /// engine practice so `Patient.birthDate = @2020` style comparisons work).
    pub fn parse(input: &str) -> Option<Self> {
        let raw = input.trim();
        let Some((date_part, rest)) = raw.split_once('T') else {
            let date = DateValue::parse(raw)?;
            let naive = date.value.and_hms_opt(0, 0, 0)?;
            let value = FixedOffset::east_opt(0)?.from_utc_datetime(&naive);
            let precision = match date.precision {
                DatePrecision::Year => DateTimePrecision::Year,
                DatePrecision::Month => DateTimePrecision::Month,
                DatePrecision::Day => DateTimePrecision::Day,
            };
            return Some(Self { value, precision, tz_offset: None });
        };

        let date = DateValue::parse(date_part)?;
        let (time_part, tz_offset) = split_timezone(rest)?;
        let (time, time_precision) = parse_datetime_time(time_part)?;
        let naive = date.value.and_time(time);
        let offset = FixedOffset::east_opt(tz_offset.unwrap_or(0))?;
        let value = offset.from_utc_datetime(&(naive - chrono::Duration::seconds(tz_offset.unwrap_or(0) as i64)));
        let precision = match time_precision {
            TimePrecision::Hour => DateTimePrecision::Hour,
            TimePrecision::Minute => DateTimePrecision::Minute,
            TimePrecision::Second => DateTimePrecision::Second,
            TimePrecision::Millisecond => DateTimePrecision::Millisecond,
        };
        Some(Self { value, precision, tz_offset })
    }

    pub fn partial_cmp_precise(&self, other: &Self) -> Option<Ordering> {
        if self.precision != other.precision {
            return None;
        }
        Some(self.value.cmp(&other.value))
    }
}

fn split_timezone(rest: &str) -> Option<(&str, Option<i32>)> {
    if let Some(stripped) = rest.strip_suffix('Z') {
        return Some((stripped, Some(0)));
    }
    // Look for a +HH:MM or -HH:MM suffix after the time digits.
    let bytes = rest.as_bytes();
    for i in (1..bytes.len()).rev() {
        if (bytes[i] == b'+' || bytes[i] == b'-') && i >= 2 {
            let (time_part, tz_part) = rest.split_at(i);
            if let Some(offset) = parse_offset(tz_part) {
                return Some((time_part, Some(offset)));
            }
        }
    }
    Some((rest, None))
}

fn parse_offset(tz: &str) -> Option<i32> {
    let sign = match tz.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let rest = &tz[1..];
    let (h, m) = rest.split_once(':')?;
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

fn parse_datetime_time(s: &str) -> Option<(NaiveTime, TimePrecision)> {
    if s.is_empty() {
        return Some((NaiveTime::from_hms_opt(0, 0, 0)?, TimePrecision::Hour));
    }
    TimeValue::parse(s).map(|t| (t.value, t.precision))
}

impl fmt::Display for DateTimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date_str = match self.precision {
            DateTimePrecision::Year => self.value.format("%Y").to_string(),
            DateTimePrecision::Month => self.value.format("%Y-%m").to_string(),
            DateTimePrecision::Day => self.value.format("%Y-%m-%d").to_string(),
            DateTimePrecision::Hour => self.value.format("%Y-%m-%dT%H").to_string(),
            DateTimePrecision::Minute => self.value.format("%Y-%m-%dT%H:%M").to_string(),
            DateTimePrecision::Second => self.value.format("%Y-%m-%dT%H:%M:%S").to_string(),
            DateTimePrecision::Millisecond => format!(
                "{}.{:03}",
                self.value.format("%Y-%m-%dT%H:%M:%S"),
                self.value.nanosecond() / 1_000_000
            ),
        };
        let has_time = self.precision >= DateTimePrecision::Hour;
        if has_time {
            if let Some(offset) = self.tz_offset {
                write!(f, "{date_str}{}", format_offset(offset))
            } else {
                write!(f, "{date_str}")
            }
        } else {
            write!(f, "{date_str}")
        }
    }
}

impl PartialEq for DateTimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.precision == other.precision && self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_round_trip() {
        for s in ["2020", "2020-05", "2020-05-17"] {
            let d = DateValue::parse(s).unwrap();
            assert_eq!(d.to_string(), s);
            let reparsed = DateValue::parse(&d.to_string()).unwrap();
            assert_eq!(d, reparsed);
        }
    }

    #[test]
    fn datetime_round_trip_with_offset() {
        let s = "2020-05-17T10:30:00+02:00";
        let dt = DateTimeValue::parse(s).unwrap();
        assert_eq!(dt.to_string(), s);
    }

    #[test]
    fn time_round_trip() {
        for s in ["10", "10:30", "10:30:15", "10:30:15.123"] {
            let t = TimeValue::parse(s).unwrap();
            assert_eq!(t.to_string(), s);
        }
    }
}
