//! Instants, durations and query-relative times

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("invalid time {0:?}")]
    InvalidTime(String),
}

const NANOSECOND: i64 = 1;
const MICROSECOND: i64 = 1_000 * NANOSECOND;
const MILLISECOND: i64 = 1_000 * MICROSECOND;
const SECOND: i64 = 1_000 * MILLISECOND;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Signed span of time with nanosecond precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_nanos(n: i64) -> Self {
        Duration(n)
    }

    pub const fn from_secs(s: i64) -> Self {
        Duration(s * SECOND)
    }

    pub const fn from_mins(m: i64) -> Self {
        Duration(m * MINUTE)
    }

    pub const fn from_hours(h: i64) -> Self {
        Duration(h * HOUR)
    }

    pub const fn nanos(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.unsigned_abs())
    }
}

impl Neg for Duration {
    type Output = Duration;
    fn neg(self) -> Duration {
        Duration(self.0.saturating_neg())
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl FromStr for Duration {
    type Err = TimeError;

    /// Parses literals such as `1h30m`, `-15s` or `250ms`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimeError::InvalidDuration(s.to_string());
        let (negative, mut rest) = match s.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, s),
        };
        if rest.is_empty() {
            return Err(invalid());
        }

        let mut total: i64 = 0;
        while !rest.is_empty() {
            let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 {
                return Err(invalid());
            }
            let magnitude: i64 = rest[..digits].parse().map_err(|_| invalid())?;
            rest = &rest[digits..];

            let (unit, len) = if rest.starts_with("ns") {
                (NANOSECOND, 2)
            } else if rest.starts_with("us") {
                (MICROSECOND, 2)
            } else if rest.starts_with("µs") {
                (MICROSECOND, "µs".len())
            } else if rest.starts_with("ms") {
                (MILLISECOND, 2)
            } else if rest.starts_with('s') {
                (SECOND, 1)
            } else if rest.starts_with('m') {
                (MINUTE, 1)
            } else if rest.starts_with('h') {
                (HOUR, 1)
            } else if rest.starts_with('d') {
                (DAY, 1)
            } else if rest.starts_with('w') {
                (WEEK, 1)
            } else {
                return Err(invalid());
            };
            rest = &rest[len..];

            let part = magnitude.checked_mul(unit).ok_or_else(invalid)?;
            total = total.checked_add(part).ok_or_else(invalid)?;
        }

        Ok(Duration(if negative { -total } else { total }))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0s");
        }
        if self.0 < 0 {
            f.write_str("-")?;
        }
        let mut rem = self.0.unsigned_abs();
        for (unit, suffix) in [
            (HOUR as u64, "h"),
            (MINUTE as u64, "m"),
            (SECOND as u64, "s"),
            (MILLISECOND as u64, "ms"),
            (MICROSECOND as u64, "us"),
            (NANOSECOND as u64, "ns"),
        ] {
            let n = rem / unit;
            if n > 0 {
                write!(f, "{}{}", n, suffix)?;
                rem -= n * unit;
            }
        }
        Ok(())
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Instant as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    /// Earliest representable instant. Unset absolute times resolve to it.
    pub const MIN: Time = Time(i64::MIN);
    pub const MAX: Time = Time(i64::MAX);

    pub const fn from_nanos(n: i64) -> Self {
        Time(n)
    }

    pub const fn from_unix(secs: i64) -> Self {
        Time(secs.saturating_mul(SECOND))
    }

    pub const fn nanos(&self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Utc::now().into()
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_nanos(self.0)
    }

    pub fn parse_rfc3339(s: &str) -> Result<Self, TimeError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc).into())
            .map_err(|_| TimeError::InvalidTime(s.to_string()))
    }

    /// Rounds down to a multiple of `every` since the epoch.
    pub fn truncate(&self, every: Duration) -> Time {
        if every.0 <= 0 {
            return *self;
        }
        Time(self.0 - self.0.rem_euclid(every.0))
    }
}

impl From<DateTime<Utc>> for Time {
    fn from(dt: DateTime<Utc>) -> Self {
        match dt.timestamp_nanos_opt() {
            Some(n) => Time(n),
            None if dt.year() < 1970 => Time::MIN,
            None => Time::MAX,
        }
    }
}

impl Add<Duration> for Time {
    type Output = Time;
    fn add(self, rhs: Duration) -> Time {
        Time(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Time> for Time {
    type Output = Duration;
    fn sub(self, rhs: Time) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dt = self.to_datetime();
        write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
    }
}

impl Serialize for Time {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Time {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Time::parse_rfc3339(&s).map_err(serde::de::Error::custom)
    }
}

/// A point in time as written in a query: absolute, relative to the evaluation instant,
/// or unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryTime {
    pub absolute: Option<Time>,
    pub relative: Duration,
    pub is_relative: bool,
}

impl QueryTime {
    /// The evaluation instant itself.
    pub const NOW: QueryTime = QueryTime {
        absolute: None,
        relative: Duration::ZERO,
        is_relative: true,
    };

    pub fn relative(d: Duration) -> Self {
        QueryTime {
            absolute: None,
            relative: d,
            is_relative: true,
        }
    }

    pub fn absolute(t: Time) -> Self {
        QueryTime {
            absolute: Some(t),
            relative: Duration::ZERO,
            is_relative: false,
        }
    }

    pub fn is_zero(&self) -> bool {
        !self.is_relative && self.absolute.is_none()
    }

    /// Resolves against `now`. An unset time resolves to [`Time::MIN`].
    pub fn time(&self, now: Time) -> Time {
        if self.is_relative {
            now + self.relative
        } else {
            self.absolute.unwrap_or(Time::MIN)
        }
    }
}

impl fmt::Display for QueryTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_relative {
            if self.relative.is_zero() {
                f.write_str("now")
            } else {
                write!(f, "{}", self.relative)
            }
        } else {
            match self.absolute {
                Some(t) => write!(f, "{}", t),
                None => Ok(()),
            }
        }
    }
}

impl FromStr for QueryTime {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(QueryTime::default()),
            "now" => Ok(QueryTime::NOW),
            _ => match s.parse::<Duration>() {
                Ok(d) => Ok(QueryTime::relative(d)),
                Err(_) => Time::parse_rfc3339(s).map(QueryTime::absolute),
            },
        }
    }
}

impl Serialize for QueryTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QueryTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!("1h30m".parse::<Duration>().unwrap(), Duration::from_mins(90));
        assert_eq!("-1h".parse::<Duration>().unwrap(), -Duration::from_hours(1));
        assert_eq!("250ms".parse::<Duration>().unwrap().nanos(), 250 * MILLISECOND);
        assert_eq!("2w".parse::<Duration>().unwrap().nanos(), 14 * DAY);
        assert!("h".parse::<Duration>().is_err());
        assert!("10x".parse::<Duration>().is_err());
        assert!("-".parse::<Duration>().is_err());
    }

    #[test]
    fn test_duration_display() {
        assert_eq!(Duration::from_mins(90).to_string(), "1h30m");
        assert_eq!((-Duration::from_hours(1)).to_string(), "-1h");
        assert_eq!(Duration::ZERO.to_string(), "0s");
        assert_eq!(Duration::from_nanos(1_500).to_string(), "1us500ns");
    }

    #[test]
    fn test_query_time_resolution() {
        let now = Time::from_unix(3600);
        assert_eq!(QueryTime::relative(-Duration::from_hours(1)).time(now), Time::from_unix(0));
        assert_eq!(QueryTime::NOW.time(now), now);
        assert_eq!(QueryTime::default().time(now), Time::MIN);
        assert!(QueryTime::default().is_zero());
        assert!(!QueryTime::NOW.is_zero());
    }

    #[test]
    fn test_query_time_text() {
        for text in ["-1h", "now", "2018-05-22T19:53:26Z", ""] {
            let qt: QueryTime = text.parse().unwrap();
            assert_eq!(qt.to_string(), text);
        }
    }

    #[test]
    fn test_truncate() {
        let t = Time::from_nanos(95 * SECOND);
        assert_eq!(t.truncate(Duration::from_mins(1)), Time::from_nanos(60 * SECOND));
        assert_eq!(Time::from_nanos(-1).truncate(Duration::from_secs(1)), Time::from_nanos(-SECOND));
    }
}
