use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Granularity of one rollup tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Minute,
    Hour,
    Day,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Minute, Resolution::Hour, Resolution::Day];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            Resolution::Minute => 60,
            Resolution::Hour => 60 * 60,
            Resolution::Day => 24 * 60 * 60,
        }
    }

    pub fn step(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// The tier a rollup at this resolution reads from.
    /// Minute buckets are built from raw samples, so they have none.
    pub fn finer(self) -> Option<Resolution> {
        match self {
            Resolution::Minute => None,
            Resolution::Hour => Some(Resolution::Minute),
            Resolution::Day => Some(Resolution::Hour),
        }
    }

    /// Round `ts` down to the start of its window (UTC).
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let into_window = ts.timestamp().rem_euclid(self.seconds());
        ts - Duration::seconds(into_window)
            - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
    }

    /// `[start, end)` of the most recently *completed* window at `tick`.
    pub fn previous_window(self, tick: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.truncate(tick);
        (end - self.step(), end)
    }

    /// First window boundary strictly after `ts`.
    pub fn next_boundary(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.truncate(ts) + self.step()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Ok(Resolution::Minute),
            "hour" | "hours" => Ok(Resolution::Hour),
            "day" | "days" => Ok(Resolution::Day),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap()
    }

    #[test]
    fn truncates_to_each_boundary() {
        let ts = at(13, 47, 29) + Duration::milliseconds(812);
        assert_eq!(Resolution::Minute.truncate(ts), at(13, 47, 0));
        assert_eq!(Resolution::Hour.truncate(ts), at(13, 0, 0));
        assert_eq!(Resolution::Day.truncate(ts), at(0, 0, 0));
    }

    #[test]
    fn truncate_is_identity_on_boundary() {
        for res in Resolution::ALL {
            let b = res.truncate(at(5, 5, 5));
            assert_eq!(res.truncate(b), b);
        }
    }

    #[test]
    fn previous_window_is_the_completed_one() {
        let (start, end) = Resolution::Hour.previous_window(at(14, 0, 0));
        assert_eq!(start, at(13, 0, 0));
        assert_eq!(end, at(14, 0, 0));

        let (start, end) = Resolution::Day.previous_window(at(0, 0, 3));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap());
        assert_eq!(end, at(0, 0, 0));
    }

    #[test]
    fn next_boundary_is_strictly_later() {
        assert_eq!(Resolution::Minute.next_boundary(at(10, 0, 0)), at(10, 1, 0));
        assert_eq!(Resolution::Minute.next_boundary(at(10, 0, 59)), at(10, 1, 0));
    }

    #[test]
    fn parses_names() {
        assert_eq!("Hour".parse::<Resolution>(), Ok(Resolution::Hour));
        assert_eq!("minutes".parse::<Resolution>(), Ok(Resolution::Minute));
        assert!("week".parse::<Resolution>().is_err());
    }
}
