//! Trigger rules and scheduling epochs
//!
//! All schedule arithmetic is done in UTC. The scheduling epoch (the window in
//! which dependency satisfaction is evaluated) is the UTC calendar day for
//! every schedule kind, interval jobs included.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A scheduling epoch: one UTC calendar day
pub type Epoch = NaiveDate;

/// The epoch containing `t`
pub fn epoch_of(t: DateTime<Utc>) -> Epoch {
    t.date_naive()
}

/// First instant of an epoch
pub fn epoch_start(epoch: Epoch) -> DateTime<Utc> {
    at(epoch, NaiveTime::MIN)
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// When a job fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Schedule {
    /// Every day at a fixed time
    Daily {
        #[serde(with = "time_of_day")]
        time: NaiveTime,
    },
    /// One weekday at a fixed time
    Weekly {
        #[serde(with = "weekday_name")]
        day: Weekday,
        #[serde(with = "time_of_day")]
        time: NaiveTime,
    },
    /// Monday through Friday at a fixed time
    Weekdays {
        #[serde(with = "time_of_day")]
        time: NaiveTime,
    },
    /// Every hour at a fixed minute
    Hourly { minute: u32 },
    /// Fixed interval measured from the previous dispatch (or registration)
    Interval {
        #[serde(rename = "every-secs")]
        every_secs: u64,
    },
    /// Once per day at a time picked in `[start-hour, end-hour)`, stable for a given date
    RandomDaily {
        #[serde(rename = "start-hour")]
        start_hour: u32,
        #[serde(rename = "end-hour")]
        end_hour: u32,
        #[serde(default)]
        salt: u64,
    },
}

impl Schedule {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self::Daily {
            time: hm(hour, minute),
        }
    }

    pub fn weekly(day: Weekday, hour: u32, minute: u32) -> Self {
        Self::Weekly {
            day,
            time: hm(hour, minute),
        }
    }

    pub fn weekdays(hour: u32, minute: u32) -> Self {
        Self::Weekdays {
            time: hm(hour, minute),
        }
    }

    pub fn hourly(minute: u32) -> Self {
        Self::Hourly { minute }
    }

    pub fn every(interval: std::time::Duration) -> Self {
        Self::Interval {
            every_secs: interval.as_secs(),
        }
    }

    /// Check the rule is satisfiable
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Hourly { minute } if *minute >= 60 => Err(format!("hourly minute {} out of range", minute)),
            Self::Interval { every_secs: 0 } => Err("interval must be at least one second".to_string()),
            Self::RandomDaily {
                start_hour, end_hour, ..
            } if start_hour >= end_hour || *end_hour > 24 => Err(format!(
                "random-daily window {}..{} is empty or exceeds 24h",
                start_hour, end_hour
            )),
            _ => Ok(()),
        }
    }

    /// The first fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily { time } => next_matching_day(after, |_| Some(*time)),
            Self::Weekdays { time } => next_matching_day(after, |date| {
                (!matches!(date.weekday(), Weekday::Sat | Weekday::Sun)).then_some(*time)
            }),
            Self::Weekly { day, time } => next_matching_day(after, |date| (date.weekday() == *day).then_some(*time)),
            Self::Hourly { minute } => {
                let time = NaiveTime::from_hms_opt(after.hour(), (*minute).min(59), 0).unwrap_or(NaiveTime::MIN);
                let candidate = at(after.date_naive(), time);
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            Self::Interval { every_secs } => after + Duration::seconds((*every_secs).max(1) as i64),
            Self::RandomDaily {
                start_hour,
                end_hour,
                salt,
            } => next_matching_day(after, |date| Some(random_time(date, *start_hour, *end_hour, *salt))),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily { time } => write!(f, "daily at {}", time.format("%H:%M")),
            Self::Weekly { day, time } => write!(f, "every {} at {}", day, time.format("%H:%M")),
            Self::Weekdays { time } => write!(f, "weekdays at {}", time.format("%H:%M")),
            Self::Hourly { minute } => write!(f, "hourly at :{:02}", minute),
            Self::Interval { every_secs } => write!(f, "every {}s", every_secs),
            Self::RandomDaily {
                start_hour, end_hour, ..
            } => write!(f, "daily between {:02}:00 and {:02}:00", start_hour, end_hour),
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or(NaiveTime::MIN)
}

/// Walk forward day by day until `time_for` yields a fire time after `after`
fn next_matching_day(after: DateTime<Utc>, time_for: impl Fn(NaiveDate) -> Option<NaiveTime>) -> DateTime<Utc> {
    let start = after.date_naive();
    for offset in 0..=7 {
        let date = start + Duration::days(offset);
        if let Some(time) = time_for(date) {
            let candidate = at(date, time);
            if candidate > after {
                return candidate;
            }
        }
    }
    // Every rule above matches at least once a week
    at(start + Duration::days(8), NaiveTime::MIN)
}

fn random_time(date: NaiveDate, start_hour: u32, end_hour: u32, salt: u64) -> NaiveTime {
    let seed = (date.num_days_from_ce() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ salt;
    let mut rng = StdRng::seed_from_u64(seed);
    let lo = start_hour.min(23) * 60;
    let hi = (end_hour.min(24) * 60).max(lo + 1);
    let minute_of_day = rng.random_range(lo..hi);
    NaiveTime::from_hms_opt(minute_of_day / 60, minute_of_day % 60, 0).unwrap_or(NaiveTime::MIN)
}

mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{}': {}", s, e)))
    }
}

mod weekday_name {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(day: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&day.to_string().to_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weekday, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<Weekday>()
            .map_err(|_| serde::de::Error::custom(format!("invalid weekday '{}'", s)))
    }
}
