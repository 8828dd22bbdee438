use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Wire format of `finishing_at`, both in the persisted snapshot and in the shadow entity attributes.
pub const FINISHING_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%z";

static DURATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[01][0-9]|2[0-3]):[0-5][0-9]:[0-5][0-9]$").expect("valid duration pattern"));

/// The device action a timer performs when it elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    TurnOn,
    TurnOff,
    Toggle,
}

impl TimerAction {
    /// Name of the service invoked on the source entity's domain.
    pub fn service(&self) -> &'static str {
        match self {
            TimerAction::TurnOn => "turn_on",
            TimerAction::TurnOff => "turn_off",
            TimerAction::Toggle => "toggle",
        }
    }

    /// Human readable form used in log lines ("turn on").
    pub fn describe(&self) -> &'static str {
        match self {
            TimerAction::TurnOn => "turn on",
            TimerAction::TurnOff => "turn off",
            TimerAction::Toggle => "toggle",
        }
    }
}

impl FromStr for TimerAction {
    type Err = ValidationError;

    /// Accepts the canonical service names as well as the display aliases ("Turn on", "Toggle"), case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(' ', "_");
        match normalized.as_str() {
            "turn_on" => Ok(TimerAction::TurnOn),
            "turn_off" => Ok(TimerAction::TurnOff),
            "toggle" => Ok(TimerAction::Toggle),
            _ => Err(ValidationError::InvalidAction),
        }
    }
}

impl fmt::Display for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service())
    }
}

/// A requested timer duration in `HH:MM:SS`, hours limited to 00-23.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimerDuration {
    hours: u8,
    minutes: u8,
    seconds: u8,
}

impl TimerDuration {
    pub fn new(hours: u8, minutes: u8, seconds: u8) -> Result<Self, ValidationError> {
        if hours > 23 || minutes > 59 || seconds > 59 {
            return Err(ValidationError::InvalidDuration);
        }
        Ok(Self {
            hours,
            minutes,
            seconds,
        })
    }

    pub fn as_time_delta(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.hours) * 3600 + i64::from(self.minutes) * 60 + i64::from(self.seconds))
    }
}

impl FromStr for TimerDuration {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if !DURATION_PATTERN.is_match(value) {
            return Err(ValidationError::InvalidDuration);
        }
        let mut parts = value.split(':').map(|p| p.parse::<u8>());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(h)), Some(Ok(m)), Some(Ok(s))) => Self::new(h, m, s),
            _ => Err(ValidationError::InvalidDuration),
        }
    }
}

impl TryFrom<String> for TimerDuration {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimerDuration> for String {
    fn from(duration: TimerDuration) -> String {
        duration.to_string()
    }
}

impl fmt::Display for TimerDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// One active (or restorable) timer, keyed by its shadow entity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    #[serde(with = "finishing_at")]
    pub finishing_at: DateTime<Utc>,
    pub corresponding_entity: String,
    pub duration: TimerDuration,
    pub action: TimerAction,
}

impl TimerRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.finishing_at <= now
    }
}

pub fn format_finishing_at(at: &DateTime<Utc>) -> String {
    at.format(FINISHING_AT_FORMAT).to_string()
}

/// Parses a stored timestamp. The offset may be written with or without a colon; RFC 3339 is accepted as well.
pub fn parse_finishing_at(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_str(value, FINISHING_AT_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
}

mod finishing_at {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_finishing_at(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_finishing_at(&raw).map_err(|e| D::Error::custom(format!("invalid finishing_at [{}]: {}", raw, e)))
    }
}
