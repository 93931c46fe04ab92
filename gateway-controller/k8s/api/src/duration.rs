use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// A duration in the Go `time.ParseDuration` format used by Kubernetes APIs,
/// e.g. `350ms`, `10s`, `1m30s`.
///
/// Negative durations are rejected: none of the policy fields that use this
/// type have a meaningful interpretation for them.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct K8sDuration(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("negative durations are not supported")]
    Negative,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ms', 's', 'm', or 'h'";

impl K8sDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for K8sDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<K8sDuration> for Duration {
    fn from(K8sDuration(duration): K8sDuration) -> Self {
        duration
    }
}

impl FromStr for K8sDuration {
    type Err = ParseError;

    fn from_str(mut s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        s = s.strip_prefix('+').unwrap_or(s);

        if s == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        while !s.is_empty() {
            let value_len = s
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or(ParseError::NoUnit)?;
            if value_len == 0 {
                return Err(ParseError::InvalidUnit);
            }
            let value = s[..value_len].parse::<f64>()?;
            s = &s[value_len..];

            let unit_len = s
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(s.len());
            let unit = match &s[..unit_len] {
                "ms" => Duration::from_millis(1),
                "s" => Duration::from_secs(1),
                "m" => Duration::from_secs(60),
                "h" => Duration::from_secs(60 * 60),
                _ => return Err(ParseError::InvalidUnit),
            };
            s = &s[unit_len..];

            total += unit.mul_f64(value);
        }

        Ok(Self(total))
    }
}

impl fmt::Debug for K8sDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for K8sDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl Serialize for K8sDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for K8sDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl schemars::JsonSchema for K8sDuration {
    fn schema_name() -> String {
        "K8sDuration".to_string()
    }

    fn json_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        schemars::schema::SchemaObject {
            instance_type: Some(schemars::schema::InstanceType::String.into()),
            ..Default::default()
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_durations() {
        assert_eq!(
            "350ms".parse::<K8sDuration>().unwrap().as_duration(),
            Duration::from_millis(350)
        );
        assert_eq!(
            "10s".parse::<K8sDuration>().unwrap().as_duration(),
            Duration::from_secs(10)
        );
        assert_eq!(
            "1m30s".parse::<K8sDuration>().unwrap().as_duration(),
            Duration::from_secs(90)
        );
        assert_eq!(
            "1.5h".parse::<K8sDuration>().unwrap().as_duration(),
            Duration::from_secs(5400)
        );
        assert_eq!(
            "0".parse::<K8sDuration>().unwrap().as_duration(),
            Duration::ZERO
        );
    }

    #[test]
    fn rejects_bad_durations() {
        assert_eq!("10".parse::<K8sDuration>().unwrap_err(), ParseError::NoUnit);
        assert_eq!(
            "10d".parse::<K8sDuration>().unwrap_err(),
            ParseError::InvalidUnit
        );
        assert_eq!(
            "-10s".parse::<K8sDuration>().unwrap_err(),
            ParseError::Negative
        );
    }

    #[test]
    fn round_trips_through_serde() {
        let d: K8sDuration = serde_json::from_str("\"2s\"").unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(2));
        assert_eq!(serde_json::to_string(&d).unwrap(), "\"2s\"");
    }
}
