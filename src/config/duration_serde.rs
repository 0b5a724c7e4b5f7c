//! Serde helpers for human-readable durations in configuration.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::{fmt, time::Duration};

/// Custom serde functions for `Duration` that accept either a bare number of
/// seconds or a human-readable string ("30s", "2m", "1h30m").
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration_str = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&duration_str)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "a duration as seconds (number) or human-readable string (e.g., '30s', '2m')",
                )
            }

            fn visit_u64<E>(self, seconds: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(seconds))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                humantime::parse_duration(value)
                    .map_err(|e| de::Error::custom(format!("Invalid duration '{value}': {e}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(with = "duration")]
        value: Duration,
    }

    #[test]
    fn parses_human_readable_strings() {
        let w: Wrapper = serde_json::from_str(r#"{"value": "2m"}"#).unwrap();
        assert_eq!(w.value, Duration::from_secs(120));
    }

    #[test]
    fn parses_bare_seconds() {
        let w: Wrapper = serde_json::from_str(r#"{"value": 30}"#).unwrap();
        assert_eq!(w.value, Duration::from_secs(30));
    }

    #[test]
    fn rejects_garbage() {
        let result: Result<Wrapper, _> = serde_json::from_str(r#"{"value": "soon"}"#);
        assert!(result.is_err());
    }
}
