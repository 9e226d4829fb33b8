//! Millisecond timestamp helpers.
//!
//! Peers disagree on whether timestamps are JSON integers or floats
//! (`Date.now()` vs `performance.now()`), so every timestamp field accepts both
//! and is normalized to whole milliseconds.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMillis {
    Int(u64),
    Float(f64),
}

fn normalize<E: serde::de::Error>(raw: RawMillis) -> Result<u64, E> {
    match raw {
        RawMillis::Int(v) => Ok(v),
        RawMillis::Float(v) if v.is_finite() && v >= 0.0 => Ok(v.round() as u64),
        RawMillis::Float(v) => Err(E::custom(format!("invalid millisecond timestamp: {}", v))),
    }
}

/// Deserialize a millisecond timestamp from an integer or float.
pub fn millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    normalize(RawMillis::deserialize(deserializer)?)
}

/// Reject negative or non-finite values for plain `f64` durations.
pub(crate) fn non_negative<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(D::Error::custom(format!("expected a non-negative duration, got {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Stamped {
        #[serde(deserialize_with = "millis")]
        ts: u64,
    }

    #[test]
    fn test_integer_and_float_timestamps() {
        let a: Stamped = serde_json::from_str(r#"{"ts": 1712}"#).unwrap();
        let b: Stamped = serde_json::from_str(r#"{"ts": 1711.6}"#).unwrap();
        assert_eq!(a.ts, 1712);
        assert_eq!(b.ts, 1712);
    }

    #[test]
    fn test_negative_timestamp_rejected() {
        let result: Result<Stamped, _> = serde_json::from_str(r#"{"ts": -5.0}"#);
        assert!(result.is_err());
    }
}
