use std::{fmt, time::Duration};

use serde::{Deserialize, Deserializer};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A duration that can be parsed from human-readable strings like "10s", "1m30s", "500ms".
///
/// Bare numbers are taken as seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    /// Creates a `HumanDuration` from a number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Returns the duration.
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Self(Duration::from_secs(secs))),
            Raw::Text(s) => parse_duration(&s).map(HumanDuration).map_err(serde::de::Error::custom),
        }
    }
}

/// Parses a human-readable duration.
///
/// A duration is a sequence of numbers, each followed by a unit (`ns`, `us`/`µs`, `ms`, `s`, `m`, `h`), such as
/// `1h30m` or `1.5s`. A trailing number without a unit is taken as seconds.
///
/// # Errors
///
/// If the string is empty, contains an unknown unit or stray characters, or sums to zero, an error is returned.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let mut total = Duration::ZERO;
    let mut current_num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            current_num.push(c);
        } else if c.is_alphabetic() {
            if current_num.is_empty() {
                return Err(format!("unexpected unit '{}' without a number", c));
            }

            let mut unit = String::from(c);
            while let Some(next) = chars.next_if(|c| c.is_alphabetic()) {
                unit.push(next);
            }

            let unit_nanos = match unit.as_str() {
                "ns" => 1,
                "us" | "µs" => 1_000,
                "ms" => 1_000_000,
                "s" => NANOS_PER_SEC,
                "m" => 60 * NANOS_PER_SEC,
                "h" => 3600 * NANOS_PER_SEC,
                _ => return Err(format!("unknown duration unit: {}", unit)),
            };

            total += scaled(&current_num, unit_nanos)?;
            current_num.clear();
        } else if !c.is_whitespace() {
            return Err(format!("unexpected character: {}", c));
        }
    }

    if !current_num.is_empty() {
        total += scaled(&current_num, NANOS_PER_SEC)?;
    }

    if total.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(total)
}

fn scaled(num: &str, unit_nanos: u64) -> Result<Duration, String> {
    let invalid = || format!("invalid number: {}", num);

    if num.contains('.') {
        let value: f64 = num.parse().map_err(|_| invalid())?;
        Duration::try_from_secs_f64(value * unit_nanos as f64 / NANOS_PER_SEC as f64).map_err(|e| e.to_string())
    } else {
        let value: u64 = num.parse().map_err(|_| invalid())?;
        value
            .checked_mul(unit_nanos)
            .map(Duration::from_nanos)
            .ok_or_else(|| format!("duration out of range: {}", num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("250us"), Ok(Duration::from_micros(250)));
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("1s!").is_err());
        assert!(parse_duration("1..2s").is_err());
    }

    #[test]
    fn deserializes_strings_and_numbers() {
        let d: HumanDuration = serde_yaml::from_str("\"1m\"").unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(60));

        let d: HumanDuration = serde_yaml::from_str("15").unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(15));

        assert!(serde_yaml::from_str::<HumanDuration>("\"soon\"").is_err());
    }
}
