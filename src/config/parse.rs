//! Environment variable parsing utilities.

use std::str::FromStr;
use std::time::Duration;

use super::ConfigError;

/// Get environment variable with default value.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get optional environment variable (None if empty or missing).
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Parse environment variable as boolean.
/// Treats "1", "true", "yes" (case-insensitive) as true.
pub fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// Parse environment variable with type conversion.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|e: T::Err| ConfigError::Parse {
            key: key.into(),
            value: v,
            error: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Parse duration string (e.g., "250ms", "30s", "2m", "1h", "1d").
/// Returns None for "off" or "0". A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Option<Duration>, String> {
    let s = s.trim().to_lowercase();

    if s == "off" || s == "0" || s.is_empty() {
        return Ok(None);
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let scale = |factor: u64| {
        num.checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration: {}", s))
    };
    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "" | "s" => Duration::from_secs(num),
        "m" => scale(60)?,
        "h" => scale(3600)?,
        "d" => scale(86400)?,
        _ => return Err(format!("invalid unit: {}", unit)),
    };

    if duration.is_zero() {
        return Ok(None);
    }
    Ok(Some(duration))
}

/// Parse environment variable as duration.
pub fn env_duration(key: &str, default: &str) -> Result<Option<Duration>, ConfigError> {
    let value = env_or(key, default);
    parse_duration(&value).map_err(|e| ConfigError::Parse {
        key: key.into(),
        value,
        error: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("off").unwrap(), None);
        assert_eq!(parse_duration("0").unwrap(), None);
        assert_eq!(parse_duration("0ms").unwrap(), None);
        assert_eq!(parse_duration("").unwrap(), None);

        assert_eq!(
            parse_duration("250ms").unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            parse_duration("30s").unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_duration("2m").unwrap(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            parse_duration(" 1H ").unwrap(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            parse_duration("1d").unwrap(),
            Some(Duration::from_secs(86400))
        );

        // Plain seconds
        assert_eq!(
            parse_duration("120").unwrap(),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("300000000000000000d").is_err());
        assert!(parse_duration("18446744073709551615h").is_err());
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("TOKIO_WORKERS_TEST_PARSE_OK", "42");
        std::env::set_var("TOKIO_WORKERS_TEST_PARSE_BAD", "forty-two");

        assert_eq!(env_parse("TOKIO_WORKERS_TEST_PARSE_OK", 0usize).unwrap(), 42);
        assert_eq!(env_parse("TOKIO_WORKERS_TEST_PARSE_UNSET", 7usize).unwrap(), 7);

        let err = env_parse("TOKIO_WORKERS_TEST_PARSE_BAD", 0usize).unwrap_err();
        assert_eq!(err.key(), "TOKIO_WORKERS_TEST_PARSE_BAD");

        std::env::remove_var("TOKIO_WORKERS_TEST_PARSE_OK");
        std::env::remove_var("TOKIO_WORKERS_TEST_PARSE_BAD");
    }

    #[test]
    fn test_env_bool() {
        std::env::set_var("TOKIO_WORKERS_TEST_BOOL", "Yes");
        assert!(env_bool("TOKIO_WORKERS_TEST_BOOL", false));
        std::env::set_var("TOKIO_WORKERS_TEST_BOOL", "0");
        assert!(!env_bool("TOKIO_WORKERS_TEST_BOOL", true));
        std::env::remove_var("TOKIO_WORKERS_TEST_BOOL");
        assert!(env_bool("TOKIO_WORKERS_TEST_BOOL", true));
    }
}
