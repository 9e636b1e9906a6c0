//! Environment variable loading utilities

use crate::{Result, ToolingError};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Load an environment variable as a string
///
/// Returns `Ok(None)` when the variable is unset and an error when it is set
/// but not valid UTF-8.
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ToolingError::Config(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Load and parse an environment variable
///
/// ```rust,ignore
/// let retries: Option<u32> = get_env_parse("GUARD_DEFAULT_RETRIES")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.trim().parse::<T>().map_err(|e| {
                ToolingError::Config(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Load a boolean environment variable
///
/// Accepts "true", "1", "yes", "on" and "false", "0", "no", "off"
/// (case-insensitive).
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ToolingError::Config(format!(
                "Invalid boolean value for {}: {}",
                key, val
            ))),
        },
        None => Ok(None),
    }
}

/// Load a duration environment variable, see [`parse_duration`]
pub fn get_env_duration(key: &str) -> Result<Option<Duration>> {
    match get_env(key)? {
        Some(val) => parse_duration(&val)
            .map(Some)
            .map_err(|e| ToolingError::Config(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Parse a human duration
///
/// Supported suffixes are `ms`, `s`, `m` and `h`. A bare number is read as
/// milliseconds.
///
/// ```rust
/// use std::time::Duration;
/// use tooling::config::parse_duration;
///
/// assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration> {
    let value = input.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| ToolingError::Config(format!("Invalid duration: '{}'", input)))?;

    let duration = match unit.trim() {
        "" | "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        other => {
            return Err(ToolingError::Config(format!(
                "Unknown duration unit '{}' in '{}'",
                other, input
            )))
        }
    };
    Ok(duration)
}

/// Build environment variable key with prefix
///
/// ```rust,ignore
/// let key = build_env_key("GUARD_", "hard_timeout"); // "GUARD_HARD_TIMEOUT"
/// ```
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

/// Overwrite `target` when `{prefix}{NAME}` is set
pub fn override_parse<T>(target: &mut T, prefix: &str, name: &str) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = get_env_parse(&build_env_key(prefix, name))? {
        *target = value;
    }
    Ok(())
}

/// Overwrite a boolean `target` when `{prefix}{NAME}` is set
pub fn override_bool(target: &mut bool, prefix: &str, name: &str) -> Result<()> {
    if let Some(value) = get_env_bool(&build_env_key(prefix, name))? {
        *target = value;
    }
    Ok(())
}

/// Overwrite a duration `target` when `{prefix}{NAME}` is set
pub fn override_duration(target: &mut Duration, prefix: &str, name: &str) -> Result<()> {
    if let Some(value) = get_env_duration(&build_env_key(prefix, name))? {
        *target = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_missing() {
        let result = get_env("TOOLING_TEST_MISSING_VAR_12345").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_get_env_parse() {
        env::set_var("TOOLING_TEST_NUMBER", " 42 ");
        let result: Option<i32> = get_env_parse("TOOLING_TEST_NUMBER").unwrap();
        assert_eq!(result, Some(42));
        env::remove_var("TOOLING_TEST_NUMBER");
    }

    #[test]
    fn test_get_env_parse_invalid() {
        env::set_var("TOOLING_TEST_INVALID_NUMBER", "not_a_number");
        let result: Result<Option<i32>> = get_env_parse("TOOLING_TEST_INVALID_NUMBER");
        assert!(result.is_err());
        env::remove_var("TOOLING_TEST_INVALID_NUMBER");
    }

    #[test]
    fn test_get_env_bool() {
        let cases = [
            ("true", true),
            ("TRUE", true),
            ("1", true),
            ("yes", true),
            ("on", true),
            ("false", false),
            ("0", false),
            ("no", false),
            ("Off", false),
        ];

        for (value, expected) in cases {
            env::set_var("TOOLING_TEST_BOOL", value);
            let result = get_env_bool("TOOLING_TEST_BOOL").unwrap();
            assert_eq!(result, Some(expected), "Failed for value: {}", value);
        }
        env::remove_var("TOOLING_TEST_BOOL");
    }

    #[test]
    fn test_get_env_bool_invalid() {
        env::set_var("TOOLING_TEST_BOOL_INVALID", "maybe");
        assert!(get_env_bool("TOOLING_TEST_BOOL_INVALID").is_err());
        env::remove_var("TOOLING_TEST_BOOL_INVALID");
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration(" 10 s").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_override_duration() {
        let mut interval = Duration::from_secs(30);
        env::set_var("TOOLING_OVR_INTERVAL", "45s");
        override_duration(&mut interval, "TOOLING_OVR_", "interval").unwrap();
        assert_eq!(interval, Duration::from_secs(45));
        env::remove_var("TOOLING_OVR_INTERVAL");

        override_duration(&mut interval, "TOOLING_OVR_", "interval").unwrap();
        assert_eq!(interval, Duration::from_secs(45));
    }

    #[test]
    fn test_override_bool_and_parse() {
        let mut enabled = false;
        let mut limit = 50usize;
        env::set_var("TOOLING_OVR2_ENABLED", "yes");
        env::set_var("TOOLING_OVR2_LIMIT", "7");
        override_bool(&mut enabled, "TOOLING_OVR2_", "enabled").unwrap();
        override_parse(&mut limit, "TOOLING_OVR2_", "limit").unwrap();
        assert!(enabled);
        assert_eq!(limit, 7);
        env::remove_var("TOOLING_OVR2_ENABLED");
        env::remove_var("TOOLING_OVR2_LIMIT");
    }

    #[test]
    fn test_build_env_key() {
        assert_eq!(build_env_key("APP_", "port"), "APP_PORT");
        assert_eq!(build_env_key("", "debug"), "DEBUG");
        assert_eq!(build_env_key("MY_", "some_value"), "MY_SOME_VALUE");
    }
}
