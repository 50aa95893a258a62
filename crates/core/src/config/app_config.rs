use crate::config::{ConfigError, ConfigSource};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Configuration trait for application configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Environment enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue {
                field: "environment".to_string(),
                value: s.to_string(),
                expected: "development, testing, or production".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_str = match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        };
        write!(f, "{}", env_str)
    }
}

impl Environment {
    /// Read the environment from `var`, defaulting to development when unset
    pub fn from_env_var(var: &str) -> Result<Self, ConfigError> {
        match env::var(var) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Environment::Development),
        }
    }
}

/// Read `key` and parse it, falling back to `default` when the variable is unset.
///
/// `expected` is used in the error when the value does not parse.
pub fn parse_env_or<T: FromStr>(
    key: &str,
    field: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::invalid_value(field, raw, expected)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::environment_error(format!(
            "{} contains invalid unicode",
            key
        ))),
    }
}

/// Like [`parse_env_or`] for optional values: unset, empty or `0` mean "disabled".
pub fn parse_optional_env<T>(
    key: &str,
    field: &str,
    default: Option<T>,
    expected: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::invalid_value(field, raw.clone(), expected))?;
            if value == T::default() {
                Ok(None)
            } else {
                Ok(Some(value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::environment_error(format!(
            "{} contains invalid unicode",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Testing".parse::<Environment>().unwrap(), Environment::Testing);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    #[serial]
    fn test_environment_from_env_var() {
        env::remove_var("ECHOWS_CORE_TEST_ENV");
        assert_eq!(
            Environment::from_env_var("ECHOWS_CORE_TEST_ENV").unwrap(),
            Environment::Development
        );

        env::set_var("ECHOWS_CORE_TEST_ENV", "production");
        assert_eq!(
            Environment::from_env_var("ECHOWS_CORE_TEST_ENV").unwrap(),
            Environment::Production
        );
        env::remove_var("ECHOWS_CORE_TEST_ENV");
    }

    #[test]
    #[serial]
    fn test_parse_env_or() {
        env::remove_var("ECHOWS_CORE_TEST_PORT");
        let port: u16 = parse_env_or("ECHOWS_CORE_TEST_PORT", "port", 9001, "port").unwrap();
        assert_eq!(port, 9001);

        env::set_var("ECHOWS_CORE_TEST_PORT", " 8080 ");
        let port: u16 = parse_env_or("ECHOWS_CORE_TEST_PORT", "port", 9001, "port").unwrap();
        assert_eq!(port, 8080);

        env::set_var("ECHOWS_CORE_TEST_PORT", "not-a-port");
        let err = parse_env_or::<u16>("ECHOWS_CORE_TEST_PORT", "port", 9001, "valid port")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        env::remove_var("ECHOWS_CORE_TEST_PORT");
    }

    #[test]
    #[serial]
    fn test_parse_optional_env() {
        env::remove_var("ECHOWS_CORE_TEST_IDLE");
        let idle: Option<u64> =
            parse_optional_env("ECHOWS_CORE_TEST_IDLE", "idle", None, "seconds").unwrap();
        assert_eq!(idle, None);

        env::set_var("ECHOWS_CORE_TEST_IDLE", "30");
        let idle: Option<u64> =
            parse_optional_env("ECHOWS_CORE_TEST_IDLE", "idle", None, "seconds").unwrap();
        assert_eq!(idle, Some(30));

        env::set_var("ECHOWS_CORE_TEST_IDLE", "0");
        let idle: Option<u64> =
            parse_optional_env("ECHOWS_CORE_TEST_IDLE", "idle", Some(5), "seconds").unwrap();
        assert_eq!(idle, None);
        env::remove_var("ECHOWS_CORE_TEST_IDLE");
    }
}
