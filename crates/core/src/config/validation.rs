use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Environment variable error: {message}")]
    EnvironmentError { message: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a validation failed error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Create an environment error
    pub fn environment_error(message: impl Into<String>) -> Self {
        Self::EnvironmentError {
            message: message.into(),
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T> {
    /// Validate a configuration value
    fn validate(&self, value: &T) -> Result<(), ConfigError>;
}

/// Rejects zero for counts, sizes and timeouts
pub struct NonZeroValidator {
    pub field: &'static str,
}

impl NonZeroValidator {
    pub fn new(field: &'static str) -> Self {
        Self { field }
    }
}

impl ConfigValidator<u64> for NonZeroValidator {
    fn validate(&self, value: &u64) -> Result<(), ConfigError> {
        if *value == 0 {
            return Err(ConfigError::invalid_value(
                self.field,
                value.to_string(),
                "a value greater than 0",
            ));
        }
        Ok(())
    }
}

impl ConfigValidator<usize> for NonZeroValidator {
    fn validate(&self, value: &usize) -> Result<(), ConfigError> {
        ConfigValidator::<u64>::validate(self, &(*value as u64))
    }
}

/// Inclusive bounds for counts and durations
pub struct RangeValidator {
    pub field: &'static str,
    pub min: u64,
    pub max: u64,
}

impl RangeValidator {
    pub fn new(field: &'static str, min: u64, max: u64) -> Self {
        Self { field, min, max }
    }
}

impl ConfigValidator<u64> for RangeValidator {
    fn validate(&self, value: &u64) -> Result<(), ConfigError> {
        if *value < self.min || *value > self.max {
            return Err(ConfigError::invalid_value(
                self.field,
                value.to_string(),
                format!("a value between {} and {}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

/// String length validator
pub struct LengthValidator {
    pub field: &'static str,
    pub min_length: usize,
    pub max_length: Option<usize>,
}

impl LengthValidator {
    pub fn min(field: &'static str, min_length: usize) -> Self {
        Self {
            field,
            min_length,
            max_length: None,
        }
    }

    pub fn range(field: &'static str, min_length: usize, max_length: usize) -> Self {
        Self {
            field,
            min_length,
            max_length: Some(max_length),
        }
    }
}

impl ConfigValidator<String> for LengthValidator {
    fn validate(&self, value: &String) -> Result<(), ConfigError> {
        if value.len() < self.min_length {
            return Err(ConfigError::invalid_value(
                self.field,
                value.clone(),
                format!("string with at least {} characters", self.min_length),
            ));
        }

        if let Some(max_length) = self.max_length {
            if value.len() > max_length {
                return Err(ConfigError::invalid_value(
                    self.field,
                    value.clone(),
                    format!("string with at most {} characters", max_length),
                ));
            }
        }

        Ok(())
    }
}
