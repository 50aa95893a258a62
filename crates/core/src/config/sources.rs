use std::fmt;

/// Where a configuration field got its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from the named environment variable
    EnvVar(String),
    /// Built-in default; `var` is the variable that would override it
    Default { var: String, value: String },
}

impl ConfigSource {
    /// `EnvVar` if `var` is set, otherwise `Default` with `default`
    pub fn env_or_default(var: &str, default: impl Into<String>) -> Self {
        match std::env::var_os(var) {
            Some(_) => ConfigSource::EnvVar(var.to_string()),
            None => ConfigSource::Default {
                var: var.to_string(),
                value: default.into(),
            },
        }
    }

    pub fn is_env_var(&self) -> bool {
        matches!(self, ConfigSource::EnvVar(_))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, ConfigSource::Default { .. })
    }

    /// Environment variable that controls the field
    pub fn env_var(&self) -> &str {
        match self {
            ConfigSource::EnvVar(var) | ConfigSource::Default { var, .. } => var,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::EnvVar(var) => write!(f, "from {}", var),
            ConfigSource::Default { var, value } => {
                write!(f, "default {} (override with {})", value, var)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_or_default() {
        std::env::remove_var("ECHOWS_SOURCES_TEST");
        let source = ConfigSource::env_or_default("ECHOWS_SOURCES_TEST", "9001");
        assert!(source.is_default());
        assert_eq!(
            source.to_string(),
            "default 9001 (override with ECHOWS_SOURCES_TEST)"
        );

        std::env::set_var("ECHOWS_SOURCES_TEST", "1");
        let source = ConfigSource::env_or_default("ECHOWS_SOURCES_TEST", "9001");
        assert!(source.is_env_var());
        assert_eq!(source.env_var(), "ECHOWS_SOURCES_TEST");
        std::env::remove_var("ECHOWS_SOURCES_TEST");
    }
}
