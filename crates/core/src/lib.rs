//! # echows-core
//!
//! Configuration foundation shared by the echows crates: the
//! [`AppConfigTrait`] contract, environment helpers and value validators.

pub mod config;

pub use config::validation::ConfigError;
pub use config::{
    parse_env_or, parse_optional_env, AppConfigTrait, ConfigSource, ConfigValidator, Environment,
    LengthValidator, NonZeroValidator, RangeValidator,
};
