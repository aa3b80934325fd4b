//! Registration-time configuration errors.

use thiserror::Error;

/// Result type alias for configuration and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors detected while reading the registry or validating a profile.
///
/// These are always raised at registration time, never deferred to probe time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse registry file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("service {service}: unknown check strategy {strategy:?}")]
    UnknownStrategy { service: String, strategy: String },

    #[error("service {service}: malformed target: {reason}")]
    MalformedTarget { service: String, reason: String },

    #[error("service {service}: invalid duration {value:?} for {field}")]
    InvalidDuration {
        service: String,
        field: &'static str,
        value: String,
    },

    #[error("service {service}: {field} must be greater than zero")]
    ZeroValue { service: String, field: &'static str },

    #[error("invalid monitor setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("service id must not be empty")]
    EmptyServiceId,
}
