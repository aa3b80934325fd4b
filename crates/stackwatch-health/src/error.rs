//! Health engine error types.
//!
//! Probe and restart failures never show up here: they are folded into
//! probe outcomes and restart outcomes. Only caller mistakes do.

use thiserror::Error;

use stackwatch_core::ConfigError;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("invalid service profile: {0}")]
    Config(#[from] ConfigError),

    #[error("service already registered: {0}")]
    AlreadyRegistered(String),

    #[error("service not registered: {0}")]
    UnknownService(String),
}

pub type HealthResult<T> = Result<T, HealthError>;
