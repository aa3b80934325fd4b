//! Shared types and registry parsing for stackwatch.
//!
//! Defines the [`ServiceProfile`] every probe runs against, the
//! [`HealthStatus`] vocabulary, and the `stackwatch.toml` registry format.
//! All validation happens here, at registration time.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{MonitorSettings, ServiceEntry, StackwatchConfig};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
