//! Configuration for Trellis applications.
//!
//! Layered loading through figment, a typed schema and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, ServerConfig, SpanEventConfig, TrellisConfig,
};
pub use trellis_framework::RoutingConfig;
pub use validation::validate_config;
