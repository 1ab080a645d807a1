//! Runtime error types.

use thiserror::Error;
use trellis_framework::BuildError;

use crate::config::ConfigError;

/// Errors that can occur while starting or running an application.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The module tree could not be turned into registries.
    #[error("Failed to build registries: {0}")]
    Build(#[from] BuildError),

    /// `build` was called without a module source.
    #[error("No module source configured")]
    MissingSource,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
