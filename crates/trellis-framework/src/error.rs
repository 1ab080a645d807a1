//! Build-time errors.
//!
//! Every variant is fatal: a registry that fails to build must never serve.

use std::io;

use thiserror::Error;
use trellis_core::{Method, PatternError};

/// Errors raised while building the route and channel registries.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A module file exported the wrong kind of value, or nothing at all.
    #[error("malformed module '{path}': {reason}")]
    MalformedModule {
        /// Source-relative file path.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A directory of the module tree could not be listed.
    #[error("failed to read directory '{path}'")]
    UnreadableDirectory {
        /// Source-relative directory path.
        path: String,
        #[source]
        source: io::Error,
    },

    /// Two definitions claimed the same method on the same path.
    #[error("duplicate route {method} {path}")]
    DuplicateRoute {
        /// The conflicting method.
        method: Method,
        /// The normalized path.
        path: String,
    },

    /// Two channels claimed the same path.
    #[error("duplicate channel '{path}'")]
    DuplicateChannel {
        /// The normalized path.
        path: String,
    },

    /// An alias matched no registered route or channel.
    #[error("alias '{file}' matches nothing under '{prefix}'")]
    UnresolvedAlias {
        /// The alias file.
        file: String,
        /// The source prefix it tried to clone.
        prefix: String,
    },

    /// A derived path is not a valid pattern.
    #[error("invalid path '{path}'")]
    InvalidPattern {
        /// The path as derived from the module tree.
        path: String,
        #[source]
        source: PatternError,
    },
}

impl BuildError {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedModule {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for registry construction.
pub type BuildResult<T> = Result<T, BuildError>;
