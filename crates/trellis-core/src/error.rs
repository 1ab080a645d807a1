//! Error types that cross the dispatch boundary.
//!
//! [`StructuredError`] is the only error shape any caller ever sees, on either
//! transport. Everything a handler can fail with is a [`HandlerError`], which
//! is folded into a `StructuredError` at the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Structured Errors
// =============================================================================

/// One entry of a [`StructuredError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Short machine-readable message.
    pub error: String,
    /// Optional diagnostic payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Optional nested messages (validation failures and the like).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ErrorEntry {
    /// Creates an entry with just a message.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            data: None,
            errors: None,
        }
    }
}

/// The error shape delivered to callers of either transport.
///
/// Serializes as `{ "statusCode": 403, "errors": [{ "error": "..." }] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
pub struct StructuredError {
    /// HTTP-equivalent status code.
    pub status_code: u16,
    /// One or more error entries.
    pub errors: Vec<ErrorEntry>,
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self
            .errors
            .first()
            .map(|e| e.error.as_str())
            .unwrap_or("unknown error");
        write!(f, "{} {}", self.status_code, first)
    }
}

impl StructuredError {
    /// Creates an error with a single entry.
    pub fn new(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            status_code,
            errors: vec![ErrorEntry::new(error)],
        }
    }

    /// Attaches a diagnostic payload to the first entry.
    pub fn with_data(mut self, data: Value) -> Self {
        if let Some(entry) = self.errors.first_mut() {
            entry.data = Some(data);
        }
        self
    }

    /// Attaches nested messages to the first entry.
    pub fn with_messages(mut self, messages: Vec<String>) -> Self {
        if let Some(entry) = self.errors.first_mut() {
            entry.errors = Some(messages);
        }
        self
    }

    /// 400 Bad Request.
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(400, error)
    }

    /// 401 Unauthorized.
    pub fn unauthorized() -> Self {
        Self::new(401, "unauthorized")
    }

    /// 403 Forbidden with the gate's rejection reason.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(403, reason)
    }

    /// 404 for a path that matches nothing registered.
    pub fn not_found(path: &str) -> Self {
        Self::new(404, "not-found").with_data(Value::String(path.to_string()))
    }

    /// 500 wrapping an arbitrary diagnostic value.
    pub fn internal(diagnostic: Value) -> Self {
        Self::new(500, "internal-error").with_data(diagnostic)
    }

    /// Recognizes a JSON value that already has the structured shape.
    ///
    /// A value qualifies only if it has an integer `statusCode` in the
    /// 100..=599 range and a non-empty `errors` array of entries.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let code = obj.get("statusCode")?.as_u64()?;
        if !(100..=599).contains(&code) {
            return None;
        }
        let parsed: Self = serde_json::from_value(value.clone()).ok()?;
        if parsed.errors.is_empty() {
            return None;
        }
        Some(parsed)
    }

    /// Serializes into a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Anything a handler or middleware can fail with.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An explicit structured rejection; forwarded verbatim.
    #[error(transparent)]
    Structured(#[from] StructuredError),

    /// An arbitrary thrown JSON value.
    #[error("thrown value: {0}")]
    Value(Value),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),
}

impl From<Value> for HandlerError {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl HandlerError {
    /// Folds this error into the shape delivered to callers.
    ///
    /// Recognized structured shapes pass through unchanged; everything else
    /// becomes a 500 carrying the original value as diagnostic data.
    pub fn into_structured(self) -> StructuredError {
        match self {
            Self::Structured(e) => e,
            Self::Value(v) => {
                StructuredError::from_value(&v).unwrap_or_else(|| StructuredError::internal(v))
            }
            Self::Other(e) => match e.downcast::<StructuredError>() {
                Ok(structured) => structured,
                Err(e) => StructuredError::internal(Value::String(format!("{e:#}"))),
            },
            Self::Panic(msg) => StructuredError::internal(Value::String(msg)),
        }
    }
}

/// Result type returned by handlers and middleware.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

// =============================================================================
// Extraction Errors
// =============================================================================

/// Errors that can occur while extracting a handler argument from a context.
///
/// Extraction failures reach the caller as a 400.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The body could not be decoded into the requested type.
    #[error("failed to decode body as '{expected}': {reason}")]
    InvalidBody {
        /// Requested type name.
        expected: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// The argument is only available on another transport.
    #[error("'{what}' is not available on the {transport} transport")]
    Unavailable {
        /// What was requested.
        what: &'static str,
        /// The transport of the call.
        transport: &'static str,
    },

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl From<ExtractError> for StructuredError {
    fn from(err: ExtractError) -> Self {
        StructuredError::bad_request("invalid-request").with_messages(vec![err.to_string()])
    }
}

impl From<ExtractError> for HandlerError {
    fn from(err: ExtractError) -> Self {
        Self::Structured(err.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

// =============================================================================
// Pattern Errors
// =============================================================================

/// Errors that can occur while compiling a path pattern.
#[derive(Debug, Clone, Error)]
pub enum PatternError {
    /// A `*` segment appeared before the last position.
    #[error("wildcard must be the last segment in pattern '{pattern}'")]
    WildcardNotLast {
        /// The offending pattern.
        pattern: String,
    },

    /// A `:` segment had no usable name.
    #[error("invalid parameter name '{name}' in pattern '{pattern}'")]
    InvalidParam {
        /// The offending pattern.
        pattern: String,
        /// The parameter segment.
        name: String,
    },

    /// The same parameter name appeared twice.
    #[error("duplicate parameter '{name}' in pattern '{pattern}'")]
    DuplicateParam {
        /// The offending pattern.
        pattern: String,
        /// The repeated name.
        name: String,
    },

    /// The generated regex was rejected.
    #[error("failed to compile pattern '{pattern}': {reason}")]
    Regex {
        /// The offending pattern.
        pattern: String,
        /// Reason reported by the regex engine.
        reason: String,
    },
}
