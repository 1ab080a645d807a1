//! # Trellis Core
//!
//! Transport-agnostic primitives shared by every Trellis layer:
//!
//! - **Patterns**: compiled path matchers, cached process-wide ([`pattern`])
//! - **Context**: one call shape for both transports ([`Context`])
//! - **Handlers**: axum-style async functions with [`FromContext`] arguments
//! - **Errors**: the [`StructuredError`] shape every caller receives
//!
//! ```text
//! HTTP request ──┐
//!                ├──▶ Context ──▶ middleware ──▶ handler ──▶ json/text/file
//! socket event ──┘
//! ```

pub mod ack;
pub mod context;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod pattern;
pub mod transport;

pub use ack::Ack;
pub use context::{
    Context, HeaderMap, HttpSurface, QueryMap, Reply, ReplyBody, RequestParts, default_success,
};
pub use error::{
    ErrorEntry, ExtractError, ExtractResult, HandlerError, HandlerResult, PatternError,
    StructuredError,
};
pub use extractor::{Body, FromContext, Headers, Injected, Locals, Params, Query, RawBody};
pub use handler::{
    BoxFuture, BoxedHandler, ErasedHandler, Handler, HandlerFn, IntoHandlerResult, catch_panic,
    guarded, into_handler,
};
pub use pattern::{CompiledPattern, ParamMap, WILDCARD_KEY};
pub use transport::{Method, Transport, UnknownMethod};
