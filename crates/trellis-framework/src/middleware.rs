//! Middleware declared by directory middleware files and by routes.
//!
//! A middleware file exports one [`Middleware`] bundle, which applies to every
//! route and channel nested beneath its directory. The bundle carries four
//! independent lists:
//!
//! | list          | runs                          | may reject | produces     |
//! |---------------|-------------------------------|------------|--------------|
//! | `request`     | every call to a nested route  | yes        | context edits |
//! | `gates`       | once per connection, at mount | yes        | nothing      |
//! | `builders`    | once per connection, at mount | yes        | injected value |
//! | `mounted`     | once per connection, at mount | no         | side effects |

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use trellis_core::{Context, HandlerResult, StructuredError};

use crate::socket::Connection;

/// What a request middleware asks the chain to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next middleware or the handler.
    Next,
    /// Stop here; the middleware has responded.
    Halt,
}

/// A gate's refusal.
///
/// Without a reason the caller later sees a 401; with one, a 403 carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rejection {
    reason: Option<String>,
}

impl Rejection {
    /// A refusal without a reason.
    pub fn unauthorized() -> Self {
        Self { reason: None }
    }

    /// A refusal with a reason.
    pub fn because(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// The error delivered when a client invokes the refused path.
    pub fn to_error(&self) -> StructuredError {
        match &self.reason {
            None => StructuredError::unauthorized(),
            Some(reason) => StructuredError::forbidden(reason.clone()),
        }
    }
}

impl From<&str> for Rejection {
    fn from(reason: &str) -> Self {
        Self::because(reason)
    }
}

impl From<String> for Rejection {
    fn from(reason: String) -> Self {
        Self::because(reason)
    }
}

/// Outcome of a gate.
pub type GateResult = Result<(), Rejection>;

/// Per-call middleware run before a route handler.
pub type RequestMiddleware =
    Arc<dyn Fn(Context) -> BoxFuture<'static, HandlerResult<Flow>> + Send + Sync>;

/// Mount-time gate.
pub type Gate = Arc<dyn Fn(Connection) -> BoxFuture<'static, GateResult> + Send + Sync>;

/// Mount-time gate that may also produce a value injected into handler calls.
pub type Builder =
    Arc<dyn Fn(Connection) -> BoxFuture<'static, Result<Option<Value>, Rejection>> + Send + Sync>;

/// Mount-time side effect.
pub type MountedHook = Arc<dyn Fn(Connection) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn request_middleware<F, Fut>(f: F) -> RequestMiddleware
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Flow>> + Send + 'static,
{
    Arc::new(move |ctx: Context| -> BoxFuture<'static, HandlerResult<Flow>> {
        Box::pin(f(ctx))
    })
}

pub fn gate<F, Fut>(f: F) -> Gate
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GateResult> + Send + 'static,
{
    Arc::new(move |conn: Connection| -> BoxFuture<'static, GateResult> { Box::pin(f(conn)) })
}

pub fn builder<F, Fut>(f: F) -> Builder
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, Rejection>> + Send + 'static,
{
    Arc::new(
        move |conn: Connection| -> BoxFuture<'static, Result<Option<Value>, Rejection>> {
            Box::pin(f(conn))
        },
    )
}

pub fn mounted_hook<F, Fut>(f: F) -> MountedHook
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |conn: Connection| -> BoxFuture<'static, ()> { Box::pin(f(conn)) })
}

/// The export of a middleware file.
#[derive(Clone, Default)]
pub struct Middleware {
    pub(crate) request: Vec<RequestMiddleware>,
    pub(crate) gates: Vec<Gate>,
    pub(crate) builders: Vec<Builder>,
    pub(crate) mounted: Vec<MountedHook>,
}

impl Middleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds per-call middleware for nested routes.
    pub fn request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Flow>> + Send + 'static,
    {
        self.request.push(request_middleware(f));
        self
    }

    /// Adds a mount-time gate for nested channels.
    pub fn gate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GateResult> + Send + 'static,
    {
        self.gates.push(gate(f));
        self
    }

    /// Adds a value-producing gate for nested channels.
    pub fn builder<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, Rejection>> + Send + 'static,
    {
        self.builders.push(builder(f));
        self
    }

    /// Adds a hook run once a nested channel is mounted.
    pub fn on_mounted<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.mounted.push(mounted_hook(f));
        self
    }

    /// Appends another bundle's lists after this one's.
    pub fn merge(mut self, other: Middleware) -> Self {
        self.request.extend(other.request);
        self.gates.extend(other.gates);
        self.builders.extend(other.builders);
        self.mounted.extend(other.mounted);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty()
            && self.gates.is_empty()
            && self.builders.is_empty()
            && self.mounted.is_empty()
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("request", &self.request.len())
            .field("gates", &self.gates.len())
            .field("builders", &self.builders.len())
            .field("mounted", &self.mounted.len())
            .finish()
    }
}

/// The middleware declared at one directory, keyed by that directory's path.
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) path: String,
    pub(crate) middleware: Middleware,
}

impl Layer {
    pub fn new(path: impl Into<String>, middleware: Middleware) -> Self {
        Self {
            path: path.into(),
            middleware,
        }
    }

    /// The directory path this layer is keyed by.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn middleware(&self) -> &Middleware {
        &self.middleware
    }
}

/// Ancestor layers in effect at some point of the tree, outermost first.
pub type Scope = Vec<Arc<Layer>>;
