//! Route declarations and their registered definitions.
//!
//! A route file exports a [`Route`]; each method it declares becomes one
//! [`RouteDefinition`] when registered.
//!
//! ```rust,ignore
//! Route::new()
//!     .get(show_user)
//!     .put(update_user)
//!     .middleware(require_json)
//!     .serve_via_socket()
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, warn};
use trellis_core::pattern::{self, CompiledPattern};
use trellis_core::{
    BoxedHandler, Context, ErasedHandler, Handler, HandlerError, HandlerResult, Method, Transport,
    guarded, into_handler,
};

use crate::error::{BuildError, BuildResult};
use crate::middleware::{Flow, RequestMiddleware, Scope, request_middleware};

/// A transport-bound listener produced from a definition.
///
/// Runs the full chain for one call and always leaves the context responded
/// (or deliberately silent for ack-less events).
pub type Listener = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;

/// Which transports a route is served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedVia {
    http: bool,
    socket: bool,
}

impl ServedVia {
    pub fn contains(&self, transport: Transport) -> bool {
        match transport {
            Transport::RequestResponse => self.http,
            Transport::Event => self.socket,
        }
    }

    /// The transports in a fixed order.
    pub fn transports(&self) -> impl Iterator<Item = Transport> + '_ {
        [Transport::RequestResponse, Transport::Event]
            .into_iter()
            .filter(|t| self.contains(*t))
    }
}

impl Default for ServedVia {
    fn default() -> Self {
        Self {
            http: true,
            socket: false,
        }
    }
}

/// The export of a route file.
///
/// Only constructible through [`Route::new`], so a registered value is
/// always a well-formed route.
#[derive(Clone, Default)]
pub struct Route {
    methods: Vec<(Method, BoxedHandler)>,
    middleware: Vec<RequestMiddleware>,
    served_via: ServedVia,
    meta: Option<Value>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `method`.
    pub fn method<H, T>(mut self, method: Method, handler: H) -> Self
    where
        H: Handler<T>,
        T: 'static,
    {
        self.methods.push((method, into_handler(handler)));
        self
    }

    pub fn get<H: Handler<T>, T: 'static>(self, handler: H) -> Self {
        self.method(Method::Get, handler)
    }

    pub fn post<H: Handler<T>, T: 'static>(self, handler: H) -> Self {
        self.method(Method::Post, handler)
    }

    pub fn put<H: Handler<T>, T: 'static>(self, handler: H) -> Self {
        self.method(Method::Put, handler)
    }

    pub fn delete<H: Handler<T>, T: 'static>(self, handler: H) -> Self {
        self.method(Method::Delete, handler)
    }

    pub fn patch<H: Handler<T>, T: 'static>(self, handler: H) -> Self {
        self.method(Method::Patch, handler)
    }

    /// Registers a handler for every method.
    pub fn all<H: Handler<T>, T: 'static>(self, handler: H) -> Self {
        self.method(Method::All, handler)
    }

    /// Adds route-local middleware, run after every ancestor middleware.
    pub fn middleware<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Flow>> + Send + 'static,
    {
        self.middleware.push(request_middleware(f));
        self
    }

    /// Also serves this route over the event transport.
    pub fn serve_via_socket(mut self) -> Self {
        self.served_via.socket = true;
        self
    }

    /// Serves this route over the event transport only.
    pub fn socket_only(mut self) -> Self {
        self.served_via = ServedVia {
            http: false,
            socket: true,
        };
        self
    }

    /// Attaches description metadata for the documentation sink.
    pub fn describe(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Splits the route into one definition per method.
    pub(crate) fn into_definitions(
        self,
        path: &str,
        ancestors: &Scope,
    ) -> BuildResult<Vec<RouteDefinition>> {
        let pattern = compile(path)?;
        Ok(self
            .methods
            .into_iter()
            .map(|(method, handler)| RouteDefinition {
                path: pattern::join(path, ""),
                method,
                handler,
                middleware: self.middleware.clone(),
                ancestors: ancestors.clone(),
                served_via: self.served_via,
                meta: self.meta.clone(),
                pattern: Arc::clone(&pattern),
            })
            .collect())
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<Method> = self.methods.iter().map(|(m, _)| *m).collect();
        f.debug_struct("Route")
            .field("methods", &methods)
            .field("served_via", &self.served_via)
            .finish_non_exhaustive()
    }
}

pub(crate) fn compile(path: &str) -> BuildResult<Arc<CompiledPattern>> {
    pattern::compile(path).map_err(|source| BuildError::InvalidPattern {
        path: path.to_string(),
        source,
    })
}

/// One (path, method) registration. Immutable once built.
#[derive(Clone)]
pub struct RouteDefinition {
    path: String,
    method: Method,
    handler: BoxedHandler,
    middleware: Vec<RequestMiddleware>,
    ancestors: Scope,
    served_via: ServedVia,
    meta: Option<Value>,
    pattern: Arc<CompiledPattern>,
}

impl RouteDefinition {
    /// The path in canonical `/a/b` form.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn served_via(&self) -> ServedVia {
        self.served_via
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    pub fn pattern(&self) -> &Arc<CompiledPattern> {
        &self.pattern
    }

    /// Ancestor middleware layers, outermost first.
    pub fn ancestors(&self) -> &Scope {
        &self.ancestors
    }

    /// Copies this definition to `path`, optionally swapping its ancestors.
    pub(crate) fn relocate(&self, path: &str, ancestors: Option<&Scope>) -> BuildResult<Self> {
        let pattern = compile(path)?;
        Ok(Self {
            path: pattern::join(path, ""),
            ancestors: ancestors.cloned().unwrap_or_else(|| self.ancestors.clone()),
            pattern,
            ..self.clone()
        })
    }

    /// Produces the listener for this definition.
    ///
    /// The listener is transport-agnostic: the [`Context`] it is called with
    /// decides where the response goes. Ancestor middleware runs first, then
    /// route-local middleware, then the handler. Failures anywhere in the
    /// chain, panics included, become structured errors on the context.
    pub fn listener(&self) -> Listener {
        let chain: Arc<[RequestMiddleware]> = self
            .ancestors
            .iter()
            .flat_map(|layer| layer.middleware.request.iter().cloned())
            .chain(self.middleware.iter().cloned())
            .collect();
        let handler = Arc::clone(&self.handler);

        Arc::new(move |ctx: Context| -> BoxFuture<'static, ()> {
            let chain = Arc::clone(&chain);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let outcome = guarded(run_chain(&chain, &handler, ctx.clone())).await;
                if let Err(err) = outcome {
                    deliver_error(&ctx, err);
                }
                ctx.finish();
            })
        })
    }
}

impl std::fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("served_via", &self.served_via)
            .field("ancestors", &self.ancestors.len())
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

async fn run_chain(
    chain: &[RequestMiddleware],
    handler: &BoxedHandler,
    ctx: Context,
) -> HandlerResult {
    for middleware in chain {
        if middleware(ctx.clone()).await? == Flow::Halt {
            debug!(path = %ctx.full_path(), "Middleware halted the chain");
            return Ok(());
        }
    }
    handler.call(ctx).await
}

/// Logs a dispatch failure and delivers it through the context.
pub(crate) fn deliver_error(ctx: &Context, err: HandlerError) {
    let message = err.to_string();
    let structured = err.into_structured();

    if structured.status_code >= 500 {
        error!(
            transport = %ctx.transport(),
            path = %ctx.full_path(),
            error = %message,
            "Handler failed"
        );
    } else {
        debug!(
            transport = %ctx.transport(),
            path = %ctx.full_path(),
            status = structured.status_code,
            error = %message,
            "Handler rejected the call"
        );
    }

    if !ctx.fail(&structured) && ctx.transport() == Transport::Event && !ctx.has_ack() {
        warn!(
            path = %ctx.full_path(),
            status = structured.status_code,
            "Event carried no acknowledgment, error not delivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Layer, Middleware};
    use serde_json::json;
    use std::sync::Mutex;
    use trellis_core::{Ack, HttpSurface, Params, ReplyBody, RequestParts, StructuredError};

    fn http(method: Method, path: &str) -> Context {
        Context::http(RequestParts::new(method, path), HttpSurface::default())
    }

    #[test]
    fn test_one_definition_per_method() {
        let defs = Route::new()
            .get(|| async {})
            .post(|| async {})
            .into_definitions("users/:id", &Scope::new())
            .unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].path(), "/users/:id");
        assert_eq!(defs[0].method(), Method::Get);
        assert_eq!(defs[1].method(), Method::Post);
        assert!(defs[0].pattern().is_dynamic());
    }

    #[tokio::test]
    async fn test_listener_runs_ancestors_then_route_middleware() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let outer = Middleware::new().request(move |_| {
            let o = Arc::clone(&o);
            async move {
                o.lock().unwrap().push("ancestor");
                Ok(Flow::Next)
            }
        });
        let o = Arc::clone(&order);
        let route = Route::new()
            .get(move |ctx: Context| {
                let o = Arc::clone(&o);
                async move {
                    o.lock().unwrap().push("handler");
                    ctx.json(json!({ "ok": true }));
                }
            })
            .middleware({
                let o = Arc::clone(&order);
                move |_| {
                    let o = Arc::clone(&o);
                    async move {
                        o.lock().unwrap().push("route");
                        Ok(Flow::Next)
                    }
                }
            });

        let scope = vec![Arc::new(Layer::new("/", outer))];
        let def = route.into_definitions("/a", &scope).unwrap().remove(0);
        let ctx = http(Method::Get, "/a");
        def.listener()(ctx.clone()).await;

        assert_eq!(*order.lock().unwrap(), ["ancestor", "route", "handler"]);
        assert_eq!(ctx.take_reply().unwrap().body, ReplyBody::Json(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn test_listener_halts_on_middleware() {
        let route = Route::new()
            .get(|ctx: Context| async move {
                ctx.text("handler ran");
            })
            .middleware(|ctx: Context| async move {
                ctx.set_status(401).json(json!({ "denied": true }));
                Ok(Flow::Halt)
            });
        let def = route.into_definitions("/a", &Scope::new()).unwrap().remove(0);
        let ctx = http(Method::Get, "/a");
        def.listener()(ctx.clone()).await;
        let reply = ctx.take_reply().unwrap();
        assert_eq!(reply.status, 401);
        assert_eq!(reply.body, ReplyBody::Json(json!({ "denied": true })));
    }

    #[tokio::test]
    async fn test_listener_converts_errors() {
        let def = Route::new()
            .get(|| async { Err::<(), _>(StructuredError::forbidden("nope")) })
            .into_definitions("/a", &Scope::new())
            .unwrap()
            .remove(0);

        let ctx = http(Method::Get, "/a");
        def.listener()(ctx.clone()).await;
        assert_eq!(ctx.take_reply().unwrap().status, 403);
    }

    #[tokio::test]
    async fn test_same_listener_serves_events() {
        let def = Route::new()
            .get(|ctx: Context, params: Params| async move {
                ctx.json(json!({ "id": params.get("id") }));
            })
            .into_definitions("/users/:id", &Scope::new())
            .unwrap()
            .remove(0);

        let mut params = trellis_core::ParamMap::new();
        params.insert("id".into(), "7".into());
        let (ack, rx) = Ack::channel();
        let ctx = Context::event(
            RequestParts::new(Method::Get, "users/7").with_params(params),
            Vec::new(),
            Some(ack),
        );
        def.listener()(ctx).await;
        assert_eq!(rx.await.unwrap(), json!({ "id": "7" }));
    }

    #[tokio::test]
    async fn test_relocate_keeps_handler() {
        let def = Route::new()
            .get(|ctx: Context| async move {
                ctx.text("moved");
            })
            .into_definitions("/old", &Scope::new())
            .unwrap()
            .remove(0);
        let moved = def.relocate("/v2/old", None).unwrap();
        assert_eq!(moved.path(), "/v2/old");

        let ctx = http(Method::Get, "/v2/old");
        moved.listener()(ctx.clone()).await;
        assert_eq!(ctx.take_reply().unwrap().body, ReplyBody::Text("moved".into()));
    }
}
